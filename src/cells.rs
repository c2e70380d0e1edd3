use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{relu, sigmoid, tanh},
        backend::Backend,
        Tensor,
    },
};

/// A feed-forward cell: one 4D tensor in, one out.
pub trait Apply<B: Backend> {
    fn apply(&self, input: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// A recurrent cell. With no prior state the cell seeds its own.
pub trait Recurrent<B: Backend> {
    fn step(&self, input: Tensor<B, 4>, state: Option<Tensor<B, 4>>) -> Tensor<B, 4>;
}

/// Sizes of a single convolution; shared by every cell kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvShape {
    pub cin: usize,
    pub cout: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
}

impl ConvShape {
    pub fn new(cin: usize, cout: usize, kernel: usize, stride: usize, padding: usize) -> Self {
        Self {
            cin,
            cout,
            kernel,
            stride,
            padding,
        }
    }

    fn conv2d<B: Backend>(&self, device: &B::Device) -> Conv2d<B> {
        Conv2dConfig::new([self.cin, self.cout], [self.kernel, self.kernel])
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
            .init(device)
    }
}

/// Conv2d, optional batch norm, ReLU.
#[derive(Module, Debug)]
pub struct ConvCell<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<BatchNorm<B, 2>>,
}

impl<B: Backend> ConvCell<B> {
    pub fn new(shape: ConvShape, batch_norm: bool, device: &B::Device) -> Self {
        Self {
            conv: shape.conv2d(device),
            norm: batch_norm.then(|| BatchNormConfig::new(shape.cout).init(device)),
        }
    }
}

impl<B: Backend> Apply<B> for ConvCell<B> {
    fn apply(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        relu(x)
    }
}

/// ConvTranspose2d, optional batch norm, ReLU.
#[derive(Module, Debug)]
pub struct DeconvCell<B: Backend> {
    deconv: ConvTranspose2d<B>,
    norm: Option<BatchNorm<B, 2>>,
}

impl<B: Backend> DeconvCell<B> {
    pub fn new(shape: ConvShape, batch_norm: bool, device: &B::Device) -> Self {
        let deconv = ConvTranspose2dConfig::new([shape.cin, shape.cout], [shape.kernel, shape.kernel])
            .with_stride([shape.stride, shape.stride])
            .with_padding([shape.padding, shape.padding])
            .init(device);

        Self {
            deconv,
            norm: batch_norm.then(|| BatchNormConfig::new(shape.cout).init(device)),
        }
    }
}

impl<B: Backend> Apply<B> for DeconvCell<B> {
    fn apply(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.deconv.forward(input);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        relu(x)
    }
}

/// Convolutional GRU.
///
/// h' = (1 - z) * h + z * tanh(W_c [x, r * h]), with [r, z] = sigmoid(W_g [x, h]).
#[derive(Module, Debug)]
pub struct ConvGruCell<B: Backend> {
    gates: Conv2d<B>,
    candidate: Conv2d<B>,
    hidden_size: usize,
}

impl<B: Backend> ConvGruCell<B> {
    /// `shape.cin` is the input channel count, `shape.cout` the hidden size.
    pub fn new(shape: ConvShape, device: &B::Device) -> Self {
        let joint = shape.cin + shape.cout;
        Self {
            gates: ConvShape { cin: joint, cout: 2 * shape.cout, ..shape }.conv2d(device),
            candidate: ConvShape { cin: joint, ..shape }.conv2d(device),
            hidden_size: shape.cout,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}

impl<B: Backend> Recurrent<B> for ConvGruCell<B> {
    fn step(&self, input: Tensor<B, 4>, state: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        let [batch, _, height, width] = input.dims();
        let hidden = state
            .unwrap_or_else(|| Tensor::zeros([batch, self.hidden_size, height, width], &input.device()));

        let gates = sigmoid(
            self.gates
                .forward(Tensor::cat(vec![input.clone(), hidden.clone()], 1)),
        );
        let [_, _, gate_h, gate_w] = gates.dims();
        let reset = gates
            .clone()
            .slice([0..batch, 0..self.hidden_size, 0..gate_h, 0..gate_w]);
        let update = gates.slice([
            0..batch,
            self.hidden_size..2 * self.hidden_size,
            0..gate_h,
            0..gate_w,
        ]);

        let candidate = tanh(
            self.candidate
                .forward(Tensor::cat(vec![input, reset * hidden.clone()], 1)),
        );

        update.clone().neg().add_scalar(1.0) * hidden + update * candidate
    }
}
