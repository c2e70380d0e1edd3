use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use crate::cells::{Apply, ConvCell, ConvGruCell, ConvShape, Recurrent};
use crate::config::{require_layers, PerLayer};
use crate::error::{ModelError, Result};
use crate::state::HiddenState;

#[derive(Config, Debug)]
pub struct EncoderConfig {
    pub input_channels: usize,
    /// Output channels of each downsample cell.
    pub downsample: PerLayer,
    /// Hidden channels of each GRU cell.
    pub gru: PerLayer,
    pub downsample_k: PerLayer,
    pub downsample_s: PerLayer,
    pub downsample_p: PerLayer,
    pub gru_k: PerLayer,
    /// GRU stride; the gates must keep the state's spatial size, so only 1.
    pub gru_s: PerLayer,
    pub gru_p: PerLayer,
    pub n_layers: usize,
    #[config(default = false)]
    pub batch_norm: bool,
}

impl EncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Encoder<B>> {
        require_layers("n_layers", self.n_layers)?;
        let n = self.n_layers;
        let downsample = self.downsample.resolve("downsample", "n_layers", n)?;
        let gru = self.gru.resolve("gru", "n_layers", n)?;
        let downsample_k = self.downsample_k.resolve("downsample_k", "n_layers", n)?;
        let downsample_s = self.downsample_s.resolve("downsample_s", "n_layers", n)?;
        let downsample_p = self.downsample_p.resolve("downsample_p", "n_layers", n)?;
        let gru_k = self.gru_k.resolve("gru_k", "n_layers", n)?;
        let gru_s = self.gru_s.resolve("gru_s", "n_layers", n)?;
        let gru_p = self.gru_p.resolve("gru_p", "n_layers", n)?;
        if let Some(stride) = gru_s.iter().find(|&&stride| stride != 1) {
            return Err(ModelError::invalid_config(
                "gru_s",
                format!("ConvGRU layers keep the spatial size of their state, stride {stride} would shrink it"),
            ));
        }

        let mut downsamples = Vec::with_capacity(n);
        let mut grus = Vec::with_capacity(n);
        let mut cin = self.input_channels;
        for i in 0..n {
            let down = ConvShape::new(cin, downsample[i], downsample_k[i], downsample_s[i], downsample_p[i]);
            let recurrent = ConvShape::new(downsample[i], gru[i], gru_k[i], gru_s[i], gru_p[i]);
            downsamples.push(ConvCell::new(down, self.batch_norm, device));
            grus.push(ConvGruCell::new(recurrent, device));
            cin = gru[i];
        }

        Ok(Encoder {
            downsamples,
            grus,
        })
    }
}

/// Stack of (downsample, ConvGRU) layers carrying hidden state across steps.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    downsamples: Vec<ConvCell<B>>,
    grus: Vec<ConvGruCell<B>>,
}

impl<B: Backend> Encoder<B> {
    pub fn n_layers(&self) -> usize {
        self.grus.len()
    }

    /// One time step. Each layer downsamples its input, updates its GRU state
    /// and hands that state to the next layer.
    pub fn step(
        &self,
        frame: Tensor<B, 4>,
        hidden: Option<HiddenState<B>>,
    ) -> Result<HiddenState<B>> {
        let previous: Vec<Option<Tensor<B, 4>>> = match hidden {
            Some(state) if state.len() == self.n_layers() => {
                state.into_layers().into_iter().map(Some).collect()
            }
            Some(state) => {
                return Err(ModelError::shape_mismatch(
                    "encoder",
                    format!(
                        "hidden state has {} layers, encoder has {}",
                        state.len(),
                        self.n_layers()
                    ),
                ))
            }
            None => vec![None; self.n_layers()],
        };

        let mut layers = Vec::with_capacity(self.n_layers());
        let mut x = frame;
        for ((downsample, gru), prev) in self.downsamples.iter().zip(&self.grus).zip(previous) {
            let h = gru.step(downsample.apply(x), prev);
            x = h.clone();
            layers.push(h);
        }

        Ok(HiddenState::new(layers))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DefaultBackend as B;
    use burn::tensor::Distribution;

    fn two_layer_config() -> EncoderConfig {
        EncoderConfig::new(
            1,
            PerLayer::List(vec![4, 8]),
            PerLayer::List(vec![4, 8]),
            PerLayer::Scalar(3),
            PerLayer::Scalar(2),
            PerLayer::Scalar(1),
            PerLayer::Scalar(3),
            PerLayer::Scalar(1),
            PerLayer::Scalar(1),
            2,
        )
    }

    #[test]
    fn step_produces_one_state_per_layer() {
        let device = Default::default();
        let encoder = two_layer_config().init::<B>(&device).unwrap();
        let frame = Tensor::random([2, 1, 16, 16], Distribution::Default, &device);

        let hidden = encoder.step(frame.clone(), None).unwrap();
        assert_eq!(hidden.shapes(), vec![[2, 4, 8, 8], [2, 8, 4, 4]]);

        let hidden = encoder.step(frame, Some(hidden)).unwrap();
        assert_eq!(hidden.shapes(), vec![[2, 4, 8, 8], [2, 8, 4, 4]]);
    }

    #[test]
    fn wrong_depth_state_is_rejected() {
        let device = Default::default();
        let encoder = two_layer_config().init::<B>(&device).unwrap();
        let frame = Tensor::random([1, 1, 16, 16], Distribution::Default, &device);
        let shallow = HiddenState::new(vec![Tensor::zeros([1, 4, 8, 8], &device)]);

        let err = encoder.step(frame, Some(shallow)).unwrap_err();
        assert!(matches!(err, ModelError::TensorShapeMismatch { .. }));
    }

    #[test]
    fn strided_gru_is_rejected() {
        let config = EncoderConfig {
            gru_s: PerLayer::List(vec![1, 2]),
            ..two_layer_config()
        };
        let err = config.init::<B>(&Default::default()).unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfig { field: "gru_s", .. }));
    }

    #[test]
    fn per_layer_lists_are_validated() {
        let config = two_layer_config().with_batch_norm(true);
        let config = EncoderConfig {
            gru_k: PerLayer::List(vec![3, 3, 3]),
            ..config
        };
        let err = config.init::<B>(&Default::default()).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidLayerConfig { field: "gru_k", .. }
        ));
    }
}
