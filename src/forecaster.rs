use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use crate::cells::{Apply, ConvCell, ConvShape, DeconvCell};
use crate::config::{require_layers, PerLayer};
use crate::error::{ModelError, Result};
use crate::state::HiddenState;

#[derive(Config, Debug)]
pub struct ForecasterConfig {
    /// Channels of the hidden state fed to each upsample layer.
    pub upsample_cin: PerLayer,
    pub upsample_cout: PerLayer,
    pub upsample_k: PerLayer,
    pub upsample_p: PerLayer,
    pub upsample_s: PerLayer,
    pub n_layers: usize,
    #[config(default = "PerLayer::Scalar(1)")]
    pub output_cout: PerLayer,
    #[config(default = "PerLayer::Scalar(1)")]
    pub output_k: PerLayer,
    #[config(default = "PerLayer::Scalar(1)")]
    pub output_s: PerLayer,
    #[config(default = "PerLayer::Scalar(0)")]
    pub output_p: PerLayer,
    #[config(default = 1)]
    pub n_output_layers: usize,
    #[config(default = false)]
    pub batch_norm: bool,
}

impl ForecasterConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Forecaster<B>> {
        require_layers("n_layers", self.n_layers)?;
        require_layers("n_output_layers", self.n_output_layers)?;
        let n = self.n_layers;
        let upsample_cin = self.upsample_cin.resolve("upsample_cin", "n_layers", n)?;
        let upsample_cout = self.upsample_cout.resolve("upsample_cout", "n_layers", n)?;
        let upsample_k = self.upsample_k.resolve("upsample_k", "n_layers", n)?;
        let upsample_s = self.upsample_s.resolve("upsample_s", "n_layers", n)?;
        let upsample_p = self.upsample_p.resolve("upsample_p", "n_layers", n)?;

        let m = self.n_output_layers;
        let output_cout = self.output_cout.resolve("output_cout", "n_output_layers", m)?;
        let output_k = self.output_k.resolve("output_k", "n_output_layers", m)?;
        let output_s = self.output_s.resolve("output_s", "n_output_layers", m)?;
        let output_p = self.output_p.resolve("output_p", "n_output_layers", m)?;

        let upsamples = (0..n)
            .map(|i| {
                // from the second layer on, the previous output is concatenated
                let cin = match i {
                    0 => upsample_cin[0],
                    _ => upsample_cin[i] + upsample_cout[i - 1],
                };
                let shape = ConvShape::new(cin, upsample_cout[i], upsample_k[i], upsample_s[i], upsample_p[i]);
                DeconvCell::new(shape, self.batch_norm, device)
            })
            .collect();

        let outputs = (0..m)
            .map(|i| {
                let cin = match i {
                    0 => upsample_cout[n - 1],
                    _ => output_cout[i - 1],
                };
                let shape = ConvShape::new(cin, output_cout[i], output_k[i], output_s[i], output_p[i]);
                ConvCell::new(shape, self.batch_norm, device)
            })
            .collect();

        Ok(Forecaster { upsamples, outputs })
    }
}

/// Decodes one frame from the encoder state, deepest layer first.
#[derive(Module, Debug)]
pub struct Forecaster<B: Backend> {
    upsamples: Vec<DeconvCell<B>>,
    outputs: Vec<ConvCell<B>>,
}

impl<B: Backend> Forecaster<B> {
    pub fn n_layers(&self) -> usize {
        self.upsamples.len()
    }

    pub fn n_output_layers(&self) -> usize {
        self.outputs.len()
    }

    /// `hidden` must be ordered deepest first (see [`HiddenState::reversed`]).
    pub fn forecast(&self, hidden: HiddenState<B>) -> Result<Tensor<B, 4>> {
        if hidden.len() != self.n_layers() {
            return Err(ModelError::shape_mismatch(
                "forecaster",
                format!(
                    "got {} hidden layers, forecaster has {} upsample layers",
                    hidden.len(),
                    self.n_layers()
                ),
            ));
        }

        let mut layers = hidden.into_layers().into_iter().zip(&self.upsamples);
        let Some((deepest, first)) = layers.next() else {
            return Err(ModelError::shape_mismatch("forecaster", "empty hidden state"));
        };
        let upsampled = layers.fold(first.apply(deepest), |acc, (skip, cell)| {
            cell.apply(Tensor::cat(vec![skip, acc], 1))
        });

        Ok(self
            .outputs
            .iter()
            .fold(upsampled, |acc, cell| cell.apply(acc)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DefaultBackend as B;
    use burn::tensor::Distribution;

    fn values(tensor: Tensor<B, 4>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().value
    }

    /// Two stride-1 layers over same-sized states, so either order is valid.
    fn square_config() -> ForecasterConfig {
        ForecasterConfig::new(
            PerLayer::Scalar(4),
            PerLayer::Scalar(4),
            PerLayer::Scalar(3),
            PerLayer::Scalar(1),
            PerLayer::Scalar(1),
            2,
        )
    }

    #[test]
    fn upsamples_with_skip_connections() {
        let device = Default::default();
        let forecaster = ForecasterConfig::new(
            PerLayer::List(vec![8, 4]),
            PerLayer::List(vec![4, 2]),
            PerLayer::Scalar(4),
            PerLayer::Scalar(1),
            PerLayer::Scalar(2),
            2,
        )
        .init::<B>(&device)
        .unwrap();

        let hidden = HiddenState::new(vec![
            Tensor::random([2, 8, 4, 4], Distribution::Default, &device),
            Tensor::random([2, 4, 8, 8], Distribution::Default, &device),
        ]);
        let frame = forecaster.forecast(hidden).unwrap();
        assert_eq!(frame.dims(), [2, 1, 16, 16]);
    }

    #[test]
    fn scalar_output_cout_matches_explicit_list() {
        let device = Default::default();
        let scalar = square_config()
            .with_output_cout(PerLayer::Scalar(2))
            .with_n_output_layers(3)
            .init::<B>(&device)
            .unwrap();
        let listed = square_config()
            .with_output_cout(PerLayer::List(vec![2, 2, 2]))
            .with_n_output_layers(3)
            .init::<B>(&device)
            .unwrap();
        assert_eq!(scalar.n_output_layers(), 3);
        assert_eq!(listed.n_output_layers(), 3);

        // same structure: the scalar model's parameters load into the listed one
        let listed = listed.load_record(scalar.clone().into_record());
        let hidden = HiddenState::new(vec![
            Tensor::random([1, 4, 6, 6], Distribution::Default, &device),
            Tensor::random([1, 4, 6, 6], Distribution::Default, &device),
        ]);
        let a = scalar.forecast(hidden.clone()).unwrap();
        let b = listed.forecast(hidden).unwrap();
        assert_eq!(a.dims(), [1, 2, 6, 6]);
        assert_eq!(values(a), values(b));
    }

    #[test]
    fn output_list_length_is_validated() {
        let err = square_config()
            .with_output_cout(PerLayer::List(vec![2, 2]))
            .with_n_output_layers(3)
            .init::<B>(&Default::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidLayerConfig {
                field: "output_cout",
                expected: 3,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn upsample_list_length_is_validated() {
        let config = ForecasterConfig {
            upsample_s: PerLayer::List(vec![1]),
            ..square_config()
        };
        let err = config.init::<B>(&Default::default()).unwrap_err();
        assert!(err.to_string().contains("upsample_s"));
    }

    #[test]
    fn hidden_order_matters() {
        let device = Default::default();
        let forecaster = square_config()
            .with_output_cout(PerLayer::Scalar(3))
            .init::<B>(&device)
            .unwrap();
        let hidden = HiddenState::new(vec![
            Tensor::random([1, 4, 8, 8], Distribution::Uniform(0.0, 1.0), &device),
            Tensor::random([1, 4, 8, 8], Distribution::Uniform(-1.0, 0.0), &device),
        ]);

        let forward = forecaster.forecast(hidden.clone()).unwrap();
        let backward = forecaster.forecast(hidden.reversed()).unwrap();
        let diff = values(forward)
            .iter()
            .zip(values(backward))
            .map(|(a, b)| (a - b).abs())
            .sum::<f32>();
        assert!(diff > 0.0);
    }

    #[test]
    fn wrong_depth_is_a_shape_error() {
        let device = Default::default();
        let forecaster = square_config().init::<B>(&device).unwrap();
        let hidden = HiddenState::new(vec![Tensor::zeros([1, 4, 8, 8], &device)]);
        assert!(matches!(
            forecaster.forecast(hidden).unwrap_err(),
            ModelError::TensorShapeMismatch { .. }
        ));
    }
}
