use std::f64::consts::SQRT_2;

use burn::{
    config::Config,
    module::{Module, Param},
    nn::{Initializer, Linear, LinearConfig},
    tensor::{backend::Backend, Tensor},
};

use crate::config::{require_layers, PerLayer};
use crate::error::{ModelError, Result};
use crate::sampling;

/// Number of affine parameters regressed per sample (a 2x3 matrix).
pub const THETA_SIZE: usize = 6;
/// Scale applied to the learned part of the 2x2 linear block.
pub const LINEAR_DAMPING: f32 = 0.1;

#[derive(Config, Debug)]
pub struct TyCatcherConfig {
    /// Track feature width.
    pub input_size: usize,
    /// Output width of each linear layer; the last one must be 6.
    pub hidden: PerLayer,
    pub n_layers: usize,
    /// Row range `[from, to)` kept from the warped radar map.
    pub crop_rows: [usize; 2],
    /// Column range `[from, to)` kept from the warped radar map.
    pub crop_cols: [usize; 2],
    /// Zero the final layer's weight so theta starts at exactly the identity.
    #[config(default = true)]
    pub identity_init: bool,
}

impl TyCatcherConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<TyCatcher<B>> {
        require_layers("n_layers", self.n_layers)?;
        let hidden = self.hidden.resolve("hidden", "n_layers", self.n_layers)?;
        let head = hidden[hidden.len() - 1];
        if head != THETA_SIZE {
            return Err(ModelError::invalid_config(
                "hidden",
                format!("the last layer must output {THETA_SIZE} affine parameters, got {head}"),
            ));
        }
        for (field, [from, to]) in [("crop_rows", self.crop_rows), ("crop_cols", self.crop_cols)] {
            if from >= to {
                return Err(ModelError::invalid_config(
                    field,
                    format!("empty range {from}..{to}"),
                ));
            }
        }

        let mut layers = Vec::with_capacity(self.n_layers);
        let mut d_input = self.input_size;
        for (index, &d_output) in hidden.iter().enumerate() {
            let mut layer = LinearConfig::new(d_input, d_output)
                .with_initializer(Initializer::KaimingNormal {
                    gain: SQRT_2,
                    fan_out_only: false,
                })
                .init(device);
            if self.identity_init && index + 1 == hidden.len() {
                layer.weight = Param::from_tensor(Tensor::zeros([d_input, d_output], device));
            }
            layer.bias = Some(Param::from_tensor(Tensor::zeros([d_output], device)));

            layers.push(layer);
            d_input = d_output;
        }

        Ok(TyCatcher {
            layers,
            rows_from: self.crop_rows[0],
            rows_to: self.crop_rows[1],
            cols_from: self.crop_cols[0],
            cols_to: self.crop_cols[1],
        })
    }
}

/// Regresses an affine transform from track features and uses it to warp
/// and crop the radar map.
#[derive(Module, Debug)]
pub struct TyCatcher<B: Backend> {
    pub layers: Vec<Linear<B>>,
    rows_from: usize,
    rows_to: usize,
    cols_from: usize,
    cols_to: usize,
}

impl<B: Backend> TyCatcher<B> {
    /// (batch, feature_dim) -> (batch, 2, 3)
    ///
    /// `[I + 0.1 * A | t]` where `A` and `t` come from the linear stack.
    pub fn theta(&self, track_features: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, _] = track_features.dims();
        let device = track_features.device();

        let params = self
            .layers
            .iter()
            .fold(track_features, |x, layer| layer.forward(x))
            .reshape([batch, 2, 3]);
        let linear = params.clone().slice([0..batch, 0..2, 0..2]);
        let translation = params.slice([0..batch, 0..2, 2..3]);

        let identity = Tensor::<B, 1>::from_floats([1.0, 0.0, 0.0, 1.0], &device)
            .reshape([1, 2, 2])
            .repeat(0, batch);

        Tensor::cat(vec![identity + linear.mul_scalar(LINEAR_DAMPING), translation], 2)
    }

    /// Returns the cropped patch (batch, channel, rows, cols) and theta.
    pub fn warp(
        &self,
        track_features: Tensor<B, 2>,
        radar_map: Tensor<B, 4>,
    ) -> Result<(Tensor<B, 4>, Tensor<B, 3>)> {
        let [batch, channels, height, width] = radar_map.dims();
        let [feature_batch, _] = track_features.dims();
        if feature_batch != batch {
            return Err(ModelError::shape_mismatch(
                "tycatcher",
                format!("track features have batch {feature_batch}, radar map has {batch}"),
            ));
        }
        if self.rows_to > height || self.cols_to > width {
            return Err(ModelError::shape_mismatch(
                "tycatcher",
                format!(
                    "crop rows {}..{} cols {}..{} outside a {height}x{width} radar map",
                    self.rows_from, self.rows_to, self.cols_from, self.cols_to
                ),
            ));
        }

        let theta = self.theta(track_features);
        let patch = sampling::warp(radar_map, theta.clone()).slice([
            0..batch,
            0..channels,
            self.rows_from..self.rows_to,
            self.cols_from..self.cols_to,
        ]);

        Ok((patch, theta))
    }

    /// Spatial size of the patches `warp` returns.
    pub fn patch_size(&self) -> [usize; 2] {
        [self.rows_to - self.rows_from, self.cols_to - self.cols_from]
    }
}
