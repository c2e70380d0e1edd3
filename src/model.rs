use std::f32::consts::LN_10;
use std::iter;

use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};
use tracing::{debug, info};

use crate::encoder::{Encoder, EncoderConfig};
use crate::error::{ModelError, Result};
use crate::forecaster::{Forecaster, ForecasterConfig};
use crate::state::HiddenState;
use crate::tycatcher::{TyCatcher, TyCatcherConfig};

/// Z-R relation constants: Z = 200 R^1.6.
const MARSHALL_PALMER_A: f32 = 200.0;
const MARSHALL_PALMER_B: f32 = 1.6;

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub n_encoders: usize,
    pub n_forecasters: usize,
    pub tycatcher: TyCatcherConfig,
    pub encoder: EncoderConfig,
    pub forecaster: ForecasterConfig,
    /// Emit reflectivity (dBZ) directly instead of rain rate.
    #[config(default = false)]
    pub target_rad: bool,
}

impl ModelConfig {
    /// One encoder and one forecaster shared by every step.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Model<B>> {
        self.check_steps()?;
        let model = Model {
            tycatcher: self.tycatcher.init(device)?,
            encoder: self.encoder.init(device)?,
            forecaster: self.forecaster.init(device)?,
            n_encoders: self.n_encoders,
            n_forecasters: self.n_forecasters,
            target_rad: self.target_rad,
        };
        info!(
            n_encoders = self.n_encoders,
            n_forecasters = self.n_forecasters,
            encoder_layers = model.encoder.n_layers(),
            forecaster_layers = model.forecaster.n_layers(),
            "built shared-unit model"
        );
        Ok(model)
    }

    /// A separate encoder per step and a separate forecaster per forecast
    /// step; only the tycatcher is shared.
    pub fn init_multi_unit<B: Backend>(&self, device: &B::Device) -> Result<MultiUnitModel<B>> {
        self.check_steps()?;
        let encoders = (0..self.n_encoders + self.n_forecasters)
            .map(|_| self.encoder.init(device))
            .collect::<Result<Vec<_>>>()?;
        let forecasters = (0..self.n_forecasters)
            .map(|_| self.forecaster.init(device))
            .collect::<Result<Vec<_>>>()?;
        info!(
            n_encoders = self.n_encoders,
            n_forecasters = self.n_forecasters,
            encoder_units = encoders.len(),
            forecaster_units = forecasters.len(),
            "built multi-unit model"
        );

        Ok(MultiUnitModel {
            tycatcher: self.tycatcher.init(device)?,
            encoders,
            forecasters,
            n_encoders: self.n_encoders,
            n_forecasters: self.n_forecasters,
            target_rad: self.target_rad,
        })
    }

    fn check_steps(&self) -> Result<()> {
        if self.n_forecasters == 0 {
            return Err(ModelError::invalid_config(
                "n_forecasters",
                "at least one forecast step is required",
            ));
        }
        Ok(())
    }
}

/// Anything that folds one frame into a recurrent hidden state.
pub trait StepEncoder<B: Backend> {
    fn step(&self, frame: Tensor<B, 4>, hidden: Option<HiddenState<B>>) -> Result<HiddenState<B>>;
}

/// Anything that decodes a frame from a deepest-first hidden state.
pub trait FrameForecaster<B: Backend> {
    fn forecast(&self, hidden: HiddenState<B>) -> Result<Tensor<B, 4>>;
}

impl<B: Backend> StepEncoder<B> for Encoder<B> {
    fn step(&self, frame: Tensor<B, 4>, hidden: Option<HiddenState<B>>) -> Result<HiddenState<B>> {
        Encoder::step(self, frame, hidden)
    }
}

impl<B: Backend> FrameForecaster<B> for Forecaster<B> {
    fn forecast(&self, hidden: HiddenState<B>) -> Result<Tensor<B, 4>> {
        Forecaster::forecast(self, hidden)
    }
}

/// Patches the tycatcher cuts out at each forecast step, with the transforms
/// that produced them.
#[derive(Debug, Clone)]
pub struct Samples<B: Backend> {
    /// Per-step patches concatenated along the channel axis.
    pub patches: Tensor<B, 4>,
    /// One (batch, 2, 3) theta per forecast step.
    pub thetas: Vec<Tensor<B, 3>>,
}

/// Encoding then forecasting, one unit per step as yielded by the iterators.
///
/// `encoding` yields the encoder for each observed frame; `forecasting`
/// yields the (encoder, forecaster) pair for each forecast step. Returns the
/// raw forecast frames concatenated along the channel axis.
pub fn rollout<'a, B, E, F>(
    encoding: impl IntoIterator<Item = &'a E>,
    forecasting: impl IntoIterator<Item = (&'a E, &'a F)>,
    tycatcher: &TyCatcher<B>,
    encoder_inputs: Tensor<B, 5>,
    ty_infos: Tensor<B, 3>,
    radar_map: Tensor<B, 4>,
) -> Result<Tensor<B, 4>>
where
    B: Backend,
    E: StepEncoder<B> + 'a,
    F: FrameForecaster<B> + 'a,
{
    let mut hidden = None;
    for (step, encoder) in encoding.into_iter().enumerate() {
        let frame = time_step(&encoder_inputs, step);
        debug!(step, frame = ?frame.dims(), "encoding");
        hidden = Some(encoder.step(frame, hidden)?);
    }

    let mut frames = Vec::new();
    for (step, (encoder, forecaster)) in forecasting.into_iter().enumerate() {
        let (patch, _) = tycatcher.warp(track_step(&ty_infos, step), radar_map.clone())?;
        let state = encoder.step(patch, hidden)?;
        let frame = forecaster.forecast(state.reversed())?;
        debug!(step, frame = ?frame.dims(), "forecasting");
        frames.push(frame);
        hidden = Some(state);
    }
    if frames.is_empty() {
        return Err(ModelError::shape_mismatch("rollout", "no forecast steps"));
    }

    Ok(Tensor::cat(frames, 1))
}

/// Runs only the tycatcher over every forecast step.
pub fn sample_steps<B: Backend>(
    tycatcher: &TyCatcher<B>,
    n_forecasters: usize,
    ty_infos: Tensor<B, 3>,
    radar_map: Tensor<B, 4>,
) -> Result<Samples<B>> {
    check_time_axis("ty_infos", ty_infos.dims()[1], n_forecasters)?;

    let mut patches = Vec::with_capacity(n_forecasters);
    let mut thetas = Vec::with_capacity(n_forecasters);
    for step in 0..n_forecasters {
        let (patch, theta) = tycatcher.warp(track_step(&ty_infos, step), radar_map.clone())?;
        patches.push(patch);
        thetas.push(theta);
    }

    Ok(Samples {
        patches: Tensor::cat(patches, 1),
        thetas,
    })
}

/// Reflectivity in dBZ to rain rate in mm/h via Marshall-Palmer:
/// `((10^(x/10)) / 200)^(5/8)`.
pub fn reflectivity_to_rain_rate<B: Backend, const D: usize>(dbz: Tensor<B, D>) -> Tensor<B, D> {
    // exp((x ln10 / 10 - ln 200) / 1.6)
    dbz.mul_scalar(LN_10 / 10.0)
        .sub_scalar(MARSHALL_PALMER_A.ln())
        .div_scalar(MARSHALL_PALMER_B)
        .exp()
}

fn time_step<B: Backend>(sequence: &Tensor<B, 5>, step: usize) -> Tensor<B, 4> {
    let [batch, _, channels, height, width] = sequence.dims();
    sequence
        .clone()
        .slice([0..batch, step..step + 1, 0..channels, 0..height, 0..width])
        .squeeze(1)
}

fn track_step<B: Backend>(ty_infos: &Tensor<B, 3>, step: usize) -> Tensor<B, 2> {
    let [batch, _, features] = ty_infos.dims();
    ty_infos
        .clone()
        .slice([0..batch, step..step + 1, 0..features])
        .squeeze(1)
}

fn check_time_axis(name: &'static str, available: usize, required: usize) -> Result<()> {
    if available < required {
        return Err(ModelError::shape_mismatch(
            "model input",
            format!("`{name}` has {available} time steps, {required} are required"),
        ));
    }
    Ok(())
}

fn check_inputs<B: Backend>(
    n_encoders: usize,
    n_forecasters: usize,
    encoder_inputs: &Tensor<B, 5>,
    ty_infos: &Tensor<B, 3>,
    radar_map: &Tensor<B, 4>,
) -> Result<()> {
    let [batch, steps, ..] = encoder_inputs.dims();
    check_time_axis("encoder_inputs", steps, n_encoders)?;
    check_time_axis("ty_infos", ty_infos.dims()[1], n_forecasters)?;

    let batches = [ty_infos.dims()[0], radar_map.dims()[0]];
    if batches.iter().any(|b| *b != batch) {
        return Err(ModelError::shape_mismatch(
            "model input",
            format!(
                "batch sizes differ: encoder_inputs {batch}, ty_infos {}, radar_map {}",
                batches[0], batches[1]
            ),
        ));
    }
    Ok(())
}

/// STN + ConvGRU nowcaster with one encoder and one forecaster reused at
/// every step.
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    pub tycatcher: TyCatcher<B>,
    pub encoder: Encoder<B>,
    pub forecaster: Forecaster<B>,
    n_encoders: usize,
    n_forecasters: usize,
    target_rad: bool,
}

impl<B: Backend> Model<B> {
    /// encoder_inputs (batch, n_encoders, C, H, W), ty_infos
    /// (batch, n_forecasters, features), radar_map (batch, C, H', W').
    ///
    /// Returns (batch, n_forecasters * output channels, h, w).
    pub fn forward(
        &self,
        encoder_inputs: Tensor<B, 5>,
        ty_infos: Tensor<B, 3>,
        radar_map: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>> {
        check_inputs(self.n_encoders, self.n_forecasters, &encoder_inputs, &ty_infos, &radar_map)?;

        let forecast = rollout(
            iter::repeat(&self.encoder).take(self.n_encoders),
            iter::repeat((&self.encoder, &self.forecaster)).take(self.n_forecasters),
            &self.tycatcher,
            encoder_inputs,
            ty_infos,
            radar_map,
        )?;

        if self.target_rad {
            Ok(forecast)
        } else {
            Ok(reflectivity_to_rain_rate(forecast))
        }
    }

    pub fn samples(&self, ty_infos: Tensor<B, 3>, radar_map: Tensor<B, 4>) -> Result<Samples<B>> {
        sample_steps(&self.tycatcher, self.n_forecasters, ty_infos, radar_map)
    }

    pub fn n_encoders(&self) -> usize {
        self.n_encoders
    }

    pub fn n_forecasters(&self) -> usize {
        self.n_forecasters
    }
}

/// Same rollout as [`Model`], with its own encoder for every step and its own
/// forecaster for every forecast step.
#[derive(Module, Debug)]
pub struct MultiUnitModel<B: Backend> {
    pub tycatcher: TyCatcher<B>,
    /// `n_encoders + n_forecasters` units: encoding steps first.
    pub encoders: Vec<Encoder<B>>,
    pub forecasters: Vec<Forecaster<B>>,
    n_encoders: usize,
    n_forecasters: usize,
    target_rad: bool,
}

impl<B: Backend> MultiUnitModel<B> {
    pub fn forward(
        &self,
        encoder_inputs: Tensor<B, 5>,
        ty_infos: Tensor<B, 3>,
        radar_map: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>> {
        check_inputs(self.n_encoders, self.n_forecasters, &encoder_inputs, &ty_infos, &radar_map)?;

        let (encoding, forecasting) = self.encoders.split_at(self.n_encoders);
        let forecast = rollout(
            encoding,
            forecasting.iter().zip(&self.forecasters),
            &self.tycatcher,
            encoder_inputs,
            ty_infos,
            radar_map,
        )?;

        if self.target_rad {
            Ok(forecast)
        } else {
            Ok(reflectivity_to_rain_rate(forecast))
        }
    }

    pub fn samples(&self, ty_infos: Tensor<B, 3>, radar_map: Tensor<B, 4>) -> Result<Samples<B>> {
        sample_steps(&self.tycatcher, self.n_forecasters, ty_infos, radar_map)
    }

    pub fn n_encoders(&self) -> usize {
        self.n_encoders
    }

    pub fn n_forecasters(&self) -> usize {
        self.n_forecasters
    }
}
