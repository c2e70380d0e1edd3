use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use burn::config::Config;
use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use radar_nowcast::config::{DefaultBackend as B, DefaultDevice, PerLayer};
use radar_nowcast::encoder::EncoderConfig;
use radar_nowcast::forecaster::ForecasterConfig;
use radar_nowcast::tycatcher::TyCatcherConfig;
use radar_nowcast::utils::*;
use radar_nowcast::{Model, ModelConfig, MultiUnitModel, Samples};

/// Run the STN + ConvGRU radar nowcaster on stored or synthetic inputs.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Model config as JSON; a built-in demo config is used when absent.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the effective config as JSON and continue.
    #[arg(long)]
    save_config: Option<PathBuf>,
    /// Use one encoder/forecaster per step instead of shared ones.
    #[arg(long)]
    multi_unit: bool,
    /// Observed frames, (batch, n_encoders, C, H, W).
    #[arg(long)]
    inputs: Option<PathBuf>,
    /// Track features, (batch, n_forecasters, features).
    #[arg(long)]
    ty_infos: Option<PathBuf>,
    /// Radar map to warp, (batch, C, H, W).
    #[arg(long)]
    radar_map: Option<PathBuf>,
    /// Side of the synthetic radar map.
    #[arg(long, default_value_t = 64)]
    radar_size: usize,
    #[arg(long, default_value_t = 1)]
    batch: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Where to write the forecast tensor.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Where to write the tycatcher patches for every forecast step.
    #[arg(long)]
    samples: Option<PathBuf>,
}

enum Nowcaster<B: Backend> {
    Shared(Model<B>),
    MultiUnit(MultiUnitModel<B>),
}

impl<B: Backend> Nowcaster<B> {
    fn forward(
        &self,
        inputs: Tensor<B, 5>,
        ty_infos: Tensor<B, 3>,
        radar_map: Tensor<B, 4>,
    ) -> radar_nowcast::Result<Tensor<B, 4>> {
        match self {
            Nowcaster::Shared(model) => model.forward(inputs, ty_infos, radar_map),
            Nowcaster::MultiUnit(model) => model.forward(inputs, ty_infos, radar_map),
        }
    }

    fn samples(
        &self,
        ty_infos: Tensor<B, 3>,
        radar_map: Tensor<B, 4>,
    ) -> radar_nowcast::Result<Samples<B>> {
        match self {
            Nowcaster::Shared(model) => model.samples(ty_infos, radar_map),
            Nowcaster::MultiUnit(model) => model.samples(ty_infos, radar_map),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Nowcaster::Shared(_) => "shared",
            Nowcaster::MultiUnit(_) => "multi-unit",
        }
    }
}

/// 64x64 radar map, 32x32 patches, two ConvGRU layers down to 8x8.
fn demo_config() -> ModelConfig {
    let tycatcher = TyCatcherConfig::new(4, PerLayer::List(vec![16, 6]), 2, [16, 48], [16, 48]);
    let encoder = EncoderConfig::new(
        1,
        PerLayer::List(vec![8, 16]),
        PerLayer::List(vec![16, 32]),
        PerLayer::Scalar(3),
        PerLayer::Scalar(2),
        PerLayer::Scalar(1),
        PerLayer::Scalar(3),
        PerLayer::Scalar(1),
        PerLayer::Scalar(1),
        2,
    );
    let forecaster = ForecasterConfig::new(
        PerLayer::List(vec![32, 16]),
        PerLayer::List(vec![16, 8]),
        PerLayer::Scalar(4),
        PerLayer::Scalar(1),
        PerLayer::Scalar(2),
        2,
    );
    ModelConfig::new(3, 3, tycatcher, encoder, forecaster)
}

fn stats<const D: usize>(tensor: &Tensor<B, D>) -> (f32, f32, f32) {
    (
        tensor.clone().min().into_scalar().elem::<f32>(),
        tensor.clone().max().into_scalar().elem::<f32>(),
        tensor.clone().mean().into_scalar().elem::<f32>(),
    )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ModelConfig::load(path)
            .map_err(|err| anyhow!("failed to load config {}: {err:?}", path.display()))?,
        None => demo_config(),
    };
    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("failed to write config {}", path.display()))?;
    }

    let device = DefaultDevice::Cpu;
    let model = if args.multi_unit {
        Nowcaster::MultiUnit(config.init_multi_unit::<B>(&device)?)
    } else {
        Nowcaster::Shared(config.init::<B>(&device)?)
    };

    let mut rng = seeded_rng(args.seed);
    let patch_h = config.tycatcher.crop_rows[1] - config.tycatcher.crop_rows[0];
    let patch_w = config.tycatcher.crop_cols[1] - config.tycatcher.crop_cols[0];
    let channels = config.encoder.input_channels;

    let inputs: Tensor<B, 5> = match &args.inputs {
        Some(path) => read_tensor(path, &device)?,
        None => synthetic_tensor(
            [args.batch, config.n_encoders, channels, patch_h, patch_w],
            0.0,
            60.0,
            &mut rng,
            &device,
        ),
    };
    let ty_infos: Tensor<B, 3> = match &args.ty_infos {
        Some(path) => read_tensor(path, &device)?,
        None => synthetic_tensor(
            [args.batch, config.n_forecasters, config.tycatcher.input_size],
            -1.0,
            1.0,
            &mut rng,
            &device,
        ),
    };
    let radar_map: Tensor<B, 4> = match &args.radar_map {
        Some(path) => read_tensor(path, &device)?,
        None => synthetic_tensor(
            [args.batch, channels, args.radar_size, args.radar_size],
            0.0,
            60.0,
            &mut rng,
            &device,
        ),
    };

    let now = Instant::now();
    let forecast = model.forward(inputs, ty_infos.clone(), radar_map.clone())?;
    let elapsed = now.elapsed().as_secs_f32();
    info!(kind = model.kind(), elapsed, "forecast done");

    let samples = model.samples(ty_infos, radar_map)?;
    let thetas = samples
        .thetas
        .iter()
        .map(|theta| theta.clone().into_data().convert::<f32>().value)
        .collect::<Vec<_>>();

    let (min, max, mean) = stats(&forecast);
    let report = json!({
        "model": model.kind(),
        "units": if config.target_rad { "dBZ" } else { "mm/h" },
        "output_shape": forecast.dims(),
        "min": min,
        "max": max,
        "mean": mean,
        "seconds": elapsed,
        "thetas": thetas,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(path) = &args.output {
        write_tensor(path, forecast)?;
        info!(path = %path.display(), "wrote forecast");
    }
    if let Some(path) = &args.samples {
        write_tensor(path, samples.patches)?;
        info!(path = %path.display(), "wrote tycatcher patches");
    }

    Ok(())
}
