pub mod cells;
pub mod config;
pub mod encoder;
pub mod error;
pub mod forecaster;
pub mod model;
pub mod sampling;
pub mod state;
pub mod tycatcher;
pub mod utils;

#[macro_use]
extern crate shrinkwraprs;

pub use error::{ModelError, Result};
pub use model::{Model, ModelConfig, MultiUnitModel, Samples};
