#![deny(clippy::unwrap_used)]
#![deny(clippy::undocumented_unsafe_blocks)]
#![deny(unused_must_use)]
pub mod error;
pub mod eskf;
pub mod rotation;
pub mod systems;
mod utils;

pub use error::{ConfigError, EstimatorError};
pub use systems::legged::{
    Config, ContactMeasurement, Correction, ImuMeasured, LegState, LeggedOdometry, UpdateStatus,
};
