use nalgebra::{RealField, Scalar, Vector3};

use super::{bias::BiasSeeding, noise::NoiseConfig, state::InitialCovConfig};
use crate::{error::ConfigError, utils::AllFinite};

/// Whether contact measurements handed to a step are fused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CorrectionPolicy {
    /// Fuse every measurement that is supplied.
    #[default]
    Always,
    /// Propagate with the inertial samples only and ignore measurements.
    PredictOnly,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config<T: Scalar> {
    pub noise: NoiseConfig<T>,
    pub initial_cov: InitialCovConfig<T>,
    /// World-frame gravity, z up.
    pub gravity: Vector3<T>,
    pub correction: CorrectionPolicy,
    pub bias_seeding: BiasSeeding,
    /// See [`Eskf::min_innovation_rcond`](crate::eskf::Eskf::min_innovation_rcond).
    pub min_innovation_rcond: T,
}

impl<T: RealField> Default for Config<T> {
    fn default() -> Self {
        Self {
            noise: NoiseConfig::default(),
            initial_cov: InitialCovConfig::default(),
            gravity: Vector3::new(T::zero(), T::zero(), nalgebra::convert(-9.8)),
            correction: CorrectionPolicy::default(),
            bias_seeding: BiasSeeding::default(),
            min_innovation_rcond: nalgebra::convert(1e-12),
        }
    }
}

impl<T: RealField> Config<T> {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.noise.validate()?;

        let InitialCovConfig {
            position,
            velocity,
            orientation,
            contact,
            accel_bias,
            gyro_bias,
        } = &self.initial_cov;
        [
            (position, "initial position variance"),
            (velocity, "initial velocity variance"),
            (orientation, "initial orientation variance"),
            (contact, "initial contact variance"),
            (accel_bias, "initial accel bias variance"),
            (gyro_bias, "initial gyro bias variance"),
        ]
        .into_iter()
        .try_for_each(|(variance, name)| {
            if !variance.is_finite() {
                Err(ConfigError::NonFinite(name))
            } else if *variance < T::zero() {
                Err(ConfigError::Negative(name))
            } else {
                Ok(())
            }
        })?;

        if !self.gravity.all_finite() {
            return Err(ConfigError::NonFinite("gravity"));
        }
        if !self.min_innovation_rcond.is_finite() {
            return Err(ConfigError::NonFinite("min innovation rcond"));
        }
        if self.min_innovation_rcond < T::zero() {
            return Err(ConfigError::Negative("min innovation rcond"));
        }
        Ok(())
    }
}
