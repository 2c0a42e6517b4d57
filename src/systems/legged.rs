//! A proprioceptive error-state Kalman filter for six-legged robots.
//!
//! Inertial samples drive the prediction at IMU rate, forward-kinematics
//! contact poses correct it whenever they are available.

pub mod bias;
pub mod config;
pub mod measurement;
pub mod noise;
pub mod predict;
pub mod state;

use nalgebra::{Matrix4, RealField, SVector};
use tracing::{info, warn};

pub use bias::{BiasHistory, BiasSample, BiasSeeding};
pub use config::{Config, CorrectionPolicy};
pub use measurement::{ContactMeasurement, Correction};
pub use noise::NoiseConfig;
pub use predict::{ImuMeasured, StampedImu};
pub use state::{CONTACT_COUNT, InitialCovConfig, LegState, NOMINAL_DIM};

use crate::{
    eskf::{Covariance, Eskf},
    error::EstimatorError,
    utils::{AllFinite, to_f64},
};

/// What happened to the correction half of a [`LeggedOdometry::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateStatus<T: nalgebra::Scalar> {
    Applied(Correction<T>),
    /// The measurement was refused; the predicted state stands.
    Rejected(EstimatorError),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoMeasurement,
    PredictOnly,
}

/// # Input
/// ```text
/// ├──┬──┬──┬──┬──┬──┬──┬──┬──┬──┬──>> timestamp
///    │  │  │  │  │  │  │  │  │  │
///    IMU ───────── predict ──────────
///          │           │        │
///          contacts ── update ───────
/// ```
pub struct LeggedOdometry<T: RealField> {
    config: Config<T>,
    eskf: Eskf<LegState<T>>,
    bias_history: BiasHistory<T>,
    last_timestamp: Option<T>,
}

impl<T: RealField> LeggedOdometry<T> {
    pub fn new(config: Config<T>) -> Result<Self, EstimatorError> {
        config.validate()?;
        let eskf = Eskf::new_with_cov(
            LegState::zeros(),
            config.initial_cov.clone().into(),
            config.min_innovation_rcond.clone(),
        );
        Ok(Self {
            config,
            eskf,
            bias_history: BiasHistory::new(),
            last_timestamp: None,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config<T> {
        &self.config
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.eskf.state.is_initialized()
    }

    /// Records a bias sample for the initial estimate. Ignored once the
    /// filter is initialized.
    pub fn record_bias(&mut self, sample: BiasSample<T>) -> Result<(), EstimatorError> {
        if !(sample.accel.all_finite() && sample.gyro.all_finite()) {
            return Err(EstimatorError::NonFinite("bias sample"));
        }
        if self.is_initialized() {
            warn!("bias sample recorded after initialization is ignored");
            return Ok(());
        }
        self.bias_history.push(sample);
        Ok(())
    }

    #[inline]
    pub fn bias_history(&self) -> &BiasHistory<T> {
        &self.bias_history
    }

    /// Seeds the state from the contact poses and the recorded bias history,
    /// which is consumed.
    pub fn initialize(&mut self, contact_poses: &[Matrix4<T>]) -> Result<(), EstimatorError> {
        if self.is_initialized() {
            return Err(EstimatorError::AlreadyInitialized);
        }
        let contact_poses: &[Matrix4<T>; CONTACT_COUNT] =
            contact_poses
                .try_into()
                .map_err(|_| EstimatorError::ContactCount {
                    expected: CONTACT_COUNT,
                    found: contact_poses.len(),
                })?;
        if !contact_poses
            .iter()
            .all(|pose| pose.iter().all(|x| x.is_finite()))
        {
            return Err(EstimatorError::NonFinite("contact poses"));
        }

        let (accel_bias, gyro_bias) = self.bias_history.seed(self.config.bias_seeding);
        let state = LegState::initialize(contact_poses, accel_bias, gyro_bias);
        info!(
            samples = self.bias_history.len(),
            accel_bias = ?state.accel_bias.0,
            gyro_bias = ?state.gyro_bias.0,
            "estimator initialized"
        );

        self.eskf
            .reset(state, self.config.initial_cov.clone().into());
        self.bias_history.clear();
        self.last_timestamp = None;
        Ok(())
    }

    /// Back to the uninitialized state, keeping the configuration.
    pub fn reset(&mut self) {
        self.eskf
            .reset(LegState::zeros(), self.config.initial_cov.clone().into());
        self.bias_history.clear();
        self.last_timestamp = None;
    }

    pub fn predict(&mut self, imu: &ImuMeasured<T>, dt: T) -> Result<(), EstimatorError> {
        self.eskf
            .propagate(imu, dt, &self.config.noise, &self.config.gravity)
    }

    pub fn update(
        &mut self,
        measurement: &ContactMeasurement<T>,
    ) -> Result<Correction<T>, EstimatorError> {
        self.eskf.update(measurement, &self.config.noise)
    }

    /// One filter cycle: predict over `dt`, then correct with `contacts`
    /// unless the policy says otherwise.
    ///
    /// Errors of the prediction are returned; a refused correction is
    /// reported as [`UpdateStatus::Rejected`] and the filter carries on with
    /// the predicted state.
    pub fn step(
        &mut self,
        imu: &ImuMeasured<T>,
        dt: T,
        contacts: Option<&ContactMeasurement<T>>,
    ) -> Result<UpdateStatus<T>, EstimatorError> {
        self.predict(imu, dt)?;

        let Some(contacts) = contacts else {
            return Ok(UpdateStatus::Skipped(SkipReason::NoMeasurement));
        };
        if self.config.correction == CorrectionPolicy::PredictOnly {
            return Ok(UpdateStatus::Skipped(SkipReason::PredictOnly));
        }

        Ok(match self.update(contacts) {
            Ok(correction) => UpdateStatus::Applied(correction),
            Err(err) => {
                warn!(%err, "contact update rejected");
                UpdateStatus::Rejected(err)
            }
        })
    }

    /// Like [`LeggedOdometry::step`], with `dt` taken from the previous
    /// timestamp. The first sample only starts the clock and returns `None`.
    pub fn step_at(
        &mut self,
        StampedImu { timestamp, imu }: &StampedImu<T>,
        contacts: Option<&ContactMeasurement<T>>,
    ) -> Result<Option<UpdateStatus<T>>, EstimatorError> {
        if !timestamp.is_finite() {
            return Err(EstimatorError::NonFinite("timestamp"));
        }
        let Some(previous) = self.last_timestamp.clone() else {
            self.last_timestamp = Some(timestamp.clone());
            return Ok(None);
        };
        if *timestamp <= previous {
            return Err(EstimatorError::NonMonotonicTimestamp {
                previous: to_f64(&previous),
                timestamp: to_f64(timestamp),
            });
        }

        let status = self.step(imu, timestamp.clone() - previous, contacts)?;
        self.last_timestamp = Some(timestamp.clone());
        Ok(Some(status))
    }

    #[inline]
    pub fn state(&self) -> &LegState<T> {
        &self.eskf.state
    }

    #[inline]
    pub fn covariance(&self) -> &Covariance<LegState<T>> {
        &self.eskf.cov
    }

    /// The nominal state flattened in the 34-vector layout.
    #[inline]
    pub fn estimate(&self) -> SVector<T, NOMINAL_DIM> {
        self.eskf.state.to_vector()
    }
}
