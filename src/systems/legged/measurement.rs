use nalgebra::{DMatrix, Matrix3, Matrix3xX, Matrix4, RealField, SMatrix, SVector, Scalar};
use tracing::debug;

use super::{
    noise::NoiseConfig,
    state::{CONTACT_COUNT, LegState, contact_offset, pose_translation},
};
use crate::{
    eskf::{
        Eskf, Observation, StateObserver,
        state::{common::*, offset_of},
    },
    error::EstimatorError,
    rotation::skew_symmetric,
    utils::{AllFinite, to_f64},
};

/// Rows of the stacked contact measurement.
pub const MEASUREMENT_DIM: usize = 3 * CONTACT_COUNT;

/// Error-state dimension of [`LegState`].
const ERROR_DIM: usize = 33;

pub type MeasurementResidual<T> = SVector<T, MEASUREMENT_DIM>;
pub type MeasurementJacobian<T> = SMatrix<T, MEASUREMENT_DIM, ERROR_DIM>;
pub type MeasurementNoise<T> = SMatrix<T, MEASUREMENT_DIM, MEASUREMENT_DIM>;

/// Contact poses from forward kinematics, one per limb in the body frame,
/// with the kinematic jacobians that carry encoder noise into them.
///
/// Only the translation of each pose is measured.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactMeasurement<T: Scalar> {
    poses: [Matrix4<T>; CONTACT_COUNT],
    /// `3 x joints` per limb.
    jacobians: [Matrix3xX<T>; CONTACT_COUNT],
}

impl<T: RealField> ContactMeasurement<T> {
    pub fn new(
        poses: [Matrix4<T>; CONTACT_COUNT],
        jacobians: [Matrix3xX<T>; CONTACT_COUNT],
    ) -> Result<Self, EstimatorError> {
        if !poses.iter().all(AllFinite::all_finite) {
            return Err(EstimatorError::NonFinite("contact poses"));
        }
        if !jacobians.iter().all(AllFinite::all_finite) {
            return Err(EstimatorError::NonFinite("contact jacobians"));
        }
        Ok(Self { poses, jacobians })
    }

    /// Builds a measurement from runtime sized inputs, checking the number of
    /// limbs and the shape of every jacobian.
    pub fn from_slices(
        poses: &[Matrix4<T>],
        jacobians: &[DMatrix<T>],
    ) -> Result<Self, EstimatorError> {
        let poses: [Matrix4<T>; CONTACT_COUNT] =
            poses
                .to_vec()
                .try_into()
                .map_err(|poses: Vec<_>| EstimatorError::ContactCount {
                    expected: CONTACT_COUNT,
                    found: poses.len(),
                })?;
        if jacobians.len() != CONTACT_COUNT {
            return Err(EstimatorError::JacobianCount {
                expected: CONTACT_COUNT,
                found: jacobians.len(),
            });
        }
        if let Some((contact, jacobian)) = jacobians
            .iter()
            .enumerate()
            .find(|(_, jacobian)| jacobian.nrows() != 3)
        {
            return Err(EstimatorError::JacobianShape {
                contact,
                rows: jacobian.nrows(),
            });
        }
        let jacobians = std::array::from_fn(|leg| jacobians[leg].fixed_rows::<3>(0).into_owned());

        Self::new(poses, jacobians)
    }

    #[inline]
    pub fn poses(&self) -> &[Matrix4<T>; CONTACT_COUNT] {
        &self.poses
    }

    #[inline]
    pub fn jacobians(&self) -> &[Matrix3xX<T>; CONTACT_COUNT] {
        &self.jacobians
    }
}

/// `y_i = z_i - R (p_i - r)`, stacked per limb.
pub fn measurement_residual<T: RealField>(
    state: &LegState<T>,
    rotation: &Matrix3<T>,
    poses: &[Matrix4<T>; CONTACT_COUNT],
) -> MeasurementResidual<T> {
    let mut residual = MeasurementResidual::zeros();
    for (leg, pose) in poses.iter().enumerate() {
        residual
            .fixed_rows_mut::<3>(3 * leg)
            .copy_from(&(pose_translation(pose) - state.body_contact(rotation, leg)));
    }
    residual
}

/// The measurement jacobian `H`.
///
/// ```text
///          r     v    δφ                p_i   ba   bg
/// y_i  │  -R     0   -[R(p_i - r)]×     R     0    0  │
/// ```
pub fn build_measurement_jacobian<T: RealField>(
    state: &LegState<T>,
    rotation: &Matrix3<T>,
) -> MeasurementJacobian<T> {
    let mut h = MeasurementJacobian::zeros();

    let position = offset_of::<PositionState<T>, LegState<T>>();
    let orientation = offset_of::<OrientationState<T>, LegState<T>>();
    let negative_rotation = -rotation;

    for leg in 0..CONTACT_COUNT {
        let row = 3 * leg;
        h.fixed_view_mut::<3, 3>(row, position)
            .copy_from(&negative_rotation);
        h.fixed_view_mut::<3, 3>(row, orientation)
            .copy_from(&-skew_symmetric(&state.body_contact(rotation, leg)));
        h.fixed_view_mut::<3, 3>(row, contact_offset::<T>(leg))
            .copy_from(rotation);
    }
    h
}

/// Block diagonal `R` with `R_i = Q_fk + J_i σ_enc J_iᵀ`.
pub fn build_measurement_noise<T: RealField>(
    jacobians: &[Matrix3xX<T>; CONTACT_COUNT],
    noise: &NoiseConfig<T>,
) -> MeasurementNoise<T> {
    let mut r = MeasurementNoise::zeros();
    for (leg, jacobian) in jacobians.iter().enumerate() {
        let block = &noise.forward_kinematics
            + jacobian * jacobian.transpose() * noise.encoder.clone();
        r.fixed_view_mut::<3, 3>(3 * leg, 3 * leg).copy_from(&block);
    }
    r
}

/// The outcome of an applied update.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction<T: Scalar> {
    /// `δx`, already injected into the nominal state.
    pub error_state: SVector<T, ERROR_DIM>,
    pub residual: MeasurementResidual<T>,
    /// Covariance trace before and after the update.
    pub trace_before: T,
    pub trace_after: T,
}

impl<T: RealField> Eskf<LegState<T>> {
    /// Fuses one contact measurement into the predicted state.
    ///
    /// The filter is left untouched when an error is returned.
    pub fn update(
        &mut self,
        measurement: &ContactMeasurement<T>,
        noise: &NoiseConfig<T>,
    ) -> Result<Correction<T>, EstimatorError> {
        if !self.state.is_initialized() {
            return Err(EstimatorError::Uninitialized);
        }

        let rotation = self.state.rotation_matrix();
        let residual = measurement_residual(&self.state, &rotation, &measurement.poses);
        let observation = Observation {
            residual: residual.clone(),
            model: build_measurement_jacobian(&self.state, &rotation),
            noise: build_measurement_noise(&measurement.jacobians, noise),
        };

        let trace_before = self.cov.trace();
        let error_state = self.observe(observation)?;
        let trace_after = self.cov.trace();

        debug!(
            residual_norm = to_f64(&residual.norm()),
            correction_norm = to_f64(&error_state.norm()),
            trace_before = to_f64(&trace_before),
            trace_after = to_f64(&trace_after),
            "contact update applied"
        );

        Ok(Correction {
            error_state,
            residual,
            trace_before,
            trace_after,
        })
    }
}
