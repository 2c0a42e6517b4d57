use nalgebra::{Matrix3, RealField, SMatrix, Scalar, Vector3};
use tracing::trace;

use super::{
    noise::NoiseConfig,
    state::{CONTACT_COUNT, LegState, contact_offset},
};
use crate::{
    eskf::{
        Covariance, Eskf, StatePredictor, Transition,
        state::common::*,
    },
    error::EstimatorError,
    rotation::{SeriesOrder, compose_quaternions, exponential_map, rotation_series, skew_symmetric},
    utils::{AllFinite, to_f64},
};

/// One inertial sample, both quantities in the body frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuMeasured<T: Scalar> {
    /// Accelerometer reading, `f`.
    pub specific_force: Vector3<T>,
    /// Gyroscope reading, `ω`.
    pub angular_rate: Vector3<T>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StampedImu<T: Scalar> {
    pub timestamp: T,
    pub imu: ImuMeasured<T>,
}

impl<T: Scalar> ImuMeasured<T> {
    pub const fn new(specific_force: Vector3<T>, angular_rate: Vector3<T>) -> Self {
        Self {
            specific_force,
            angular_rate,
        }
    }

    pub const fn at(self, timestamp: T) -> StampedImu<T> {
        StampedImu {
            timestamp,
            imu: self,
        }
    }
}

impl<T: RealField> ImuMeasured<T> {
    /// `(f̂, ω̂)`, the readings with the current bias estimates removed.
    #[inline]
    pub fn corrected(&self, state: &LegState<T>) -> (Vector3<T>, Vector3<T>) {
        (
            &self.specific_force - &*state.accel_bias,
            &self.angular_rate - &*state.gyro_bias,
        )
    }
}

impl<T: RealField> LegState<T> {
    /// Integrates the nominal state over `dt`.
    ///
    /// ```text
    /// a = Rᵀ f̂ + g
    /// r ← r + dt v + dt²/2 a
    /// v ← v + dt a
    /// q ← Exp(dt ω̂) ⊗ q
    /// ```
    /// Contacts and biases are held.
    pub fn propagate(&mut self, imu: &ImuMeasured<T>, dt: T, gravity: &Vector3<T>) {
        let rotation = self.rotation_matrix();
        let (accel, rate) = imu.corrected(self);

        let acceleration = rotation.transpose() * accel + gravity;
        let half_dt_sq = dt.clone() * dt.clone() * nalgebra::convert::<f64, T>(0.5);

        *self.position += &*self.velocity * dt.clone() + &acceleration * half_dt_sq;
        *self.velocity += acceleration * dt.clone();

        let increment = exponential_map(&(rate * dt));
        *self.orientation = compose_quaternions(&increment, &self.unit_orientation()).into_inner();
    }
}

/// The error-state transition `F`, linearized at the state *before* propagation.
///
/// ```text
///         r      v      δφ              p    ba            bg
/// r   │   I    dt I   dt²/2 Rᵀ[f̂]×     0   -dt²/2 Rᵀ       0   │
/// v   │   0     I     dt Rᵀ[f̂]×        0   -dt Rᵀ          0   │
/// δφ  │   0     0     Γ0               0    0             -Γ1  │
/// p   │   0     0     0                I    0              0   │
/// ba  │   0     0     0                0    I              0   │
/// bg  │   0     0     0                0    0              I   │
/// ```
pub fn build_process_jacobian<T: RealField>(
    rotation: &Matrix3<T>,
    corrected_accel: &Vector3<T>,
    corrected_rate: &Vector3<T>,
    dt: T,
) -> Covariance<LegState<T>> {
    let mut fx = Covariance::<LegState<T>>(SMatrix::identity());

    let rotation_t = rotation.transpose();
    let rotated_skew_accel = &rotation_t * skew_symmetric(corrected_accel);
    let half_dt_sq = dt.clone() * dt.clone() * nalgebra::convert::<f64, T>(0.5);

    fx.sensitivity_mut::<VelocityState<T>, PositionState<T>>()
        .fill_diagonal(dt.clone());
    fx.sensitivity_mut::<OrientationState<T>, PositionState<T>>()
        .copy_from(&(&rotated_skew_accel * half_dt_sq.clone()));
    fx.sensitivity_mut::<AccelBiasState<T>, PositionState<T>>()
        .copy_from(&(&rotation_t * -half_dt_sq));

    fx.sensitivity_mut::<OrientationState<T>, VelocityState<T>>()
        .copy_from(&(rotated_skew_accel * dt.clone()));
    fx.sensitivity_mut::<AccelBiasState<T>, VelocityState<T>>()
        .copy_from(&(rotation_t * -dt.clone()));

    fx.sub_covariance_mut::<OrientationState<T>>()
        .copy_from(&rotation_series(corrected_rate, dt.clone(), SeriesOrder::Zeroth));
    fx.sensitivity_mut::<GyroBiasState<T>, OrientationState<T>>()
        .copy_from(&-rotation_series(corrected_rate, dt, SeriesOrder::First));

    fx
}

/// The discretized process noise `Q`.
///
/// ```text
/// Q_rr   = dt³/3 Qf + dt⁵/20 Qba        Q_rv = Q_vr = dt²/2 Qf + dt⁴/8 Qba
/// Q_vv   = dt Qf + dt³/3 Qba
/// Q_rba  = -dt³/6 Rᵀ Qba                Q_vba = -dt²/2 Rᵀ Qba
/// Q_φφ   = dt Qω + (Γ3 + Γ3ᵀ) Qbg       Q_φbg = -Γ2 Qbg
/// Q_pipi = dt Rᵀ Qp R
/// Q_baba = dt Qba                       Q_bgbg = dt Qbg
/// ```
/// Every off-diagonal block is mirrored, so `Q` is symmetric.
pub fn build_process_noise<T: RealField>(
    rotation: &Matrix3<T>,
    corrected_rate: &Vector3<T>,
    dt: T,
    noise: &NoiseConfig<T>,
) -> Covariance<LegState<T>> {
    let mut q = Covariance::<LegState<T>>::default();

    let c = |x: f64| nalgebra::convert::<f64, T>(x);
    let dt2 = dt.clone().powi(2);
    let dt3 = dt.clone().powi(3);
    let dt4 = dt.clone().powi(4);
    let dt5 = dt.clone().powi(5);

    let accel = &noise.accel;
    let accel_bias = &noise.accel_bias;
    let rotation_t = rotation.transpose();

    q.sub_covariance_mut::<PositionState<T>>()
        .copy_from(&(accel * (dt3.clone() / c(3.0)) + accel_bias * (dt5 / c(20.0))));
    let position_velocity = accel * (dt2.clone() / c(2.0)) + accel_bias * (dt4 / c(8.0));
    q.sensitivity_mut::<VelocityState<T>, PositionState<T>>()
        .copy_from(&position_velocity);
    q.sensitivity_mut::<PositionState<T>, VelocityState<T>>()
        .copy_from(&position_velocity.transpose());
    q.sub_covariance_mut::<VelocityState<T>>()
        .copy_from(&(accel * dt.clone() + accel_bias * (dt3.clone() / c(3.0))));

    let position_accel_bias = &rotation_t * accel_bias * -(dt3 / c(6.0));
    q.sensitivity_mut::<AccelBiasState<T>, PositionState<T>>()
        .copy_from(&position_accel_bias);
    q.sensitivity_mut::<PositionState<T>, AccelBiasState<T>>()
        .copy_from(&position_accel_bias.transpose());
    let velocity_accel_bias = &rotation_t * accel_bias * -(dt2 / c(2.0));
    q.sensitivity_mut::<AccelBiasState<T>, VelocityState<T>>()
        .copy_from(&velocity_accel_bias);
    q.sensitivity_mut::<VelocityState<T>, AccelBiasState<T>>()
        .copy_from(&velocity_accel_bias.transpose());

    let gamma3 = rotation_series(corrected_rate, dt.clone(), SeriesOrder::Third);
    q.sub_covariance_mut::<OrientationState<T>>().copy_from(
        &(&noise.gyro * dt.clone() + (&gamma3 + gamma3.transpose()) * &noise.gyro_bias),
    );
    let orientation_gyro_bias =
        -rotation_series(corrected_rate, dt.clone(), SeriesOrder::Second) * &noise.gyro_bias;
    q.sensitivity_mut::<GyroBiasState<T>, OrientationState<T>>()
        .copy_from(&orientation_gyro_bias);
    q.sensitivity_mut::<OrientationState<T>, GyroBiasState<T>>()
        .copy_from(&orientation_gyro_bias.transpose());

    let contact = &rotation_t * &noise.contact * rotation * dt.clone();
    for leg in 0..CONTACT_COUNT {
        let offset = contact_offset::<T>(leg);
        q.fixed_view_mut::<3, 3>(offset, offset).copy_from(&contact);
    }

    q.sub_covariance_mut::<AccelBiasState<T>>()
        .copy_from(&(accel_bias * dt.clone()));
    q.sub_covariance_mut::<GyroBiasState<T>>()
        .copy_from(&(&noise.gyro_bias * dt));

    q
}

impl<T: RealField> Eskf<LegState<T>> {
    /// Propagates the nominal state and the error covariance over one
    /// inertial sample of length `dt`.
    ///
    /// The filter is left untouched when an error is returned.
    pub fn propagate(
        &mut self,
        imu: &ImuMeasured<T>,
        dt: T,
        noise: &NoiseConfig<T>,
        gravity: &Vector3<T>,
    ) -> Result<(), EstimatorError> {
        if !(dt.is_finite() && dt > T::zero()) {
            return Err(EstimatorError::InvalidTimeStep { dt: to_f64(&dt) });
        }
        if !(imu.specific_force.all_finite() && imu.angular_rate.all_finite()) {
            return Err(EstimatorError::NonFinite("inertial measurement"));
        }
        if !self.state.is_initialized() {
            return Err(EstimatorError::Uninitialized);
        }

        let rotation = self.state.rotation_matrix();
        let (accel, rate) = imu.corrected(&self.state);

        let transition = Transition {
            jacobian: build_process_jacobian(&rotation, &accel, &rate, dt.clone()).0,
            noise: build_process_noise(&rotation, &rate, dt.clone(), noise).0,
        };

        self.state.propagate(imu, dt, gravity);
        StatePredictor::predict(self, transition);

        trace!(
            position = ?self.state.position.0,
            velocity = ?self.state.velocity.0,
            cov_trace = to_f64(&self.cov.trace()),
            "predicted"
        );
        Ok(())
    }
}
