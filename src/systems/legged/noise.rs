use nalgebra::{Matrix3, RealField};

use crate::{error::ConfigError, utils::AllFinite};

/// Continuous-time noise densities of the sensors and the random walks.
///
/// All matrices are covariances in the frame of the quantity they perturb,
/// `accel` and `gyro` in the body frame, `contact` in the body frame before
/// being rotated into the world by the process model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NoiseConfig<T: nalgebra::Scalar> {
    /// Accelerometer white noise, `Qf`.
    pub accel: Matrix3<T>,
    /// Accelerometer bias random walk, `Qba`.
    pub accel_bias: Matrix3<T>,
    /// Gyroscope white noise, `Qω`.
    pub gyro: Matrix3<T>,
    /// Gyroscope bias random walk, `Qbg`.
    pub gyro_bias: Matrix3<T>,
    /// Drift of a contact point that is not perfectly stationary, `Qp`.
    pub contact: Matrix3<T>,
    /// Forward-kinematics model error added to every contact measurement.
    pub forward_kinematics: Matrix3<T>,
    /// Joint encoder variance, shared by every joint.
    pub encoder: T,
}

impl<T: RealField> NoiseConfig<T> {
    /// Every matrix set to `variance * I`.
    pub fn isotropic(variance: T) -> Self {
        let diagonal = Matrix3::identity() * variance.clone();
        Self {
            accel: diagonal.clone(),
            accel_bias: diagonal.clone(),
            gyro: diagonal.clone(),
            gyro_bias: diagonal.clone(),
            contact: diagonal.clone(),
            forward_kinematics: diagonal,
            encoder: variance,
        }
    }

    /// Checks that every covariance is finite, symmetric and has a
    /// positive diagonal, and that the encoder variance is not negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        [
            (&self.accel, "accel noise"),
            (&self.accel_bias, "accel bias noise"),
            (&self.gyro, "gyro noise"),
            (&self.gyro_bias, "gyro bias noise"),
            (&self.contact, "contact noise"),
            (&self.forward_kinematics, "forward kinematics noise"),
        ]
        .into_iter()
        .try_for_each(|(matrix, name)| validate_covariance(matrix, name))?;

        if !self.encoder.is_finite() {
            return Err(ConfigError::NonFinite("encoder noise"));
        }
        if self.encoder < T::zero() {
            return Err(ConfigError::Negative("encoder noise"));
        }
        Ok(())
    }
}

impl<T: RealField> Default for NoiseConfig<T> {
    fn default() -> Self {
        let small = Matrix3::identity() * nalgebra::convert::<f64, T>(0.01);
        let tiny = Matrix3::identity() * nalgebra::convert::<f64, T>(0.001);
        Self {
            accel: small.clone(),
            accel_bias: tiny.clone(),
            gyro: small.clone(),
            gyro_bias: tiny,
            contact: small.clone(),
            forward_kinematics: small,
            encoder: nalgebra::convert(0.01),
        }
    }
}

pub(crate) fn validate_covariance<T: RealField>(
    matrix: &Matrix3<T>,
    name: &'static str,
) -> Result<(), ConfigError> {
    if !matrix.all_finite() {
        return Err(ConfigError::NonFinite(name));
    }
    let tolerance = nalgebra::convert::<f64, T>(1e-9) * (T::one() + matrix.amax());
    if (matrix - matrix.transpose()).amax() > tolerance {
        return Err(ConfigError::NotSymmetric(name));
    }
    if matrix.diagonal().iter().any(|x| *x <= T::zero()) {
        return Err(ConfigError::NotPositive(name));
    }
    Ok(())
}
