//! Error‑State Kalman Filter.

use core::ops::{AddAssign, Deref, DerefMut};

use nalgebra::{
    Cholesky, Const, DefaultAllocator, RealField, SMatrix, SVector, Scalar, allocator::Allocator,
};

mod covariance;
pub mod state;
pub use covariance::Covariance;
pub mod uncertain;

use state::KFState;
use uncertain::Uncertained;

use crate::{
    error::EstimatorError,
    utils::{AllFinite, to_f64},
};

pub struct Eskf<S>
where
    S: KFState,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    uncertainty: Uncertained<S>,
    /// Smallest accepted reciprocal condition estimate of the innovation
    /// covariance. Observations below it are rejected.
    pub min_innovation_rcond: S::Element,
}

pub trait StatePredictor<T> {
    fn predict(&mut self, transition: T);
}

pub trait StateObserver<T> {
    type Output;
    type Error;

    fn observe(&mut self, measurement: T) -> Result<Self::Output, Self::Error>;
}

/// Linearized one-step propagation of the error state.
#[derive(Debug, Clone)]
pub struct Transition<T: Scalar, const N: usize> {
    /// The state transition jacobian `F`.
    pub jacobian: SMatrix<T, N, N>,
    /// The discretized process noise `Q`.
    pub noise: SMatrix<T, N, N>,
}

/// A linearized observation of the error state.
#[derive(Debug, Clone)]
pub struct Observation<T: Scalar, const M: usize, const N: usize> {
    /// The innovation, measurement minus its prediction.
    pub residual: SVector<T, M>,
    /// The measurement jacobian, which maps the error state to the measurement frame.
    pub model: SMatrix<T, M, N>,
    /// The measurement noise covariance, larger means more uncertain.
    pub noise: SMatrix<T, M, M>,
}

impl<S> Eskf<S>
where
    S: KFState,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    pub fn new_with_cov(state: S, cov: Covariance<S>, min_innovation_rcond: S::Element) -> Self {
        Self {
            uncertainty: Uncertained { state, cov },
            min_innovation_rcond,
        }
    }

    /// Replaces both the nominal state and its covariance.
    pub fn reset(&mut self, state: S, cov: Covariance<S>) {
        self.uncertainty = Uncertained { state, cov };
    }
}

impl<S, T, const N: usize> StatePredictor<Transition<T, N>> for Eskf<S>
where
    T: RealField,
    S: KFState<Element = T, Dim = Const<N>>,
{
    fn predict(&mut self, Transition { jacobian, noise }: Transition<T, N>) {
        // X = F.X.F' + Q
        let mut cov = noise;
        cov.quadform_tr(T::one(), &jacobian, self.cov.deref(), T::one());
        self.cov.0 = cov;
        self.cov.symmetrize();
    }
}

impl<S, T, const M: usize, const N: usize> StateObserver<Observation<T, M, N>> for Eskf<S>
where
    T: RealField,
    S: KFState<Element = T, Dim = Const<N>> + AddAssign<SVector<T, N>>,
{
    /// The error-state correction injected into the nominal state.
    type Output = SVector<T, N>;
    type Error = EstimatorError;

    fn observe(
        &mut self,
        Observation {
            residual,
            model,
            noise,
        }: Observation<T, M, N>,
    ) -> Result<Self::Output, Self::Error> {
        if !(residual.all_finite() && model.all_finite() && noise.all_finite()) {
            return Err(EstimatorError::NonFinite("observation"));
        }

        let cov: &SMatrix<T, N, N> = self.cov.deref();

        let cross_cov = cov * model.transpose();
        let innovation_cov = {
            let hpht_r = &model * &cross_cov + &noise;
            (hpht_r.transpose() + &hpht_r) * nalgebra::convert::<f64, T>(0.5)
        };

        let max_diagonal = (0..M)
            .map(|i| innovation_cov[(i, i)].clone())
            .fold(T::zero(), |acc, x| acc.max(x));

        let Some(cholesky) = Cholesky::new(innovation_cov) else {
            return Err(EstimatorError::SingularInnovation {
                reciprocal_condition: 0.0,
            });
        };

        // the smallest squared pivot bounds the smallest eigenvalue from above
        let lower = cholesky.l_dirty();
        let min_pivot = (0..M)
            .map(|i| lower[(i, i)].clone() * lower[(i, i)].clone())
            .fold(max_diagonal.clone(), |acc, x| acc.min(x));
        let reciprocal_condition = min_pivot / max_diagonal;
        if !(reciprocal_condition >= self.min_innovation_rcond) {
            return Err(EstimatorError::SingularInnovation {
                reciprocal_condition: to_f64(&reciprocal_condition),
            });
        }

        // K = P.H'.S^-1, solved as K' = S^-1.(P.H')'
        let kalman_gain = cholesky.solve(&cross_cov.transpose()).transpose();
        let correction = &kalman_gain * &residual;
        if !correction.all_finite() {
            return Err(EstimatorError::NonFinite("state correction"));
        }

        // Joseph form, (I - K.H).X.(I - K.H)' + K.R.K'
        let i_kh = SMatrix::<T, N, N>::identity() - &kalman_gain * &model;
        let mut updated = &kalman_gain * &noise * kalman_gain.transpose();
        updated.quadform_tr(T::one(), &i_kh, cov, T::one());

        self.cov.0 = updated;
        self.cov.symmetrize();
        self.state += correction.clone();

        Ok(correction)
    }
}

impl<S> Deref for Eskf<S>
where
    S: KFState,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    type Target = Uncertained<S>;

    fn deref(&self) -> &Self::Target {
        &self.uncertainty
    }
}

impl<S> DerefMut for Eskf<S>
where
    S: KFState,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.uncertainty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eskf::state::common::PositionState;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    type TestT = f64;

    fn position_eskf(cov: Matrix3<TestT>) -> Eskf<PositionState<TestT>> {
        Eskf::new_with_cov(
            PositionState::new(Vector3::zeros()),
            Covariance(cov),
            1e-12,
        )
    }

    fn direct_observation(residual: Vector3<TestT>, noise: TestT) -> Observation<TestT, 3, 3> {
        Observation {
            residual,
            model: Matrix3::identity(),
            noise: Matrix3::identity() * noise,
        }
    }

    #[test]
    fn test_predict_propagates_covariance() {
        let mut eskf = position_eskf(Matrix3::identity());
        let jacobian = Matrix3::new(1.0, 0.5, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);

        eskf.predict(Transition {
            jacobian,
            noise: Matrix3::identity() * 0.1,
        });

        let expected = jacobian * jacobian.transpose() + Matrix3::identity() * 0.1;
        assert_relative_eq!(*eskf.cov, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_direct_observation() {
        let mut eskf = position_eskf(Matrix3::identity());

        let correction = eskf
            .observe(direct_observation(Vector3::new(2.0, 0.0, -4.0), 1.0))
            .expect("well conditioned observation");

        assert_relative_eq!(correction, Vector3::new(1.0, 0.0, -2.0), epsilon = 1e-12);
        assert_relative_eq!(*eskf.state, Vector3::new(1.0, 0.0, -2.0), epsilon = 1e-12);
        assert_relative_eq!(*eskf.cov, Matrix3::identity() * 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_innovation_is_rejected() {
        let mut eskf = position_eskf(Matrix3::zeros());

        let result = eskf.observe(direct_observation(Vector3::new(1.0, 1.0, 1.0), 0.0));

        assert!(matches!(
            result,
            Err(EstimatorError::SingularInnovation { .. })
        ));
        assert_eq!(*eskf.state, Vector3::zeros());
        assert_eq!(*eskf.cov, Matrix3::zeros());
    }

    #[test]
    fn test_ill_conditioned_innovation_is_rejected() {
        let mut eskf = position_eskf(Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 0.0)));
        eskf.min_innovation_rcond = 1e-6;

        let result = eskf.observe(direct_observation(Vector3::new(1.0, 1.0, 1.0), 1e-9));

        assert!(matches!(
            result,
            Err(EstimatorError::SingularInnovation { .. })
        ));
    }

    #[test]
    fn test_non_finite_observation_is_rejected() {
        let mut eskf = position_eskf(Matrix3::identity());

        let result = eskf.observe(direct_observation(Vector3::new(f64::NAN, 0.0, 0.0), 1.0));

        assert_eq!(result, Err(EstimatorError::NonFinite("observation")));
        assert_eq!(*eskf.cov, Matrix3::identity());
    }
}
