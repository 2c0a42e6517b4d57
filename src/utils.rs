mod macros;
pub(crate) use macros::sub_states_of;

use nalgebra::{ComplexField, Dim, Matrix, Matrix3, RawStorage, RealField, Scalar, Vector3};
use num_traits::Zero;
use simba::scalar::SupersetOf;
use std::iter::Sum;

/// Lossy conversion used when a generic scalar ends up in an error message.
#[inline]
pub(crate) fn to_f64<T: RealField>(value: &T) -> f64 {
    SupersetOf::<f64>::to_subset(value).unwrap_or(f64::NAN)
}

pub(crate) trait AllFinite {
    fn all_finite(&self) -> bool;
}

impl<T, R, C, S> AllFinite for Matrix<T, R, C, S>
where
    T: ComplexField,
    R: Dim,
    C: Dim,
    S: RawStorage<T, R, C>,
{
    #[inline]
    fn all_finite(&self) -> bool {
        self.iter().all(|x| x.is_finite())
    }
}

/// Running first and second moments of a set of 3-vectors.
pub struct VectorSquareSum<T: Scalar> {
    count: usize,
    sum: Vector3<T>,
    square_sum: Matrix3<T>,
}

impl<T> VectorSquareSum<T>
where
    T: ComplexField,
{
    /// Sample mean and (biased) covariance. `None` when no vector was summed.
    pub fn mean(&self) -> Option<(Vector3<T>, Matrix3<T>)> {
        if self.count == 0 {
            return None;
        }
        let count: T = nalgebra::convert(self.count as f64);
        let mean = &self.sum / count.clone();
        let covariance = &self.square_sum / count - &mean * mean.transpose();
        Some((mean, covariance))
    }
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.count
    }
}

impl<T> Default for VectorSquareSum<T>
where
    T: Scalar + Zero,
{
    fn default() -> Self {
        Self {
            count: 0,
            sum: Vector3::zeros(),
            square_sum: Matrix3::zeros(),
        }
    }
}

impl<'a, T> Sum<&'a Vector3<T>> for VectorSquareSum<T>
where
    T: ComplexField,
{
    fn sum<I>(iter: I) -> Self
    where
        I: Iterator<Item = &'a Vector3<T>>,
    {
        iter.fold(Self::default(), |mut acc, current| {
            acc.count += 1;
            acc.sum += current;
            acc.square_sum += current * current.transpose();
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix2, Vector3};

    #[test]
    fn test_vector_square_sum() {
        let samples = [
            Vector3::new(1.0, 0.0, 2.0),
            Vector3::new(3.0, 0.0, 2.0),
            Vector3::new(2.0, 0.0, 2.0),
        ];
        let sum: VectorSquareSum<f64> = samples.iter().sum();
        let Some((mean, covariance)) = sum.mean() else {
            panic!("three samples were summed");
        };

        assert_eq!(sum.count(), 3);
        assert_relative_eq!(mean, Vector3::new(2.0, 0.0, 2.0), epsilon = 1e-12);
        assert_relative_eq!(covariance[(0, 0)], 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(covariance[(1, 1)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(covariance[(2, 2)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_square_sum_has_no_mean() {
        let sum: VectorSquareSum<f64> = core::iter::empty::<&Vector3<f64>>().sum();
        assert!(sum.mean().is_none());
    }

    #[test]
    fn test_all_finite() {
        assert!(Matrix2::new(1.0, 2.0, 3.0, 4.0).all_finite());
        assert!(!Matrix2::new(1.0, f64::NAN, 3.0, 4.0).all_finite());
        assert!(!Vector3::new(f64::INFINITY, 0.0, 0.0).all_finite());
    }

    #[test]
    fn test_to_f64() {
        assert_eq!(to_f64(&0.25f32), 0.25);
        assert_eq!(to_f64(&-3.5f64), -3.5);
    }
}
