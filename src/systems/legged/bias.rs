use nalgebra::{RealField, Scalar, Vector3};
use tracing::{debug, warn};

use crate::utils::VectorSquareSum;

/// One bias observation collected before initialization, usually while the
/// robot stands still.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasSample<T: Scalar> {
    pub accel: Vector3<T>,
    pub gyro: Vector3<T>,
}

impl<T: Scalar> BiasSample<T> {
    pub const fn new(accel: Vector3<T>, gyro: Vector3<T>) -> Self {
        Self { accel, gyro }
    }
}

/// How the recorded history is turned into the initial bias estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BiasSeeding {
    /// Per-axis sample mean of the whole history.
    #[default]
    Mean,
    /// The `x` component of the first sample, repeated on all three axes.
    ///
    /// Kept for bit-exact parity with existing recordings.
    RepeatFirstScalar,
}

/// Bias samples accumulated until the filter is initialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BiasHistory<T: Scalar> {
    samples: Vec<BiasSample<T>>,
}

impl<T: Scalar> BiasHistory<T> {
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    #[inline]
    pub fn push(&mut self, sample: BiasSample<T>) {
        self.samples.push(sample);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn samples(&self) -> &[BiasSample<T>] {
        &self.samples
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl<T: RealField> BiasHistory<T> {
    /// The `(accel, gyro)` bias seeds. An empty history seeds zero biases.
    pub fn seed(&self, seeding: BiasSeeding) -> (Vector3<T>, Vector3<T>) {
        let Some(first) = self.samples.first() else {
            warn!("no bias samples were recorded, seeding zero biases");
            return (Vector3::zeros(), Vector3::zeros());
        };

        match seeding {
            BiasSeeding::RepeatFirstScalar => (
                Vector3::repeat(first.accel.x.clone()),
                Vector3::repeat(first.gyro.x.clone()),
            ),
            BiasSeeding::Mean => {
                let accel = self
                    .samples
                    .iter()
                    .map(|sample| &sample.accel)
                    .sum::<VectorSquareSum<T>>();
                let gyro = self
                    .samples
                    .iter()
                    .map(|sample| &sample.gyro)
                    .sum::<VectorSquareSum<T>>();

                // the history is not empty, so both means exist
                let (Some((accel_mean, accel_cov)), Some((gyro_mean, gyro_cov))) =
                    (accel.mean(), gyro.mean())
                else {
                    return (Vector3::zeros(), Vector3::zeros());
                };
                debug!(
                    samples = accel.count(),
                    accel_spread = ?accel_cov.diagonal(),
                    gyro_spread = ?gyro_cov.diagonal(),
                    "bias seeded from the sample mean"
                );
                (accel_mean, gyro_mean)
            }
        }
    }
}

impl<T: Scalar> FromIterator<BiasSample<T>> for BiasHistory<T> {
    fn from_iter<I: IntoIterator<Item = BiasSample<T>>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

impl<T: Scalar> Extend<BiasSample<T>> for BiasHistory<T> {
    fn extend<I: IntoIterator<Item = BiasSample<T>>>(&mut self, iter: I) {
        self.samples.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn history() -> BiasHistory<f64> {
        [
            BiasSample::new(Vector3::new(0.1, 0.2, 0.3), Vector3::new(0.01, 0.0, -0.01)),
            BiasSample::new(Vector3::new(0.3, 0.0, 0.1), Vector3::new(0.03, 0.02, -0.03)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_mean_seeding() {
        let (accel, gyro) = history().seed(BiasSeeding::Mean);
        assert_relative_eq!(accel, Vector3::new(0.2, 0.1, 0.2), epsilon = 1e-12);
        assert_relative_eq!(gyro, Vector3::new(0.02, 0.01, -0.02), epsilon = 1e-12);
    }

    #[test]
    fn test_repeat_first_scalar_seeding() {
        let (accel, gyro) = history().seed(BiasSeeding::RepeatFirstScalar);
        assert_eq!(accel, Vector3::repeat(0.1));
        assert_eq!(gyro, Vector3::repeat(0.01));
    }

    #[test]
    fn test_empty_history_seeds_zero() {
        let history = BiasHistory::<f64>::new();
        assert!(history.is_empty());
        assert_eq!(
            history.seed(BiasSeeding::Mean),
            (Vector3::zeros(), Vector3::zeros())
        );
        assert_eq!(
            history.seed(BiasSeeding::RepeatFirstScalar),
            (Vector3::zeros(), Vector3::zeros())
        );
    }

    #[test]
    fn test_extend_and_clear() {
        let mut history = history();
        history.extend([BiasSample::new(Vector3::zeros(), Vector3::zeros())]);
        assert_eq!(history.len(), 3);
        assert_eq!(history.samples()[1].accel, Vector3::new(0.3, 0.0, 0.1));
        assert_eq!(
            history.samples().last(),
            Some(&BiasSample::new(Vector3::zeros(), Vector3::zeros()))
        );
        history.clear();
        assert!(history.is_empty());
    }
}
