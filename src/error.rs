use thiserror::Error;

/// Errors reported by the estimator.
///
/// None of them is terminal: after a rejected call the filter keeps its last
/// good state and accepts the next cycle's measurements.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimatorError {
    #[error("the estimator has not been initialized")]
    Uninitialized,

    #[error("the estimator is already initialized, reset it first")]
    AlreadyInitialized,

    #[error("invalid time step {dt}, expected a finite positive interval")]
    InvalidTimeStep { dt: f64 },

    #[error("timestamp {timestamp} does not advance past {previous}")]
    NonMonotonicTimestamp { previous: f64, timestamp: f64 },

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("expected {expected} contact poses, found {found}")]
    ContactCount { expected: usize, found: usize },

    #[error("expected {expected} contact jacobians, found {found}")]
    JacobianCount { expected: usize, found: usize },

    #[error("jacobian of contact {contact} has {rows} rows, expected 3")]
    JacobianShape { contact: usize, rows: usize },

    #[error(
        "innovation covariance is singular or ill-conditioned \
         (reciprocal condition estimate {reciprocal_condition:e})"
    )]
    SingularInnovation { reciprocal_condition: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Errors found while validating a [`Config`](crate::systems::legged::Config).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{0} must be finite")]
    NonFinite(&'static str),

    #[error("{0} must be symmetric")]
    NotSymmetric(&'static str),

    #[error("{0} must have a positive diagonal")]
    NotPositive(&'static str),

    #[error("{0} must not be negative")]
    Negative(&'static str),
}
