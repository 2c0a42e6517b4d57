pub mod marker;

use std::{
    marker::PhantomData,
    ops::{AddAssign, Deref, DerefMut},
};

use nalgebra::{
    ClosedAddAssign, Quaternion, RealField, Scalar, Storage, U3, UnitQuaternion, Vector, Vector3,
};

use crate::rotation::{compose_quaternions, exponential_map};

/// A value tagged with a marker, so that equal storage types can still be
/// told apart as distinct sub-states.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkedState<S, M>(pub S, PhantomData<M>);

impl<S, M> MarkedState<S, M> {
    #[inline]
    pub const fn new(inner: S) -> Self {
        Self(inner, PhantomData)
    }

    #[inline]
    pub fn into_inner(self) -> S {
        self.0
    }
}

impl<S: Default, M> Default for MarkedState<S, M> {
    fn default() -> Self {
        Self(S::default(), PhantomData)
    }
}

impl<S, M> Deref for MarkedState<S, M> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S, M> DerefMut for MarkedState<S, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

pub type Vector3State<T, M> = MarkedState<Vector3<T>, M>;

pub type PositionState<T> = Vector3State<T, marker::Position>;
pub type VelocityState<T> = Vector3State<T, marker::Velocity>;
pub type AccelBiasState<T> = Vector3State<T, marker::AccelBias>;
pub type GyroBiasState<T> = Vector3State<T, marker::GyroBias>;

/// Orientation stored as a raw quaternion, scalar first when flattened.
///
/// Its error is the rotation vector `δφ` with `q_true = Exp(δφ) ⊗ q`.
/// The all-zero quaternion is a valid *stored* value and marks a state that
/// has not been initialized yet.
pub type OrientationState<T> = MarkedState<Quaternion<T>, marker::Orientation>;

impl<T: Scalar, M> super::KFState for Vector3State<T, M> {
    type Element = T;
    type Dim = U3;
}

impl<T, S, M> AddAssign<Vector<T, U3, S>> for Vector3State<T, M>
where
    T: Scalar + ClosedAddAssign,
    S: Storage<T, U3>,
{
    fn add_assign(&mut self, rhs: Vector<T, U3, S>) {
        self.0 += rhs;
    }
}

impl<T: Scalar> super::KFState for OrientationState<T> {
    type Element = T;
    type Dim = U3;
}

impl<T: RealField> OrientationState<T> {
    /// The normalized orientation.
    #[inline]
    pub fn unit(&self) -> UnitQuaternion<T> {
        UnitQuaternion::new_normalize(self.0.clone())
    }

    #[inline]
    pub fn identity() -> Self {
        Self::new(Quaternion::identity())
    }
}

impl<T, S> AddAssign<Vector<T, U3, S>> for OrientationState<T>
where
    T: RealField,
    S: Storage<T, U3>,
{
    /// Left-composes the rotation increment, `q ← Exp(δφ) ⊗ q`.
    fn add_assign(&mut self, rhs: Vector<T, U3, S>) {
        let delta = exponential_map(&rhs.into_owned());
        self.0 = compose_quaternions(&delta, &self.unit()).into_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vector3_state_add_assign() {
        let mut position = PositionState::new(Vector3::new(1.0, 2.0, 3.0));
        position += Vector3::new(0.5, -2.0, 1.0);
        assert_eq!(*position, Vector3::new(1.5, 0.0, 4.0));
    }

    #[test]
    fn test_orientation_injection_is_left_multiplicative() {
        let start = UnitQuaternion::from_euler_angles(0.2, -0.3, 0.1);
        let delta = Vector3::new(0.01, 0.02, -0.03);

        let mut orientation = OrientationState::new(start.into_inner());
        orientation += delta;

        let expected = exponential_map(&delta) * start;
        assert_relative_eq!(orientation.unit(), expected, epsilon = 1e-12);
        assert_relative_eq!(orientation.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_orientation_injection_keeps_orientation() {
        let mut orientation = OrientationState::<f64>::identity();
        orientation += Vector3::zeros();
        assert_relative_eq!(orientation.unit(), UnitQuaternion::identity(), epsilon = 1e-15);
    }
}
