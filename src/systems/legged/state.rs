use std::ops::AddAssign;

use nalgebra::{
    Matrix3, Matrix4, Quaternion, RealField, SVector, Scalar, Storage, U0, U3, U6, U9, U18, U27,
    U30, U33, UnitQuaternion, Vector, Vector3, Vector4,
};
use num_traits::Zero;

use crate::{
    eskf::{
        Covariance,
        state::{
            KFState, offset_of,
            common::{marker, *},
        },
    },
    rotation::{quaternion_from_wxyz, quaternion_to_rotation_matrix, quaternion_to_wxyz},
    utils::sub_states_of,
};

/// Number of limbs, and therefore of tracked contact points.
pub const CONTACT_COUNT: usize = 6;

/// Number of scalars in the nominal state vector.
pub const NOMINAL_DIM: usize = 34;

pub const NOMINAL_POSITION_OFFSET: usize = 0;
pub const NOMINAL_VELOCITY_OFFSET: usize = 3;
/// Scalar-first quaternion, `(w, x, y, z)`.
pub const NOMINAL_ORIENTATION_OFFSET: usize = 6;
pub const NOMINAL_CONTACTS_OFFSET: usize = 10;
pub const NOMINAL_ACCEL_BIAS_OFFSET: usize = 28;
pub const NOMINAL_GYRO_BIAS_OFFSET: usize = 31;

/// The stacked world-frame positions of all contact points.
pub type ContactsState<T> = MarkedState<[Vector3<T>; CONTACT_COUNT], marker::Contacts>;

/// The nominal state of a six-legged body.
///
/// # Layout
/// ```text
/// nominal (34)  │ r 0..3 │ v 3..6 │ q 6..10  │ p 10..28 │ ba 28..31 │ bg 31..34 │
/// error   (33)  │ r 0..3 │ v 3..6 │ δφ 6..9  │ p 9..27  │ ba 27..30 │ bg 30..33 │
/// ```
/// Error-state offsets are carried by the [`SubStateOf`](crate::eskf::state::SubStateOf)
/// impls below, nominal offsets by the `NOMINAL_*` constants.
#[derive(Debug, Clone, PartialEq)]
pub struct LegState<T: Scalar> {
    /// Body origin in the world frame.
    pub position: PositionState<T>,
    /// World-frame linear velocity.
    pub velocity: VelocityState<T>,
    /// `R = rotation_matrix(orientation)` maps world vectors into the body
    /// frame, `Rᵀ` maps body vectors into the world.
    pub orientation: OrientationState<T>,
    /// World-frame contact points, one per limb.
    pub contacts: ContactsState<T>,
    pub accel_bias: AccelBiasState<T>,
    pub gyro_bias: GyroBiasState<T>,
}

impl<T: Scalar> KFState for LegState<T> {
    type Element = T;
    type Dim = U33;
}

impl<T: Scalar> KFState for ContactsState<T> {
    type Element = T;
    type Dim = U18;
}

sub_states_of! {
    LegState<T> {
        PositionState<T> => U0,
        VelocityState<T> => U3,
        OrientationState<T> => U6,
        ContactsState<T> => U9,
        AccelBiasState<T> => U27,
        GyroBiasState<T> => U30,
    }
}

/// Row of contact `leg` inside the error state.
#[inline]
pub fn contact_offset<T: Scalar>(leg: usize) -> usize {
    offset_of::<ContactsState<T>, LegState<T>>() + 3 * leg
}

impl<T: Scalar + Zero> LegState<T> {
    /// The all-zero nominal vector, including a zero quaternion.
    ///
    /// This is the "not yet initialized" state, see [`LegState::is_initialized`].
    pub fn zeros() -> Self {
        Self {
            position: PositionState::new(Vector3::zeros()),
            velocity: VelocityState::new(Vector3::zeros()),
            orientation: OrientationState::new(Quaternion::from(Vector4::zeros())),
            contacts: ContactsState::new(std::array::from_fn(|_| Vector3::zeros())),
            accel_bias: AccelBiasState::new(Vector3::zeros()),
            gyro_bias: GyroBiasState::new(Vector3::zeros()),
        }
    }
}

impl<T: Scalar + Zero> Default for LegState<T> {
    fn default() -> Self {
        Self::zeros()
    }
}

impl<T: RealField> LegState<T> {
    /// Body at the origin, at rest and level, with every contact point placed
    /// at the translation of its pose.
    pub fn initialize(
        contact_poses: &[Matrix4<T>; CONTACT_COUNT],
        accel_bias: Vector3<T>,
        gyro_bias: Vector3<T>,
    ) -> Self {
        Self {
            position: PositionState::new(Vector3::zeros()),
            velocity: VelocityState::new(Vector3::zeros()),
            orientation: OrientationState::identity(),
            contacts: ContactsState::new(std::array::from_fn(|leg| {
                pose_translation(&contact_poses[leg])
            })),
            accel_bias: AccelBiasState::new(accel_bias),
            gyro_bias: GyroBiasState::new(gyro_bias),
        }
    }

    /// Liveness check: `true` unless the nominal vector is all zero.
    ///
    /// A state could in principle drift onto the zero vector, so this is
    /// only approximate. Every orientation reachable by the filter keeps a
    /// non-zero quaternion, which makes false negatives unreachable in practice.
    pub fn is_initialized(&self) -> bool {
        !self.to_vector().iter().all(|x| x.is_zero())
    }

    #[inline]
    pub fn unit_orientation(&self) -> UnitQuaternion<T> {
        self.orientation.unit()
    }

    /// `R`, mapping world vectors into the body frame.
    #[inline]
    pub fn rotation_matrix(&self) -> Matrix3<T> {
        quaternion_to_rotation_matrix(&self.unit_orientation())
    }

    #[inline]
    pub fn contact(&self, leg: usize) -> Option<&Vector3<T>> {
        self.contacts.get(leg)
    }

    /// Contact point `leg` expressed in the body frame, `R (p - r)`.
    #[inline]
    pub fn body_contact(&self, rotation: &Matrix3<T>, leg: usize) -> Vector3<T> {
        rotation * (&self.contacts[leg] - &*self.position)
    }

    /// Flattens the state into the 34-vector layout.
    pub fn to_vector(&self) -> SVector<T, NOMINAL_DIM> {
        let mut vector = SVector::<T, NOMINAL_DIM>::zeros();
        vector
            .fixed_rows_mut::<3>(NOMINAL_POSITION_OFFSET)
            .copy_from(&*self.position);
        vector
            .fixed_rows_mut::<3>(NOMINAL_VELOCITY_OFFSET)
            .copy_from(&*self.velocity);
        vector
            .fixed_rows_mut::<4>(NOMINAL_ORIENTATION_OFFSET)
            .copy_from(&quaternion_to_wxyz(&self.orientation));
        for (leg, contact) in self.contacts.iter().enumerate() {
            vector
                .fixed_rows_mut::<3>(NOMINAL_CONTACTS_OFFSET + 3 * leg)
                .copy_from(contact);
        }
        vector
            .fixed_rows_mut::<3>(NOMINAL_ACCEL_BIAS_OFFSET)
            .copy_from(&*self.accel_bias);
        vector
            .fixed_rows_mut::<3>(NOMINAL_GYRO_BIAS_OFFSET)
            .copy_from(&*self.gyro_bias);
        vector
    }

    /// Inverse of [`LegState::to_vector`]. The quaternion is taken as is.
    pub fn from_vector(vector: &SVector<T, NOMINAL_DIM>) -> Self {
        let block = |offset: usize| vector.fixed_rows::<3>(offset).into_owned();
        Self {
            position: PositionState::new(block(NOMINAL_POSITION_OFFSET)),
            velocity: VelocityState::new(block(NOMINAL_VELOCITY_OFFSET)),
            orientation: OrientationState::new(quaternion_from_wxyz(
                &vector.fixed_rows::<4>(NOMINAL_ORIENTATION_OFFSET).into_owned(),
            )),
            contacts: ContactsState::new(std::array::from_fn(|leg| {
                block(NOMINAL_CONTACTS_OFFSET + 3 * leg)
            })),
            accel_bias: AccelBiasState::new(block(NOMINAL_ACCEL_BIAS_OFFSET)),
            gyro_bias: GyroBiasState::new(block(NOMINAL_GYRO_BIAS_OFFSET)),
        }
    }
}

/// Translation column of a homogeneous transform.
#[inline]
pub fn pose_translation<T: RealField>(pose: &Matrix4<T>) -> Vector3<T> {
    pose.fixed_view::<3, 1>(0, 3).into_owned()
}

impl<T, S> AddAssign<Vector<T, U18, S>> for ContactsState<T>
where
    T: RealField,
    S: Storage<T, U18>,
{
    fn add_assign(&mut self, rhs: Vector<T, U18, S>) {
        for (leg, contact) in self.0.iter_mut().enumerate() {
            *contact += rhs.fixed_rows::<3>(3 * leg);
        }
    }
}

impl<T, S> AddAssign<Vector<T, U33, S>> for LegState<T>
where
    T: RealField,
    S: Storage<T, U33>,
{
    /// Injects an error-state correction: additive for every Euclidean block,
    /// multiplicative for the orientation.
    fn add_assign(&mut self, rhs: Vector<T, U33, S>) {
        self.position += rhs.fixed_rows::<3>(offset_of::<PositionState<T>, Self>());
        self.velocity += rhs.fixed_rows::<3>(offset_of::<VelocityState<T>, Self>());
        self.orientation += rhs.fixed_rows::<3>(offset_of::<OrientationState<T>, Self>());
        self.contacts += rhs.fixed_rows::<18>(offset_of::<ContactsState<T>, Self>());
        self.accel_bias += rhs.fixed_rows::<3>(offset_of::<AccelBiasState<T>, Self>());
        self.gyro_bias += rhs.fixed_rows::<3>(offset_of::<GyroBiasState<T>, Self>());
    }
}

/// Diagonal variances of the initial error covariance.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InitialCovConfig<T> {
    pub position: T,
    pub velocity: T,
    pub orientation: T,
    pub contact: T,
    pub accel_bias: T,
    pub gyro_bias: T,
}

impl<T: RealField> Default for InitialCovConfig<T> {
    fn default() -> Self {
        Self {
            position: nalgebra::convert(1e-6),
            velocity: nalgebra::convert(1e-4),
            orientation: nalgebra::convert(1e-4),
            contact: nalgebra::convert(1e-4),
            accel_bias: nalgebra::convert(1e-4),
            gyro_bias: nalgebra::convert(1e-6),
        }
    }
}

impl<T> From<InitialCovConfig<T>> for Covariance<LegState<T>>
where
    T: Scalar + Zero,
{
    fn from(value: InitialCovConfig<T>) -> Self {
        let mut cov = Self::default();

        cov.sub_covariance_mut::<PositionState<T>>()
            .fill_diagonal(value.position);
        cov.sub_covariance_mut::<VelocityState<T>>()
            .fill_diagonal(value.velocity);
        cov.sub_covariance_mut::<OrientationState<T>>()
            .fill_diagonal(value.orientation);
        cov.sub_covariance_mut::<ContactsState<T>>()
            .fill_diagonal(value.contact);
        cov.sub_covariance_mut::<AccelBiasState<T>>()
            .fill_diagonal(value.accel_bias);
        cov.sub_covariance_mut::<GyroBiasState<T>>()
            .fill_diagonal(value.gyro_bias);

        cov
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eskf::state::StateDim;
    use approx::assert_relative_eq;
    use nalgebra::{DimName, SVector, Translation3};

    type TestT = f64;

    type State = LegState<TestT>;

    fn offset<S: crate::eskf::state::SubStateOf<State>>() -> usize {
        offset_of::<S, State>()
    }

    fn end_offset<S: crate::eskf::state::SubStateOf<State>>() -> usize {
        offset_of::<S, State>() + StateDim::<S>::dim()
    }

    fn standing_poses() -> [Matrix4<TestT>; CONTACT_COUNT] {
        std::array::from_fn(|leg| {
            let angle = leg as TestT * core::f64::consts::FRAC_PI_3;
            Translation3::new(0.4 * angle.cos(), 0.3 * angle.sin(), -0.25).to_homogeneous()
        })
    }

    #[test]
    fn test_error_state_impl() {
        assert_eq!(StateDim::<State>::dim(), 33);

        assert_eq!(offset::<PositionState<TestT>>(), 0);
        assert_eq!(end_offset::<PositionState<TestT>>(), 3);

        assert_eq!(offset::<VelocityState<TestT>>(), 3);
        assert_eq!(end_offset::<VelocityState<TestT>>(), 6);

        assert_eq!(offset::<OrientationState<TestT>>(), 6);
        assert_eq!(end_offset::<OrientationState<TestT>>(), 9);

        assert_eq!(offset::<ContactsState<TestT>>(), 9);
        assert_eq!(end_offset::<ContactsState<TestT>>(), 27);

        assert_eq!(offset::<AccelBiasState<TestT>>(), 27);
        assert_eq!(end_offset::<AccelBiasState<TestT>>(), 30);

        assert_eq!(offset::<GyroBiasState<TestT>>(), 30);
        assert_eq!(end_offset::<GyroBiasState<TestT>>(), 33);

        assert_eq!(contact_offset::<TestT>(0), 9);
        assert_eq!(contact_offset::<TestT>(5), 24);
    }

    #[test]
    fn test_zero_state_is_not_initialized() {
        let state = State::default();
        assert!(!state.is_initialized());
        assert_eq!(state.to_vector(), SVector::<TestT, NOMINAL_DIM>::zeros());
    }

    #[test]
    fn test_initialize() {
        let poses = standing_poses();
        let accel_bias = Vector3::new(0.01, -0.02, 0.03);
        let gyro_bias = Vector3::new(-0.001, 0.002, 0.0);

        let state = State::initialize(&poses, accel_bias, gyro_bias);

        assert!(state.is_initialized());
        assert_eq!(*state.position, Vector3::zeros());
        assert_eq!(*state.velocity, Vector3::zeros());
        assert_eq!(state.unit_orientation(), UnitQuaternion::identity());
        for (leg, pose) in poses.iter().enumerate() {
            assert_eq!(state.contact(leg), Some(&pose_translation(pose)));
        }
        assert_eq!(state.contact(CONTACT_COUNT), None);
        assert_eq!(*state.accel_bias, accel_bias);
        assert_eq!(*state.gyro_bias, gyro_bias);
    }

    #[test]
    fn test_nominal_vector_layout() {
        let state = State::initialize(
            &standing_poses(),
            Vector3::repeat(0.5),
            Vector3::repeat(-0.5),
        );
        let vector = state.to_vector();

        // identity quaternion, scalar first
        assert_eq!(
            vector.fixed_rows::<4>(NOMINAL_ORIENTATION_OFFSET).into_owned(),
            Vector4::new(1.0, 0.0, 0.0, 0.0)
        );
        assert_eq!(
            vector.fixed_rows::<3>(NOMINAL_CONTACTS_OFFSET + 3 * 2).into_owned(),
            *state.contact(2).expect("six contacts")
        );
        assert_eq!(vector[NOMINAL_ACCEL_BIAS_OFFSET], 0.5);
        assert_eq!(vector[NOMINAL_GYRO_BIAS_OFFSET + 2], -0.5);

        assert_eq!(State::from_vector(&vector), state);
    }

    #[test]
    fn test_error_state_injection() {
        let mut state = State::initialize(&standing_poses(), Vector3::zeros(), Vector3::zeros());
        let before = state.clone();

        let mut delta = SVector::<TestT, 33>::zeros();
        delta.fixed_rows_mut::<3>(0).fill(1.0);
        delta.fixed_rows_mut::<3>(3).fill(2.0);
        delta[8] = 0.1;
        delta.fixed_rows_mut::<3>(contact_offset::<TestT>(4)).fill(-1.0);
        delta.fixed_rows_mut::<3>(27).fill(0.01);
        delta.fixed_rows_mut::<3>(30).fill(0.001);

        state += delta;

        assert_eq!(*state.position, Vector3::repeat(1.0));
        assert_eq!(*state.velocity, Vector3::repeat(2.0));
        assert_relative_eq!(
            state.unit_orientation(),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.0, 0.1)),
            epsilon = 1e-12
        );
        assert_eq!(state.contacts[3], before.contacts[3]);
        assert_eq!(state.contacts[4], before.contacts[4] - Vector3::repeat(1.0));
        assert_eq!(*state.accel_bias, Vector3::repeat(0.01));
        assert_eq!(*state.gyro_bias, Vector3::repeat(0.001));
    }

    #[test]
    fn test_initial_covariance() {
        let config = InitialCovConfig {
            position: 1.0,
            velocity: 2.0,
            orientation: 3.0,
            contact: 4.0,
            accel_bias: 5.0,
            gyro_bias: 6.0,
        };
        let cov = Covariance::<State>::from(config);

        assert_eq!(cov[(0, 0)], 1.0);
        assert_eq!(cov[(5, 5)], 2.0);
        assert_eq!(cov[(7, 7)], 3.0);
        assert_eq!(cov[(26, 26)], 4.0);
        assert_eq!(cov[(27, 27)], 5.0);
        assert_eq!(cov[(32, 32)], 6.0);
        assert_eq!(cov[(0, 1)], 0.0);
        assert_eq!(
            cov.sub_covariance::<ContactsState<TestT>>().trace(),
            18.0 * 4.0
        );
        assert_eq!(
            cov.sensitivity::<GyroBiasState<TestT>, PositionState<TestT>>()
                .amax(),
            0.0
        );
        assert_eq!(cov.trace(), 3.0 + 6.0 + 9.0 + 18.0 * 4.0 + 15.0 + 18.0);
    }
}
