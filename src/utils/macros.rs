/// Implements [`SubStateOf`](crate::eskf::state::SubStateOf) for every listed sub-state,
/// placing it at the given type-level offset inside the error state of `Super`.
///
/// # Example
/// ```ignore
/// sub_states_of! {
///     LegState<T> {
///         PositionState<T> => U0,
///         VelocityState<T> => U3,
///     }
/// }
/// ```
macro_rules! sub_states_of {
    ($super:ident<$t:ident> { $($sub:ty => $offset:ty),* $(,)? }) => {
        $(
            impl<$t: nalgebra::Scalar> $crate::eskf::state::SubStateOf<$super<$t>> for $sub {
                type Offset = $offset;
            }
        )*
    };
}

pub(crate) use sub_states_of;
