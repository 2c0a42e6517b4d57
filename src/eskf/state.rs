use nalgebra::{DimName, Scalar};

pub mod common;

/// A state whose error is tracked by the filter.
///
/// `Dim` is the dimension of the *error* state, which differs from the
/// number of stored scalars for manifold quantities like orientation.
pub trait KFState {
    type Element: Scalar;
    type Dim: DimName;
}

pub type StateDim<S> = <S as KFState>::Dim;

/// # Overview
/// ```text
/// ├────┬─ Superstate ─┬────┤
///      ├── Substate ──┤
///      │
///      Offset
/// ├────╯
/// ```
pub trait SubStateOf<Super: KFState>: KFState {
    type Offset: DimName;
}

/// The `Offset` of the `SubState` in the `Super`.
/// See also [`SubStateOf`].
pub type SubStateOffset<S, Super> = <S as SubStateOf<Super>>::Offset;

/// Row (and column) of the first error-state component of `S` inside `Super`.
#[inline(always)]
pub fn offset_of<S, Super>() -> usize
where
    S: SubStateOf<Super> + ?Sized,
    Super: KFState,
{
    SubStateOffset::<S, Super>::dim()
}
