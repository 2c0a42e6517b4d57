use crate::eskf::state::{KFState, SubStateOf};
use std::ops::{Deref, DerefMut};

use nalgebra::{
    CStride, DefaultAllocator, DimName, MatrixView, MatrixViewMut, OMatrix, RStride, RealField,
    allocator::Allocator,
};
use num_traits::Zero;

type OwnedSquareMatrix<T, D> = OMatrix<T, D, D>;
type SquareMatrixViewMut<'a, T, R, C, DS> =
    MatrixViewMut<'a, T, R, C, RStride<T, DS, DS>, CStride<T, DS, DS>>;
type SquareMatrixView<'a, T, R, C, DS> =
    MatrixView<'a, T, R, C, RStride<T, DS, DS>, CStride<T, DS, DS>>;

/// A square matrix over the error state of `S`, addressed by sub-state.
///
/// Used for the covariance itself and for every other error-state sized
/// square matrix (transition jacobian, process noise).
///
/// # Overview
/// ```text
///     ├──────────  S  ─────────┤
///      ├──x──┤ ├──y──┤ ├──z──┤
/// ┬   ╭────────────────────────╮
/// │ ┬ │                        │
/// │ x │   xx      xy      xz   │
/// │ ┴ │                        │
///   ┬ │                        │
/// S y │   yx      yy      yz   │
///   ┴ │                        │
/// │ ┬ │                        │
/// │ z │   zx      zy      zz   │
/// │ ┴ │                        │
/// ┴   ╰────────────────────────╯
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Covariance<S>(pub OwnedSquareMatrix<S::Element, S::Dim>)
where
    S: KFState,
    DefaultAllocator: Allocator<S::Dim, S::Dim>;

impl<S> Deref for Covariance<S>
where
    S: KFState,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    type Target = OwnedSquareMatrix<S::Element, S::Dim>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S> DerefMut for Covariance<S>
where
    S: KFState,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<S> Covariance<S>
where
    S: KFState,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    /// The block mapping `Src` (columns) onto `Dst` (rows).
    #[inline]
    pub fn sensitivity_mut<Src, Dst>(
        &mut self,
    ) -> SquareMatrixViewMut<'_, S::Element, Dst::Dim, Src::Dim, S::Dim>
    where
        Src: SubStateOf<S> + ?Sized,
        Dst: SubStateOf<S> + ?Sized,
    {
        self.generic_view_mut(
            (Dst::Offset::dim(), Src::Offset::dim()),
            (Dst::Dim::name(), Src::Dim::name()),
        )
    }

    #[inline]
    pub fn sensitivity<Src, Dst>(
        &self,
    ) -> SquareMatrixView<'_, S::Element, Dst::Dim, Src::Dim, S::Dim>
    where
        Src: SubStateOf<S> + ?Sized,
        Dst: SubStateOf<S> + ?Sized,
    {
        self.generic_view(
            (Dst::Offset::dim(), Src::Offset::dim()),
            (Dst::Dim::name(), Src::Dim::name()),
        )
    }

    #[inline]
    pub fn sub_covariance<Sub>(
        &self,
    ) -> SquareMatrixView<'_, S::Element, Sub::Dim, Sub::Dim, S::Dim>
    where
        Sub: SubStateOf<S> + ?Sized,
    {
        self.sensitivity::<Sub, Sub>()
    }

    #[inline]
    pub fn sub_covariance_mut<Sub>(
        &mut self,
    ) -> SquareMatrixViewMut<'_, S::Element, Sub::Dim, Sub::Dim, S::Dim>
    where
        Sub: SubStateOf<S> + ?Sized,
    {
        self.sensitivity_mut::<Sub, Sub>()
    }
}

impl<S> Covariance<S>
where
    S: KFState<Element: RealField>,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    /// Replaces the matrix by its symmetric part, `(P + Pᵀ) / 2`.
    pub fn symmetrize(&mut self) {
        let transposed = self.0.transpose();
        self.0 += transposed;
        self.0 *= nalgebra::convert::<f64, S::Element>(0.5);
    }

    /// Largest absolute difference between the matrix and its transpose.
    pub fn asymmetry(&self) -> S::Element {
        (&self.0 - self.0.transpose()).amax()
    }
}

impl<S> Default for Covariance<S>
where
    S: KFState<Element: Zero>,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    #[inline]
    fn default() -> Self {
        Self(OMatrix::zeros())
    }
}
