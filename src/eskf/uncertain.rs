use std::ops::{Deref, DerefMut};

use nalgebra::{DefaultAllocator, allocator::Allocator};

use crate::eskf::{Covariance, state::KFState};

/// A nominal state together with the covariance of its error state.
#[derive(Debug, Clone)]
pub struct Uncertained<S>
where
    S: KFState,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    pub state: S,
    /// The covariance matrix of the error state.
    pub cov: Covariance<S>,
}

impl<S> Deref for Uncertained<S>
where
    S: KFState,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<S> DerefMut for Uncertained<S>
where
    S: KFState,
    DefaultAllocator: Allocator<S::Dim, S::Dim>,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}
