//! Error types.

use ndarray::prelude::*;
use thiserror::Error;

use crate::Termination;

/// Errors that prevent an integration from running at all.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegratorError {
    /// A buffer or workspace could not be allocated.
    #[error("failed to allocate storage for {elements} elements")]
    Allocation { elements: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("expected a state of length {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    /// The nominal step (output sampling interval) is zero or not finite.
    #[error("nominal step {0} must be finite and nonzero")]
    InvalidStep(f64),
    #[error("t_init and t_end must be finite")]
    NonFiniteBound,
}

/// Failure to build an interpolant over the recorded samples.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpolationError {
    #[error("interpolant needs at least {required} knots, got {found}")]
    TooFewKnots { found: usize, required: usize },
    #[error("knot times are not strictly monotonic")]
    NonMonotonicKnots,
    #[error("failed to allocate storage for {elements} elements")]
    Allocation { elements: usize },
}

/// Reason an `Evolution` carries no dense trajectory.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrajectoryError {
    /// No step was accepted before the integration halted.
    #[error("no step was accepted")]
    NoProgress,
    /// The integration ended in a fault; partial output was discarded.
    #[error("integration aborted: {0}")]
    Aborted(Termination),
    #[error(transparent)]
    Interpolation(#[from] InterpolationError),
}

fn try_vec(elements: usize) -> Result<Vec<f64>, IntegratorError> {
    let mut data = Vec::new();
    data.try_reserve_exact(elements)
        .map_err(|_| IntegratorError::Allocation { elements })?;
    data.resize(elements, 0.);
    Ok(data)
}

/// Allocates a zeroed vector, reporting failure instead of aborting.
pub(crate) fn try_zeros1(len: usize) -> Result<Array1<f64>, IntegratorError> {
    Ok(Array1::from(try_vec(len)?))
}

/// Allocates a zeroed `rows × cols` matrix, reporting failure instead of
/// aborting.
pub(crate) fn try_zeros2(rows: usize, cols: usize) -> Result<Array2<f64>, IntegratorError> {
    let elements = rows
        .checked_mul(cols)
        .ok_or(IntegratorError::Allocation {
            elements: usize::MAX,
        })?;
    Array2::from_shape_vec((rows, cols), try_vec(elements)?)
        .map_err(|_| IntegratorError::Allocation { elements })
}
