//! Adaptive-step Runge–Kutta integration with dense output.
//!
//! An [`Integrator`] evolves a first-order system `y' = f(t, y)` with an
//! embedded Runge–Kutta pair until a stopping condition or the end time is
//! reached, then resamples the accepted steps onto a uniform time grid.

pub mod buffer;
pub mod control;
pub mod dense;
pub mod driver;
pub mod error;
pub mod retry;
pub mod rk;

use ndarray::prelude::*;
use std::fmt;
use thiserror::Error;

pub use crate::buffer::SampleBuffer;
pub use crate::dense::{DenseOutput, DenseOutputBuilder, Interpolation};
pub use crate::driver::{Evolution, Integrator, IntegratorConfig, Stats};
pub use crate::error::{IntegratorError, InterpolationError, TrajectoryError};
pub use crate::rk::{RKMethod, RK23, RK45, RKF45};

/// Failure reported by a derivative evaluation, e.g. at a physical
/// singularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("derivative evaluation failed with code {code}")]
pub struct Fault {
    pub code: i32,
}

impl Fault {
    pub fn new(code: i32) -> Fault {
        Fault { code }
    }
}

/// Right-hand side of the system `y' = f(t, y)`.
pub trait OdeSystem {
    /// Extra data passed through to every evaluation.
    type Params: ?Sized;

    /// Returns the number of elements in the state.
    fn dim(&self) -> usize;

    /// Fill in `dydt` with the derivative of `y` at time `t`.
    ///
    /// The result must depend only on `t`, `y` and `params`. An `Err` makes
    /// the driver retry the step with a smaller size.
    fn derivatives(
        &mut self,
        t: f64,
        y: ArrayView1<'_, f64>,
        dydt: ArrayViewMut1<'_, f64>,
        params: &Self::Params,
    ) -> Result<(), Fault>;
}

/// Answer of a stopping predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCheck {
    Continue,
    /// The terminal condition was reached. The code is reported back in
    /// `Termination::StopRequested`.
    StopRequested(i32),
    /// The predicate itself could not be evaluated.
    Fault(i32),
}

/// Predicate evaluated before every step to end the integration early.
pub trait StopCondition<P: ?Sized> {
    fn check(
        &mut self,
        t: f64,
        y: ArrayView1<'_, f64>,
        dydt: ArrayView1<'_, f64>,
        params: &P,
    ) -> StopCheck;
}

/// Placeholder for an integrator without a stopping predicate.
#[derive(Debug, Clone, Copy)]
pub enum NoStop {}

impl<P: ?Sized> StopCondition<P> for NoStop {
    fn check(&mut self, _: f64, _: ArrayView1<'_, f64>, _: ArrayView1<'_, f64>, _: &P) -> StopCheck {
        match *self {}
    }
}

/// Why an integration halted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Termination {
    /// `t_end` was reached.
    ReachedEnd,
    /// The stopping predicate asked to stop with this code.
    StopRequested(i32),
    /// The stopping predicate failed with this code.
    StopFault(i32),
    /// The derivative kept failing after all retries; carries the last code.
    DerivativeFault(i32),
    /// The step size dropped below what the time resolution allows.
    StepTooSmall { required: f64, allowable: f64 },
}

impl Termination {
    /// Returns `true` if the integration was aborted rather than stopped.
    pub fn is_fault(&self) -> bool {
        match self {
            Termination::ReachedEnd | Termination::StopRequested(_) => false,
            _ => true,
        }
    }

    /// Code supplied by a callback, if any.
    pub fn code(&self) -> Option<i32> {
        match *self {
            Termination::StopRequested(code)
            | Termination::StopFault(code)
            | Termination::DerivativeFault(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::ReachedEnd => write!(f, "reached end time"),
            Termination::StopRequested(code) => write!(f, "stop requested with code {}", code),
            Termination::StopFault(code) => write!(f, "stop condition failed with code {}", code),
            Termination::DerivativeFault(code) => {
                write!(f, "derivative failed with code {} after all retries", code)
            }
            Termination::StepTooSmall {
                required,
                allowable,
            } => write!(
                f,
                "required step size {} is smaller than min allowable step size {}",
                required, allowable
            ),
        }
    }
}
