//! Step-size control for embedded pairs.

use ndarray::prelude::*;

/// Multiply steps computed from asymptotic behaviour of errors by this.
const SAFETY: f64 = 0.9;
/// Minimum allowed decrease in a step size.
const MIN_FACTOR: f64 = 0.2;
/// Maximum allowed increase in a step size.
const MAX_FACTOR: f64 = 5.;
/// Scaled errors above this reject the step.
const REJECT_ABOVE: f64 = 1.1;
/// Scaled errors below this let the step grow.
const GROW_BELOW: f64 = 0.5;

/// Outcome of checking one step against the tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepDecision {
    /// Keep the step and the current step size.
    Accept,
    /// Reject the step and retry it from the pre-step state with this size.
    Shrink(f64),
    /// Keep the step and use this larger size for the next one.
    Grow(f64),
}

impl StepDecision {
    pub fn is_rejection(&self) -> bool {
        match self {
            StepDecision::Shrink(_) => true,
            _ => false,
        }
    }
}

/// Standard error control.
///
/// The local error of component `i` is allowed to reach
///
/// ```text
/// D_i = eps_abs + eps_rel * (a_y * |y_i| + a_dydt * |h| * |dydt_i|)
/// ```
///
/// With the default scaling (`a_y = 1`, `a_dydt = 0`) this is the plain
/// `eps_abs + eps_rel * |y_i|` bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardControl {
    eps_abs: f64,
    eps_rel: f64,
    a_y: f64,
    a_dydt: f64,
}

impl StandardControl {
    pub fn new(eps_abs: f64, eps_rel: f64, a_y: f64, a_dydt: f64) -> StandardControl {
        StandardControl {
            eps_abs,
            eps_rel,
            a_y,
            a_dydt,
        }
    }

    /// Largest ratio of error estimate to allowed error over all components.
    pub fn error_ratio(
        &self,
        y: ArrayView1<'_, f64>,
        y_err: ArrayView1<'_, f64>,
        dydt: ArrayView1<'_, f64>,
        h: f64,
    ) -> f64 {
        debug_assert_eq!(y.len(), y_err.len());
        debug_assert_eq!(y.len(), dydt.len());
        let mut rmax = 0f64;
        for ((&y, &err), &dydt) in y.iter().zip(y_err).zip(dydt) {
            let allowed =
                self.eps_abs + self.eps_rel * (self.a_y * y.abs() + self.a_dydt * (h * dydt).abs());
            let r = if allowed > 0. {
                err.abs() / allowed
            } else if err == 0. {
                0.
            } else {
                ::std::f64::INFINITY
            };
            if r.is_nan() {
                return r;
            }
            rmax = rmax.max(r);
        }
        rmax
    }

    /// Decide on a step of size `h` that produced `y` with error estimate
    /// `y_err`, where `order` is the order of the propagated solution.
    pub fn hadjust(
        &self,
        order: usize,
        y: ArrayView1<'_, f64>,
        y_err: ArrayView1<'_, f64>,
        dydt: ArrayView1<'_, f64>,
        h: f64,
    ) -> StepDecision {
        let rmax = self.error_ratio(y, y_err, dydt, h);
        let order = order as f64;
        if !rmax.is_finite() {
            StepDecision::Shrink(h * MIN_FACTOR)
        } else if rmax > REJECT_ABOVE {
            let factor = (SAFETY * rmax.powf(-1. / order)).max(MIN_FACTOR);
            StepDecision::Shrink(h * factor)
        } else if rmax < GROW_BELOW {
            let factor = if rmax == 0. {
                MAX_FACTOR
            } else {
                (SAFETY * rmax.powf(-1. / (order + 1.))).max(1.).min(MAX_FACTOR)
            };
            StepDecision::Grow(h * factor)
        } else {
            StepDecision::Accept
        }
    }
}
