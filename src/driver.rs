//! The integration driver.

use ndarray::prelude::*;

use crate::buffer::SampleBuffer;
use crate::control::{StandardControl, StepDecision};
use crate::dense::{DenseOutput, DenseOutputBuilder, Interpolation};
use crate::error::{try_zeros1, IntegratorError, TrajectoryError};
use crate::retry::RetryPolicy;
use crate::rk::{next_after, RKMethod, Stepper, RKF45};
use crate::{NoStop, OdeSystem, StopCheck, StopCondition, Termination};

/// Settings of an `Integrator`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratorConfig {
    /// Absolute tolerance on the local error of every component.
    pub eps_abs: f64,
    /// Relative tolerance on the local error of every component.
    pub eps_rel: f64,
    /// Scaling of `|y|` in the allowed error.
    pub a_y: f64,
    /// Scaling of `|h * dydt|` in the allowed error.
    pub a_dydt: f64,
    /// Step reductions allowed in a row after derivative faults.
    pub max_retries: usize,
    /// Factor applied to the step size on every retry.
    pub retry_factor: f64,
    /// Only the stopping predicate may end the integration; `t_end` is used
    /// just to size the sample buffer.
    pub stop_on_test_only: bool,
    /// Upper bound on the absolute step size.
    pub max_step: f64,
    /// Interpolant for the dense output.
    pub interpolation: Interpolation,
    /// Return the accepted samples alongside the dense output.
    pub keep_samples: bool,
}

impl Default for IntegratorConfig {
    fn default() -> IntegratorConfig {
        IntegratorConfig {
            eps_abs: 1e-6,
            eps_rel: 1e-3,
            a_y: 1.,
            a_dydt: 0.,
            max_retries: 6,
            retry_factor: 0.5,
            stop_on_test_only: false,
            max_step: ::std::f64::INFINITY,
            interpolation: Interpolation::CubicSpline,
            keep_samples: false,
        }
    }
}

impl IntegratorConfig {
    pub fn new(eps_abs: f64, eps_rel: f64) -> IntegratorConfig {
        IntegratorConfig {
            eps_abs,
            eps_rel,
            ..IntegratorConfig::default()
        }
    }

    pub fn with_scaling(mut self, a_y: f64, a_dydt: f64) -> IntegratorConfig {
        self.a_y = a_y;
        self.a_dydt = a_dydt;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> IntegratorConfig {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_factor(mut self, retry_factor: f64) -> IntegratorConfig {
        self.retry_factor = retry_factor;
        self
    }

    pub fn stop_on_test_only(mut self, stop_on_test_only: bool) -> IntegratorConfig {
        self.stop_on_test_only = stop_on_test_only;
        self
    }

    pub fn with_max_step(mut self, max_step: f64) -> IntegratorConfig {
        self.max_step = max_step;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> IntegratorConfig {
        self.interpolation = interpolation;
        self
    }

    pub fn keep_samples(mut self, keep_samples: bool) -> IntegratorConfig {
        self.keep_samples = keep_samples;
        self
    }

    pub fn validate(&self) -> Result<(), IntegratorError> {
        let non_negative = |x: f64| x.is_finite() && x >= 0.;
        if !non_negative(self.eps_abs) || !non_negative(self.eps_rel) {
            return Err(IntegratorError::InvalidConfig(
                "tolerances must be finite and non-negative",
            ));
        }
        if !non_negative(self.a_y) || !non_negative(self.a_dydt) {
            return Err(IntegratorError::InvalidConfig(
                "error scaling factors must be finite and non-negative",
            ));
        }
        if self.eps_abs == 0. && (self.eps_rel == 0. || self.a_y + self.a_dydt == 0.) {
            return Err(IntegratorError::InvalidConfig("tolerances are both zero"));
        }
        if !(self.retry_factor > 0. && self.retry_factor < 1.) {
            return Err(IntegratorError::InvalidConfig(
                "retry_factor must lie strictly between 0 and 1",
            ));
        }
        if !(self.max_step > 0.) {
            return Err(IntegratorError::InvalidConfig("max_step is zero or negative"));
        }
        Ok(())
    }
}

/// Counters for one `evolve` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub derivative_evals: usize,
    pub accepted_steps: usize,
    /// Steps rejected by the error controller.
    pub rejected_steps: usize,
    /// Step reductions caused by derivative faults.
    pub retries: usize,
}

/// Outcome of `Integrator::evolve`.
#[derive(Debug, Clone)]
pub struct Evolution {
    /// Solution on the uniform grid, if one could be built.
    pub trajectory: Result<DenseOutput, TrajectoryError>,
    /// Time of the last accepted step.
    pub final_t: f64,
    /// State at `final_t`.
    pub final_y: Array1<f64>,
    pub termination: Termination,
    /// Number of accepted steps.
    pub sample_count: usize,
    /// Accepted samples, including the initial one, when
    /// `IntegratorConfig::keep_samples` is set.
    pub samples: Option<SampleBuffer>,
    pub stats: Stats,
}

impl Evolution {
    /// Returns `true` if at least one step was accepted.
    pub fn made_progress(&self) -> bool {
        self.sample_count > 0
    }
}

/// Per-integrator scratch storage.
struct Workspace<O: RKMethod> {
    stepper: Stepper<O>,
    y: Array1<f64>,
    dydt: Array1<f64>,
}

impl<O: RKMethod> Workspace<O> {
    fn new(dim: usize) -> Result<Workspace<O>, IntegratorError> {
        Ok(Workspace {
            stepper: Stepper::new(dim)?,
            y: try_zeros1(dim)?,
            dydt: try_zeros1(dim)?,
        })
    }
}

/// Adaptive-step integrator with dense output.
///
/// `S` supplies the derivative, `T` the optional stopping predicate and `O`
/// the embedded Runge–Kutta pair.
pub struct Integrator<S, T = NoStop, O = RKF45>
where
    S: OdeSystem,
    O: RKMethod,
{
    system: S,
    stop: Option<T>,
    config: IntegratorConfig,
    control: StandardControl,
    dim: usize,
    workspace: Option<Workspace<O>>,
}

impl<S: OdeSystem> Integrator<S, NoStop, RKF45> {
    /// Creates an integrator using the Runge–Kutta–Fehlberg 4(5) pair.
    pub fn new(system: S, config: IntegratorConfig) -> Result<Self, IntegratorError> {
        Integrator::with_method(system, config)
    }
}

impl<S, O> Integrator<S, NoStop, O>
where
    S: OdeSystem,
    O: RKMethod,
{
    /// Creates an integrator using the pair `O`.
    pub fn with_method(system: S, config: IntegratorConfig) -> Result<Self, IntegratorError> {
        config.validate()?;
        let dim = system.dim();
        if dim == 0 {
            return Err(IntegratorError::InvalidConfig("dimension must be positive"));
        }
        Ok(Integrator {
            system,
            stop: None,
            config,
            control: StandardControl::new(config.eps_abs, config.eps_rel, config.a_y, config.a_dydt),
            dim,
            workspace: Some(Workspace::new(dim)?),
        })
    }

    /// Attaches a stopping predicate, evaluated before every step.
    pub fn with_stop<T>(self, stop: T) -> Integrator<S, T, O>
    where
        T: StopCondition<S::Params>,
    {
        Integrator {
            system: self.system,
            stop: Some(stop),
            config: self.config,
            control: self.control,
            dim: self.dim,
            workspace: self.workspace,
        }
    }
}

impl<S, T, O> Integrator<S, T, O>
where
    S: OdeSystem,
    T: StopCondition<S::Params>,
    O: RKMethod,
{
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut S {
        &mut self.system
    }

    /// Releases the scratch storage. Calling this more than once is
    /// harmless; the next `evolve` allocates it again.
    pub fn release(&mut self) {
        self.workspace = None;
    }

    /// Integrate from `(t_init, y_init)` until the stopping predicate fires,
    /// `t_end` is reached (unless `stop_on_test_only`), or a fault ends the
    /// run, then resample the accepted steps every `delta_t`.
    ///
    /// `delta_t` is both the first step size tried and the spacing of the
    /// output grid. The direction of integration is that of `t_end - t_init`.
    ///
    /// Only invalid arguments and allocation failures are returned as `Err`.
    /// How the run ended is reported in `Evolution::termination`.
    pub fn evolve(
        &mut self,
        params: &S::Params,
        y_init: ArrayView1<'_, f64>,
        t_init: f64,
        t_end: f64,
        delta_t: f64,
    ) -> Result<Evolution, IntegratorError> {
        if y_init.len() != self.dim {
            return Err(IntegratorError::DimensionMismatch {
                expected: self.dim,
                found: y_init.len(),
            });
        }
        if !t_init.is_finite() || !t_end.is_finite() {
            return Err(IntegratorError::NonFiniteBound);
        }
        if !delta_t.is_finite() || delta_t == 0. {
            return Err(IntegratorError::InvalidStep(delta_t));
        }
        let stop_on_test_only = self.config.stop_on_test_only;
        if stop_on_test_only && self.stop.is_none() {
            return Err(IntegratorError::InvalidConfig(
                "stop_on_test_only requires a stopping predicate",
            ));
        }

        let direction = if t_end != t_init {
            (t_end - t_init).signum()
        } else {
            delta_t.signum()
        };
        let delta_t = delta_t.abs() * direction;
        let max_step = self.config.max_step;

        let mut ws = match self.workspace.take() {
            Some(ws) => ws,
            None => Workspace::new(self.dim)?,
        };
        let evals_before = ws.stepper.evaluations();
        let capacity = DenseOutputBuilder::grid_len(t_init, t_end, delta_t).saturating_add(1);
        let mut samples = SampleBuffer::with_capacity(self.dim, capacity)?;
        let mut retries = RetryPolicy::new(self.config.max_retries);
        let mut stats = Stats::default();

        let mut t = t_init;
        let mut h = delta_t.abs().min(max_step) * direction;
        ws.y.assign(&y_init);

        stats.derivative_evals += 1;
        let initial = self
            .system
            .derivatives(t, ws.y.view(), ws.dydt.view_mut(), params);
        let termination = match initial {
            Err(fault) => {
                log::warn!("derivative failed at the initial point: {}", fault);
                Termination::DerivativeFault(fault.code)
            }
            Ok(()) => {
                samples.push(t, ws.y.view(), ws.dydt.view())?;
                loop {
                    if let Some(stop) = self.stop.as_mut() {
                        match stop.check(t, ws.y.view(), ws.dydt.view(), params) {
                            StopCheck::Continue => {}
                            StopCheck::StopRequested(code) => {
                                break Termination::StopRequested(code);
                            }
                            StopCheck::Fault(code) => {
                                log::warn!("stop condition failed at t = {} with code {}", t, code);
                                break Termination::StopFault(code);
                            }
                        }
                    }
                    if !stop_on_test_only && (t - t_end) * direction >= 0. {
                        break Termination::ReachedEnd;
                    }

                    // Attempt steps until one is accepted or the run must end.
                    let accepted = loop {
                        let min_step =
                            10. * (next_after(t, direction * ::std::f64::INFINITY) - t).abs();
                        if h.abs() < min_step {
                            break Err(Termination::StepTooSmall {
                                required: h.abs(),
                                allowable: min_step,
                            });
                        }
                        let clamped = !stop_on_test_only && (t + h - t_end) * direction > 0.;
                        let h_try = if clamped { t_end - t } else { h };

                        let out = match ws.stepper.step(
                            &mut self.system,
                            params,
                            t,
                            ws.y.view(),
                            ws.dydt.view(),
                            h_try,
                        ) {
                            Ok(out) => out,
                            Err(fault) => {
                                if retries.try_consume() {
                                    stats.retries += 1;
                                    h = h_try * self.config.retry_factor;
                                    log::debug!(
                                        "derivative fault {} at t = {}, retrying with h = {}",
                                        fault.code,
                                        t,
                                        h
                                    );
                                    continue;
                                }
                                log::warn!(
                                    "derivative fault {} at t = {} after {} retries",
                                    fault.code,
                                    t,
                                    retries.max()
                                );
                                break Err(Termination::DerivativeFault(fault.code));
                            }
                        };

                        let decision = self.control.hadjust(
                            O::ORDER + 1,
                            out.y_new.view(),
                            out.error.view(),
                            ws.stepper.end_deriv(),
                            h_try,
                        );
                        let h_next = match decision {
                            StepDecision::Shrink(h_new) => {
                                stats.rejected_steps += 1;
                                log::debug!("step of {} at t = {} rejected", h_try, t);
                                h = h_new;
                                continue;
                            }
                            StepDecision::Grow(h_new) => h_new,
                            StepDecision::Accept => h_try,
                        };
                        h = h_next.abs().min(max_step) * direction;

                        t = if clamped { t_end } else { t + h_try };
                        ws.y.assign(&out.y_new);
                        ws.dydt.assign(&ws.stepper.end_deriv());
                        break Ok(());
                    };

                    match accepted {
                        Ok(()) => {
                            retries.reset();
                            stats.accepted_steps += 1;
                            samples.push(t, ws.y.view(), ws.dydt.view())?;
                            log::trace!("accepted step to t = {}, next h = {}", t, h);
                        }
                        Err(termination) => break termination,
                    }
                }
            }
        };
        stats.derivative_evals += ws.stepper.evaluations() - evals_before;

        let trajectory = if termination.is_fault() {
            Err(TrajectoryError::Aborted(termination))
        } else if stats.accepted_steps == 0 {
            Err(TrajectoryError::NoProgress)
        } else {
            DenseOutputBuilder::new(self.config.interpolation)
                .build(&samples, t_init, t, delta_t)
                .map_err(TrajectoryError::from)
        };
        log::debug!(
            "integration ended at t = {} ({}) after {} accepted steps",
            t,
            termination,
            stats.accepted_steps
        );

        let evolution = Evolution {
            trajectory,
            final_t: t,
            final_y: ws.y.to_owned(),
            termination,
            sample_count: stats.accepted_steps,
            samples: if self.config.keep_samples {
                Some(samples)
            } else {
                None
            },
            stats,
        };
        self.workspace = Some(ws);
        Ok(evolution)
    }
}
