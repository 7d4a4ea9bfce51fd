//! Runge–Kutta embedded pairs.

use lazy_static::lazy_static;
use ndarray::prelude::*;
use ndarray::{aview1, s};
use std::marker::PhantomData;

use crate::error::{try_zeros1, try_zeros2, IntegratorError};
use crate::{Fault, OdeSystem};

/// Computes the next representable floating-point value following `x` in the
/// direction of `y`.
///
/// Special cases:
///
/// * If `x` equals `y`, then `y` is returned.
/// * If `x` or `y` is NAN, a NAN is returned.
///
/// There is no special handling for overflow of finite values to ±∞ or
/// subnormals.
pub(crate) fn next_after(x: f64, y: f64) -> f64 {
    if x.is_nan() || y.is_nan() {
        ::std::f64::NAN
    } else if x == y {
        y
    } else if x == 0. {
        if y < 0. {
            -f64::from_bits(1)
        } else {
            f64::from_bits(1)
        }
    } else if (y > x) == (x > 0.) {
        f64::from_bits(x.to_bits().wrapping_add(1))
    } else {
        f64::from_bits(x.to_bits().wrapping_sub(1))
    }
}

/// Result of one attempted step.
pub(crate) struct StepOutput {
    /// Solution at `t + h` computed with higher accuracy.
    pub y_new: Array1<f64>,
    /// Error estimate of less accurate method.
    pub error: Array1<f64>,
}

/// Single-step engine for the embedded pair `O`.
///
/// Owns the stage storage, shape `O::NUM_STAGES + 1, dim`. The last row holds
/// the derivative at the end of the most recent successful step.
pub(crate) struct Stepper<O: RKMethod> {
    method: PhantomData<O>,
    k: Array2<f64>,
    y_stage: Array1<f64>,
    evaluations: usize,
}

impl<O: RKMethod> Stepper<O> {
    pub fn new(dim: usize) -> Result<Stepper<O>, IntegratorError> {
        Ok(Stepper {
            method: PhantomData,
            k: try_zeros2(O::NUM_STAGES + 1, dim)?,
            y_stage: try_zeros1(dim)?,
            evaluations: 0,
        })
    }

    /// Number of derivative evaluations made by `step` so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Derivative at `t + h` from the last call to `step`.
    pub fn end_deriv(&self) -> ArrayView1<'_, f64> {
        self.k.slice(s![-1, ..])
    }

    /// Perform a single Runge–Kutta step from `(t, y)` with derivative `f`.
    ///
    /// This function computes a prediction of an explicit Runge–Kutta method
    /// and also estimates the error of a less accurate method. Notation for
    /// Butcher tableau is as in (ref 1). The inputs are never modified; a
    /// fault from `system` aborts the step at the failing stage.
    ///
    /// # References
    ///
    /// 1. E. Hairer, S. P. Norsett G. Wanner, "Solving Ordinary Differential
    ///    Equations I: Nonstiff Problems", Sec. II.4.
    pub fn step<S: OdeSystem>(
        &mut self,
        system: &mut S,
        params: &S::Params,
        t: f64,
        y: ArrayView1<'_, f64>,
        f: ArrayView1<'_, f64>,
        h: f64,
    ) -> Result<StepOutput, Fault> {
        self.k.slice_mut(s![0, ..]).assign(&f);
        for (s, (a, c)) in O::a().iter().zip(O::c()).enumerate() {
            let dy = self.k.slice(s![..s + 1, ..]).t().dot(a) * h;
            self.y_stage.assign(&(dy + &y));
            self.evaluations += 1;
            system.derivatives(
                t + c * h,
                self.y_stage.view(),
                self.k.slice_mut(s![s + 1, ..]),
                params,
            )?;
        }

        let y_new = h * self.k.slice(s![..-1, ..]).t().dot(&O::b()) + &y;
        self.evaluations += 1;
        system.derivatives(t + h, y_new.view(), self.k.slice_mut(s![-1, ..]), params)?;

        let error = self.k.t().dot(&O::e()) * h;

        Ok(StepOutput { y_new, error })
    }
}

pub trait RKMethod {
    /// Order of the embedded (error-estimating) formula. The propagated
    /// solution is one order higher.
    const ORDER: usize;

    /// Number of stages in the method.
    const NUM_STAGES: usize;

    /// Coefficients for incrementing time for consecutive RK stages, length
    /// `NUM_STAGES - 1`.
    ///
    /// The value for the first stage is always zero, so it is not included.
    fn c() -> ArrayView1<'static, f64>;

    /// Coefficients for combining previous RK stages to compute the next
    /// stage, length `NUM_STAGES - 1`.
    ///
    /// For explicit methods the coefficients above the main diagonal are
    /// zeros, so `a` is stored as a list of arrays of increasing lengths. The
    /// first stage is always just `f`, thus no coefficients for it are
    /// required.
    fn a() -> &'static [ArrayView1<'static, f64>];

    /// Coefficients for combining RK stages for computing the final
    /// prediction, length `NUM_STAGES`.
    fn b() -> ArrayView1<'static, f64>;

    /// Coefficients for estimating the error of a less accurate method, length
    /// `NUM_STAGES + 1`.
    ///
    /// They are computed as the difference between `b`'s in an extended
    /// tableau. The last entry weights the derivative at `t + h`.
    fn e() -> ArrayView1<'static, f64>;
}

/// Explicit Runge–Kutta method of order 3(2).
///
/// The Bogacki-Shamping pair of formulas is used (ref 1). The error is
/// controlled assuming 2nd order accuracy, but steps are taken using a 3rd
/// oder accurate formula (local extrapolation is done).
///
/// # References
///
/// 1. P. Bogacki, L.F. Shampine, "A 3(2) Pair of Runge-Kutta Formulas",
///    Appl. Math. Lett. Vol. 2, No. 4. pp. 321-325, 1989.
pub struct RK23;

impl RKMethod for RK23 {
    const ORDER: usize = 2;

    const NUM_STAGES: usize = 3;

    fn c() -> ArrayView1<'static, f64> {
        aview1(&[1./2., 3./4.])
    }

    fn a() -> &'static [ArrayView1<'static, f64>] {
        lazy_static! {
            static ref A: [ArrayView1<'static, f64>; 3 - 1] = [
                aview1(&[1./2.]),
                aview1(&[0., 3./4.]),
            ];
        }
        &*A
    }

    fn b() -> ArrayView1<'static, f64> {
        aview1(&[2./9., 1./3., 4./9.])
    }

    fn e() -> ArrayView1<'static, f64> {
        aview1(&[5./72., -1./12., -1./9., 1./8.])
    }
}

/// Explicit Runge–Kutta method of order 5(4).
///
/// The Dormand-Prince pair of formulas is used (ref 1). The error is
/// controlled assuming 4th order accuracy, but steps are taken using a 5th
/// oder accurate formula (local extrapolation is done).
///
/// # References
///
/// 1. J. R. Dormand, P. J. Prince, "A family of embedded Runge-Kutta
///    formulae", Journal of Computational and Applied Mathematics, Vol. 6, No.
///    1, pp. 19-26, 1980.
pub struct RK45;

impl RKMethod for RK45 {
    const ORDER: usize = 4;

    const NUM_STAGES: usize = 6;

    fn c() -> ArrayView1<'static, f64> {
        aview1(&[1./5., 3./10., 4./5., 8./9., 1.])
    }

    fn a() -> &'static [ArrayView1<'static, f64>] {
        lazy_static! {
            static ref A: [ArrayView1<'static, f64>; 6 - 1] = [
                aview1(&[1./5.]),
                aview1(&[3./40., 9./40.]),
                aview1(&[44./45., -56./15., 32./9.]),
                aview1(&[19372./6561., -25360./2187., 64448./6561., -212./729.]),
                aview1(&[9017./3168., -355./33., 46732./5247., 49./176., -5103./18656.]),
            ];
        }
        &*A
    }

    fn b() -> ArrayView1<'static, f64> {
        aview1(&[35./384., 0., 500./1113., 125./192., -2187./6784., 11./84.])
    }

    fn e() -> ArrayView1<'static, f64> {
        aview1(&[-71./57600., 0., 71./16695., -71./1920., 17253./339200., -22./525., 1./40.])
    }
}

/// Runge–Kutta–Fehlberg method of order 4(5).
///
/// Steps are taken with the 5th order formula and the difference to the
/// embedded 4th order formula is used as the error estimate (ref 1). The
/// derivative at `t + h` is not a stage of this method, so its error weight
/// is zero.
///
/// # References
///
/// 1. E. Fehlberg, "Low-order classical Runge-Kutta formulas with stepsize
///    control and their application to some heat transfer problems", NASA
///    Technical Report R-315, 1969.
pub struct RKF45;

impl RKMethod for RKF45 {
    const ORDER: usize = 4;

    const NUM_STAGES: usize = 6;

    fn c() -> ArrayView1<'static, f64> {
        aview1(&[1./4., 3./8., 12./13., 1., 1./2.])
    }

    fn a() -> &'static [ArrayView1<'static, f64>] {
        lazy_static! {
            static ref A: [ArrayView1<'static, f64>; 6 - 1] = [
                aview1(&[1./4.]),
                aview1(&[3./32., 9./32.]),
                aview1(&[1932./2197., -7200./2197., 7296./2197.]),
                aview1(&[439./216., -8., 3680./513., -845./4104.]),
                aview1(&[-8./27., 2., -3544./2565., 1859./4104., -11./40.]),
            ];
        }
        &*A
    }

    fn b() -> ArrayView1<'static, f64> {
        aview1(&[16./135., 0., 6656./12825., 28561./56430., -9./50., 2./55.])
    }

    fn e() -> ArrayView1<'static, f64> {
        aview1(&[1./360., 0., -128./4275., -2197./75240., 1./50., 2./55., 0.])
    }
}
