//! Dense output: resampling accepted steps onto a uniform grid.
//!
//! The adaptive driver records samples at whatever times the step-size
//! controller picked. Once integration halts, one interpolant per state
//! component is fitted through those samples and evaluated at
//! `t_init + k * delta_t` for `k = 0..n`, where
//! `n = floor((t_final - t_init) / delta_t) + 1`.

use ndarray::prelude::*;
use ndarray::s;

use crate::buffer::SampleBuffer;
use crate::error::{try_zeros2, IntegratorError, InterpolationError};

/// Interpolant used for dense output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Natural cubic spline through the recorded values. Needs 3 knots.
    CubicSpline,
    /// Piecewise cubic Hermite through the recorded values and derivatives.
    /// Needs 2 knots.
    Hermite,
}

impl Interpolation {
    /// Minimum number of knots the interpolant can be built from.
    pub fn min_knots(&self) -> usize {
        match self {
            Interpolation::CubicSpline => 3,
            Interpolation::Hermite => 2,
        }
    }
}

impl Default for Interpolation {
    fn default() -> Interpolation {
        Interpolation::CubicSpline
    }
}

/// A scalar function of time fitted through knots.
pub trait Interpolant {
    fn eval(&self, x: f64) -> f64;
}

/// Index of the knot interval containing `x`, clamped to the end intervals.
fn interval(knots: &[f64], x: f64) -> usize {
    knots
        .partition_point(|&k| k <= x)
        .saturating_sub(1)
        .min(knots.len() - 2)
}

fn check_knots(x: &[f64], required: usize) -> Result<(), InterpolationError> {
    if x.len() < required {
        return Err(InterpolationError::TooFewKnots {
            found: x.len(),
            required,
        });
    }
    if x.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(InterpolationError::NonMonotonicKnots);
    }
    Ok(())
}

/// Natural cubic spline: continuous value, first and second derivative at
/// interior knots, zero second derivative at both ends.
///
/// On interval `i` the spline is
/// `a_i + b_i dx + c_i dx^2 + d_i dx^3` with `dx = x - x_i`.
#[derive(Debug, Clone)]
pub struct NaturalCubicSpline {
    x: Vec<f64>,
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
}

impl NaturalCubicSpline {
    /// Fits the spline through `(x[i], y[i])`. `x` must be strictly
    /// increasing.
    pub fn new(x: &[f64], y: &[f64]) -> Result<NaturalCubicSpline, InterpolationError> {
        debug_assert_eq!(x.len(), y.len());
        check_knots(x, 3)?;
        let n = x.len();
        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();

        // Tridiagonal system for c (half the second derivative); the natural
        // boundary pins c[0] = c[n - 1] = 0.
        let mut lower = vec![0.; n - 1];
        let mut diag = vec![1.; n];
        let mut upper = vec![0.; n - 1];
        let mut rhs = vec![0.; n];
        for i in 1..n - 1 {
            lower[i - 1] = h[i - 1];
            diag[i] = 2. * (h[i - 1] + h[i]);
            upper[i] = h[i];
            rhs[i] = 3. * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
        }
        let c = solve_tridiagonal(&lower, &diag, &upper, &rhs);

        let mut b = Vec::with_capacity(n - 1);
        let mut d = Vec::with_capacity(n - 1);
        for i in 0..n - 1 {
            b.push((y[i + 1] - y[i]) / h[i] - h[i] * (2. * c[i] + c[i + 1]) / 3.);
            d.push((c[i + 1] - c[i]) / (3. * h[i]));
        }

        Ok(NaturalCubicSpline {
            x: x.to_vec(),
            a: y.to_vec(),
            b,
            c,
            d,
        })
    }
}

impl Interpolant for NaturalCubicSpline {
    fn eval(&self, x: f64) -> f64 {
        let i = interval(&self.x, x);
        let dx = x - self.x[i];
        self.a[i] + dx * (self.b[i] + dx * (self.c[i] + dx * self.d[i]))
    }
}

/// Thomas algorithm. The spline systems are strictly diagonally dominant,
/// so no pivoting is needed.
fn solve_tridiagonal(lower: &[f64], diag: &[f64], upper: &[f64], rhs: &[f64]) -> Vec<f64> {
    let n = diag.len();
    let mut c_prime = vec![0.; n];
    let mut d_prime = vec![0.; n];

    c_prime[0] = upper[0] / diag[0];
    d_prime[0] = rhs[0] / diag[0];
    for i in 1..n {
        let denom = diag[i] - lower[i - 1] * c_prime[i - 1];
        if i < n - 1 {
            c_prime[i] = upper[i] / denom;
        }
        d_prime[i] = (rhs[i] - lower[i - 1] * d_prime[i - 1]) / denom;
    }

    let mut x = vec![0.; n];
    x[n - 1] = d_prime[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = d_prime[i] - c_prime[i] * x[i + 1];
    }
    x
}

/// Piecewise cubic Hermite interpolant matching values and first derivatives
/// at every knot.
#[derive(Debug, Clone)]
pub struct CubicHermite {
    x: Vec<f64>,
    y: Vec<f64>,
    dydx: Vec<f64>,
}

impl CubicHermite {
    pub fn new(x: &[f64], y: &[f64], dydx: &[f64]) -> Result<CubicHermite, InterpolationError> {
        debug_assert_eq!(x.len(), y.len());
        debug_assert_eq!(x.len(), dydx.len());
        check_knots(x, 2)?;
        Ok(CubicHermite {
            x: x.to_vec(),
            y: y.to_vec(),
            dydx: dydx.to_vec(),
        })
    }
}

impl Interpolant for CubicHermite {
    fn eval(&self, x: f64) -> f64 {
        let i = interval(&self.x, x);
        let h = self.x[i + 1] - self.x[i];
        let t = (x - self.x[i]) / h;
        let t2 = t * t;
        let t3 = t2 * t;

        let h00 = 2. * t3 - 3. * t2 + 1.;
        let h10 = t3 - 2. * t2 + t;
        let h01 = -2. * t3 + 3. * t2;
        let h11 = t3 - t2;

        h00 * self.y[i] + h10 * h * self.dydx[i] + h01 * self.y[i + 1] + h11 * h * self.dydx[i + 1]
    }
}

/// Trajectory resampled on a uniform grid.
///
/// Row 0 holds the grid times, rows `1..=dim` the interpolated state.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseOutput {
    data: Array2<f64>,
}

impl DenseOutput {
    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.data.nrows() - 1
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.data.row(0)
    }

    /// Interpolated values of state component `i`.
    pub fn component(&self, i: usize) -> ArrayView1<'_, f64> {
        self.data.row(i + 1)
    }

    /// Interpolated state at grid point `k`.
    pub fn state(&self, k: usize) -> ArrayView1<'_, f64> {
        self.data.slice(s![1.., k])
    }

    /// The full `(dim + 1) × len` matrix.
    pub fn as_array(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn into_array(self) -> Array2<f64> {
        self.data
    }
}

fn ordered(v: ArrayView1<'_, f64>, reverse: bool) -> Vec<f64> {
    if reverse {
        v.iter().rev().cloned().collect()
    } else {
        v.to_vec()
    }
}

/// Fits interpolants over a `SampleBuffer` and evaluates them on a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DenseOutputBuilder {
    interpolation: Interpolation,
}

impl DenseOutputBuilder {
    pub fn new(interpolation: Interpolation) -> DenseOutputBuilder {
        DenseOutputBuilder { interpolation }
    }

    /// Number of grid points from `t_init` in steps of `delta_t` that do not
    /// pass `t_final`.
    pub fn grid_len(t_init: f64, t_final: f64, delta_t: f64) -> usize {
        let steps = ((t_final - t_init) / delta_t).floor();
        if steps >= 0. {
            // Saturates for absurd ratios; the allocation then fails cleanly.
            (steps as usize).saturating_add(1)
        } else {
            1
        }
    }

    /// Resample `samples` on `t_init + k * delta_t`, `k = 0..grid_len`, where
    /// the grid ends at or before `t_final`.
    pub fn build(
        &self,
        samples: &SampleBuffer,
        t_init: f64,
        t_final: f64,
        delta_t: f64,
    ) -> Result<DenseOutput, InterpolationError> {
        let required = self.interpolation.min_knots();
        if samples.len() < required {
            return Err(InterpolationError::TooFewKnots {
                found: samples.len(),
                required,
            });
        }

        let n = Self::grid_len(t_init, t_final, delta_t);
        let mut data = try_zeros2(samples.dim() + 1, n).map_err(|err| match err {
            IntegratorError::Allocation { elements } => InterpolationError::Allocation { elements },
            _ => InterpolationError::Allocation { elements: n },
        })?;
        for (k, t) in data.row_mut(0).iter_mut().enumerate() {
            *t = t_init + delta_t * k as f64;
        }

        // Knots must increase; backward runs record decreasing times.
        let reverse = samples.len() > 1 && samples.times()[1] < samples.times()[0];
        let times = ordered(samples.times(), reverse);

        for i in 0..samples.dim() {
            let values = ordered(samples.component(i), reverse);
            let interpolant: Box<dyn Interpolant> = match self.interpolation {
                Interpolation::CubicSpline => Box::new(NaturalCubicSpline::new(&times, &values)?),
                Interpolation::Hermite => {
                    let derivs = ordered(samples.component_deriv(i), reverse);
                    Box::new(CubicHermite::new(&times, &values, &derivs)?)
                }
            };
            let (grid, mut rest) = data.view_mut().split_at(Axis(0), 1);
            let mut row = rest.row_mut(i);
            for (value, &t) in row.iter_mut().zip(grid.row(0)) {
                *value = interpolant.eval(t);
            }
        }

        Ok(DenseOutput { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn spline_reproduces_knots() {
        let x = [0., 0.3, 1.1, 1.5, 2.8];
        let y = [1., -2., 0.5, 4., 3.];
        let spline = NaturalCubicSpline::new(&x, &y).unwrap();
        for (&x, &y) in x.iter().zip(&y) {
            assert!((spline.eval(x) - y).abs() < 1e-12);
        }
    }

    #[test]
    fn spline_is_exact_for_lines() {
        let x = [0., 0.7, 1.0, 2.5, 4.0];
        let y: Vec<f64> = x.iter().map(|&x| 3. * x - 1.).collect();
        let spline = NaturalCubicSpline::new(&x, &y).unwrap();
        for k in 0..=40 {
            let t = 0.1 * k as f64;
            assert!((spline.eval(t) - (3. * t - 1.)).abs() < 1e-12);
        }
    }

    #[test]
    fn spline_has_continuous_slope_at_interior_knots() {
        let x = [0., 1., 2.5, 3.];
        let y = [0., 1., 0., 2.];
        let spline = NaturalCubicSpline::new(&x, &y).unwrap();
        let eps = 1e-6;
        for &k in &x[1..3] {
            let left = (spline.eval(k) - spline.eval(k - eps)) / eps;
            let right = (spline.eval(k + eps) - spline.eval(k)) / eps;
            assert!((left - right).abs() < 1e-4);
        }
    }

    #[test]
    fn spline_needs_three_knots() {
        assert_eq!(
            NaturalCubicSpline::new(&[0., 1.], &[0., 1.]).unwrap_err(),
            InterpolationError::TooFewKnots {
                found: 2,
                required: 3
            }
        );
    }

    #[test]
    fn repeated_knots_are_rejected() {
        assert_eq!(
            NaturalCubicSpline::new(&[0., 1., 1.], &[0., 1., 2.]).unwrap_err(),
            InterpolationError::NonMonotonicKnots
        );
    }

    #[test]
    fn hermite_is_exact_for_cubics() {
        let f = |x: f64| x * x * x - 2. * x;
        let df = |x: f64| 3. * x * x - 2.;
        let x = [-1., 0.5, 2.];
        let y: Vec<f64> = x.iter().map(|&x| f(x)).collect();
        let dy: Vec<f64> = x.iter().map(|&x| df(x)).collect();
        let hermite = CubicHermite::new(&x, &y, &dy).unwrap();
        for k in 0..=30 {
            let t = -1. + 0.1 * k as f64;
            assert!((hermite.eval(t) - f(t)).abs() < 1e-12);
        }
    }

    #[test]
    fn grid_length_counts_both_ends() {
        assert_eq!(DenseOutputBuilder::grid_len(0., 10., 1.), 11);
        assert_eq!(DenseOutputBuilder::grid_len(0., 10.5, 1.), 11);
        assert_eq!(DenseOutputBuilder::grid_len(2., 0., -0.5), 5);
        assert_eq!(DenseOutputBuilder::grid_len(1., 1., 0.1), 1);
    }

    #[test]
    fn builds_grid_from_backward_samples() {
        let mut samples = SampleBuffer::with_capacity(1, 4).unwrap();
        for &t in &[4., 3., 1.5, 0.] {
            samples
                .push(t, array![2. * t].view(), array![2.].view())
                .unwrap();
        }
        let dense = DenseOutputBuilder::new(Interpolation::CubicSpline)
            .build(&samples, 4., 0., -1.)
            .unwrap();
        assert_eq!(dense.len(), 5);
        assert_eq!(dense.times(), array![4., 3., 2., 1., 0.]);
        for (&t, &y) in dense.times().iter().zip(dense.component(0)) {
            assert!((y - 2. * t).abs() < 1e-12);
        }
    }

    #[test]
    fn too_few_samples_for_spline() {
        let mut samples = SampleBuffer::with_capacity(1, 4).unwrap();
        samples.push(0., array![0.].view(), array![1.].view()).unwrap();
        samples.push(1., array![1.].view(), array![1.].view()).unwrap();
        let err = DenseOutputBuilder::new(Interpolation::CubicSpline)
            .build(&samples, 0., 1., 0.5)
            .unwrap_err();
        assert_eq!(
            err,
            InterpolationError::TooFewKnots {
                found: 2,
                required: 3
            }
        );
        let dense = DenseOutputBuilder::new(Interpolation::Hermite)
            .build(&samples, 0., 1., 0.5)
            .unwrap();
        assert!((dense.component(0)[1] - 0.5).abs() < 1e-12);
    }
}
