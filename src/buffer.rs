//! Growable storage for accepted samples.

use ndarray::prelude::*;
use ndarray::s;

use crate::error::{try_zeros2, IntegratorError};

/// Accepted `(t, y, dydt)` samples.
///
/// Samples are stored as columns of a `(dim + 1) × capacity` matrix whose
/// row 0 holds the times and rows `1..=dim` the state. The derivative at each
/// sample is kept in a parallel `dim × capacity` matrix. When full, the
/// capacity doubles and the filled columns are copied over unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    data: Array2<f64>,
    derivs: Array2<f64>,
    count: usize,
}

impl SampleBuffer {
    pub fn with_capacity(dim: usize, capacity: usize) -> Result<SampleBuffer, IntegratorError> {
        let capacity = capacity.max(1);
        Ok(SampleBuffer {
            data: try_zeros2(dim + 1, capacity)?,
            derivs: try_zeros2(dim, capacity)?,
            count: 0,
        })
    }

    /// Number of state components per sample.
    pub fn dim(&self) -> usize {
        self.derivs.nrows()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.ncols()
    }

    /// Record a sample, doubling the capacity first if the buffer is full.
    pub fn push(
        &mut self,
        t: f64,
        y: ArrayView1<'_, f64>,
        dydt: ArrayView1<'_, f64>,
    ) -> Result<(), IntegratorError> {
        debug_assert_eq!(y.len(), self.dim());
        debug_assert_eq!(dydt.len(), self.dim());
        if self.count == self.capacity() {
            self.grow()?;
        }
        let mut column = self.data.column_mut(self.count);
        column[0] = t;
        column.slice_mut(s![1..]).assign(&y);
        self.derivs.column_mut(self.count).assign(&dydt);
        self.count += 1;
        Ok(())
    }

    fn grow(&mut self) -> Result<(), IntegratorError> {
        let capacity = self
            .capacity()
            .checked_mul(2)
            .ok_or(IntegratorError::Allocation {
                elements: usize::MAX,
            })?;
        let mut data = try_zeros2(self.data.nrows(), capacity)?;
        let mut derivs = try_zeros2(self.derivs.nrows(), capacity)?;
        data.slice_mut(s![.., ..self.count])
            .assign(&self.data.slice(s![.., ..self.count]));
        derivs
            .slice_mut(s![.., ..self.count])
            .assign(&self.derivs.slice(s![.., ..self.count]));
        log::debug!("sample buffer grown to {} columns", capacity);
        self.data = data;
        self.derivs = derivs;
        Ok(())
    }

    /// Recorded times.
    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.data.slice(s![0, ..self.count])
    }

    /// Recorded values of state component `i`.
    pub fn component(&self, i: usize) -> ArrayView1<'_, f64> {
        self.data.slice(s![i + 1, ..self.count])
    }

    /// Recorded derivatives of state component `i`.
    pub fn component_deriv(&self, i: usize) -> ArrayView1<'_, f64> {
        self.derivs.slice(s![i, ..self.count])
    }

    /// The filled part of the sample matrix, shape `(dim + 1, len)`.
    pub fn samples(&self) -> ArrayView2<'_, f64> {
        self.data.slice(s![.., ..self.count])
    }

    /// Time and state of sample `j`.
    pub fn sample(&self, j: usize) -> (f64, ArrayView1<'_, f64>) {
        assert!(j < self.count, "sample index out of bounds");
        (self.data[[0, j]], self.data.slice(s![1.., j]))
    }

    pub fn last_time(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.data[[0, self.count - 1]])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn growth_preserves_samples() {
        let mut buffer = SampleBuffer::with_capacity(2, 2).unwrap();
        let mut expected = Vec::new();
        for j in 0..9 {
            let t = 0.1 * j as f64 + 1. / 3.;
            let y = array![t.sin(), t.exp()];
            let dydt = array![t.cos(), t.exp()];
            buffer.push(t, y.view(), dydt.view()).unwrap();
            expected.push((t, y, dydt));
        }
        assert_eq!(buffer.len(), 9);
        assert_eq!(buffer.capacity(), 16);
        for (j, (t, y, dydt)) in expected.iter().enumerate() {
            let (t_j, y_j) = buffer.sample(j);
            assert_eq!(t_j, *t);
            assert_eq!(y_j, *y);
            for i in 0..2 {
                assert_eq!(buffer.component_deriv(i)[j], dydt[i]);
            }
        }
    }

    #[test]
    fn capacity_doubles_only_when_full() {
        let mut buffer = SampleBuffer::with_capacity(1, 3).unwrap();
        let y = array![0.];
        for j in 0..3 {
            buffer.push(j as f64, y.view(), y.view()).unwrap();
        }
        assert_eq!(buffer.capacity(), 3);
        buffer.push(3., y.view(), y.view()).unwrap();
        assert_eq!(buffer.capacity(), 6);
    }

    #[test]
    fn views_cover_filled_columns_only() {
        let mut buffer = SampleBuffer::with_capacity(1, 8).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.last_time(), None);
        buffer.push(0.5, array![1.].view(), array![2.].view()).unwrap();
        buffer.push(1.5, array![3.].view(), array![4.].view()).unwrap();
        assert_eq!(buffer.times(), array![0.5, 1.5]);
        assert_eq!(buffer.component(0), array![1., 3.]);
        assert_eq!(buffer.samples().dim(), (2, 2));
        assert_eq!(buffer.last_time(), Some(1.5));
    }

    #[test]
    fn oversized_request_is_an_allocation_error() {
        match SampleBuffer::with_capacity(1, usize::MAX) {
            Err(IntegratorError::Allocation { .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
