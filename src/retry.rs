//! Bounded recovery from derivative faults.

/// Budget of step reductions allowed in a row after derivative faults.
///
/// Only faults consume the budget; rejections by the error controller do
/// not. The budget is restored after every accepted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max: usize,
    remaining: usize,
}

impl RetryPolicy {
    pub fn new(max: usize) -> RetryPolicy {
        RetryPolicy {
            max,
            remaining: max,
        }
    }

    /// Consume one retry. Returns `false` once the budget is exhausted.
    pub fn try_consume(&mut self) -> bool {
        if self.remaining == 0 {
            false
        } else {
            self.remaining -= 1;
            true
        }
    }

    pub fn reset(&mut self) {
        self.remaining = self.max;
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_after_max_faults() {
        let mut retries = RetryPolicy::new(2);
        assert!(retries.try_consume());
        assert!(retries.try_consume());
        assert!(!retries.try_consume());
        assert_eq!(retries.remaining(), 0);
    }

    #[test]
    fn reset_restores_budget() {
        let mut retries = RetryPolicy::new(3);
        retries.try_consume();
        retries.try_consume();
        retries.reset();
        assert_eq!(retries.remaining(), 3);
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut retries = RetryPolicy::new(0);
        assert!(!retries.try_consume());
    }
}
