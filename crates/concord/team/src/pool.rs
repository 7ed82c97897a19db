//! Shared ATP pool with conservation invariants.

use serde::{Deserialize, Serialize};

use crate::error::TeamError;

/// Team-level resource budget. `0 <= balance <= max` always holds; debits
/// fail atomically rather than overdrawing, and credits saturate at `max`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AtpPool {
    pub balance: f64,
    pub max: f64,
    pub discharged_total: f64,
}

impl AtpPool {
    pub fn new(balance: f64, max: f64) -> Self {
        Self {
            balance: balance.clamp(0.0, max),
            max,
            discharged_total: 0.0,
        }
    }

    pub fn ratio(&self) -> f64 {
        if self.max <= 0.0 {
            0.0
        } else {
            self.balance / self.max
        }
    }

    /// A debit must leave the pool strictly positive; draining the exact
    /// balance counts as exhaustion.
    pub fn can_afford(&self, cost: f64) -> bool {
        self.balance > cost
    }

    /// Check-and-debit in one step. On failure the pool is untouched.
    pub fn debit(&mut self, cost: f64) -> Result<(), TeamError> {
        if !self.can_afford(cost) {
            return Err(TeamError::InsufficientResource {
                available: self.balance,
                required: cost,
            });
        }
        self.balance -= cost;
        self.discharged_total += cost;
        Ok(())
    }

    /// Recharge, saturating at `max` and never below zero.
    pub fn credit(&mut self, amount: f64) {
        self.balance = (self.balance + amount.max(0.0)).min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn debit_fails_without_mutation_when_exhausted() {
        let mut pool = AtpPool::new(10.0, 100.0);
        let err = pool.debit(25.0).unwrap_err();
        assert!(matches!(
            err,
            TeamError::InsufficientResource { available, required }
                if available == 10.0 && required == 25.0
        ));
        assert_eq!(pool.balance, 10.0);
        assert_eq!(pool.discharged_total, 0.0);
    }

    #[test]
    fn debit_of_the_entire_balance_is_exhaustion() {
        let mut pool = AtpPool::new(25.0, 100.0);
        let err = pool.debit(25.0).unwrap_err();
        assert!(matches!(
            err,
            TeamError::InsufficientResource { available, required }
                if available == 25.0 && required == 25.0
        ));
        assert_eq!(pool.balance, 25.0);
    }

    #[test]
    fn credit_saturates_at_max() {
        let mut pool = AtpPool::new(90.0, 100.0);
        pool.credit(50.0);
        assert_eq!(pool.balance, 100.0);
    }

    proptest! {
        #[test]
        fn balance_stays_within_bounds(
            ops in proptest::collection::vec((any::<bool>(), 0.0f64..200.0), 0..128)
        ) {
            let mut pool = AtpPool::new(100.0, 100.0);
            for (is_debit, amount) in ops {
                if is_debit {
                    let _ = pool.debit(amount);
                } else {
                    pool.credit(amount);
                }
                prop_assert!(pool.balance >= 0.0);
                prop_assert!(pool.balance <= pool.max);
            }
        }
    }
}
