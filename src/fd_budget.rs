//! Process-wide bound on concurrently open file descriptors
//!
//! A counting permit pool with two acquisition protocols:
//! - [`FdBudget::try_acquire`] claims `n` permits at once or nothing at all
//! - [`FdBudget::acquire`] waits for a single permit
//!
//! Permits are returned when the [`FdPermit`] is dropped, so every exit path
//! of a stage (success, failure, abandoned branch) releases what it holds.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_FD_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum FdBudgetError {
    #[error("file descriptor budget closed")]
    Closed,
}

/// Bounded permit pool shared by every stage of a build
#[derive(Debug, Clone)]
pub struct FdBudget {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// Permits held against an [`FdBudget`]; released on drop
#[derive(Debug)]
pub struct FdPermit {
    permit: OwnedSemaphorePermit,
}

impl FdPermit {
    pub fn count(&self) -> usize {
        self.permit.num_permits()
    }

    /// Return the permits now rather than at end of scope
    pub fn release(self) {}
}

impl FdBudget {
    /// Create a pool with `capacity` permits (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held by callers
    pub fn held(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Claim `n` permits without waiting.
    ///
    /// Succeeds only if all `n` are available right now; a failed attempt
    /// claims nothing.
    pub fn try_acquire(&self, n: usize) -> Option<FdPermit> {
        let n = u32::try_from(n).ok()?;
        self.permits
            .clone()
            .try_acquire_many_owned(n)
            .ok()
            .map(|permit| FdPermit { permit })
    }

    /// Wait for exactly one permit
    pub async fn acquire(&self) -> Result<FdPermit, FdBudgetError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map(|permit| FdPermit { permit })
            .map_err(|_| FdBudgetError::Closed)
    }
}

impl Default for FdBudget {
    fn default() -> Self {
        Self::new(DEFAULT_FD_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_capacity() {
        let budget = FdBudget::default();
        assert_eq!(budget.capacity(), 10);
        assert_eq!(budget.held(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let budget = FdBudget::new(0);
        assert_eq!(budget.capacity(), 1);
        assert!(budget.try_acquire(1).is_some());
    }

    #[test]
    fn test_try_acquire_all_or_nothing() {
        let budget = FdBudget::new(4);

        let first = budget.try_acquire(3).unwrap();
        assert_eq!(first.count(), 3);
        assert_eq!(budget.held(), 3);

        // Only one permit left: a request for two must leave the count untouched
        assert!(budget.try_acquire(2).is_none());
        assert_eq!(budget.held(), 3);

        let second = budget.try_acquire(1).unwrap();
        assert_eq!(budget.held(), 4);
        assert!(budget.try_acquire(1).is_none());
        assert_eq!(budget.held(), 4);

        drop(first);
        assert_eq!(budget.held(), 1);
        second.release();
        assert_eq!(budget.held(), 0);
    }

    #[test]
    fn test_request_beyond_capacity_fails() {
        let budget = FdBudget::new(2);
        assert!(budget.try_acquire(3).is_none());
        assert!(budget.try_acquire(usize::MAX).is_none());
        assert_eq!(budget.held(), 0);
    }

    #[test]
    fn test_held_never_exceeds_capacity() {
        let budget = FdBudget::new(5);
        let mut held = Vec::new();
        for n in [2, 3, 1, 4, 1, 2, 5] {
            if let Some(permit) = budget.try_acquire(n) {
                held.push(permit);
            }
            assert!(budget.held() <= budget.capacity());
            if held.len() > 1 {
                held.remove(0);
            }
            assert!(budget.held() <= budget.capacity());
        }
        held.clear();
        assert_eq!(budget.held(), 0);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let budget = FdBudget::new(1);
        let held = budget.acquire().await.unwrap();

        let waiter = {
            let budget = budget.clone();
            tokio::spawn(async move { budget.acquire().await.map(|p| p.count()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let count = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(budget.held(), 0);
    }
}
