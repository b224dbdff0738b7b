//! Bounded concurrency gate
//!
//! Every call to a remote store goes through a [`PermitPool`]. The pool is a
//! counting semaphore shared by all locks created against the same backend, so
//! the background renewal and watch loops of many locks cannot flood the store
//! with concurrent requests.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::DEFAULT_PARALLEL_OPERATIONS;
use crate::error::StoreError;

/// Counting semaphore guarding backend calls
#[derive(Clone, Debug)]
pub struct PermitPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot in a [`PermitPool`], released on drop
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl Default for PermitPool {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLEL_OPERATIONS)
    }
}

impl PermitPool {
    /// Create a pool with `capacity` slots. Zero falls back to the default.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_PARALLEL_OPERATIONS
        } else {
            capacity
        };
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<Permit, StoreError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::GateClosed)?;
        Ok(Permit { _permit: permit })
    }

    /// Run `op` while holding a slot.
    ///
    /// The slot is returned when `op` completes, on the error path as well.
    pub async fn run<F, T>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let _permit = self.acquire().await?;
        op.await
    }

    /// Number of slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse all future acquisitions. Outstanding permits stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_uses_default() {
        let pool = PermitPool::new(0);
        assert_eq!(pool.capacity(), DEFAULT_PARALLEL_OPERATIONS);
        assert_eq!(pool.available(), DEFAULT_PARALLEL_OPERATIONS);
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let pool = PermitPool::new(2);
        let first = pool.acquire().await.unwrap();
        let _second = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(first);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_run_releases_on_error() {
        let pool = PermitPool::new(1);
        let result: Result<(), StoreError> = pool
            .run(async { Err(StoreError::Transport("boom".to_string())) })
            .await;

        assert!(result.is_err());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let pool = PermitPool::new(1);
        pool.close();
        assert_eq!(pool.acquire().await.unwrap_err(), StoreError::GateClosed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let pool = PermitPool::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = pool.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.available(), 3);
    }
}
