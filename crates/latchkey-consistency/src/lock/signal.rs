//! Single-use cancellation signal
//!
//! One [`CancelSignal`] is created per successful acquisition and shared by the
//! renewal task, the watch task and `unlock`. Firing it is idempotent and safe
//! from any number of tasks at once: the first `cancel` wins, later calls are
//! no-ops. Callers observe it through [`LeadershipLost`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

#[derive(Debug)]
struct SignalInner {
    fired: AtomicBool,
    tx: watch::Sender<bool>,
}

/// Idempotently closable cancellation primitive
#[derive(Clone, Debug)]
pub struct CancelSignal {
    inner: Arc<SignalInner>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(SignalInner {
                fired: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Fire the signal. Returns `true` only for the call that actually fired it.
    pub fn cancel(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.tx.send_replace(true);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Resolve once the signal has fired
    pub async fn cancelled(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once fired
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Observer handle for callers
    pub fn subscribe(&self) -> LeadershipLost {
        LeadershipLost {
            rx: self.inner.tx.subscribe(),
        }
    }
}

/// Notification that leadership has ended
///
/// Returned by [`Lock::lock`](super::Lock::lock). It fires when the lock is
/// released with `unlock`, when the watch loop detects that another holder
/// took over, or when the watch loop runs out of its failure budget. It
/// carries no reason.
#[derive(Clone, Debug)]
pub struct LeadershipLost {
    rx: watch::Receiver<bool>,
}

impl LeadershipLost {
    pub fn is_lost(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until leadership ends.
    ///
    /// Also returns if every handle able to fire the signal has been dropped.
    pub async fn lost(&mut self) {
        let _ = self.rx.wait_for(|lost| *lost).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let signal = CancelSignal::new();
        let lost = signal.subscribe();
        assert!(!signal.is_cancelled());
        assert!(!lost.is_lost());

        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(signal.is_cancelled());
        assert!(lost.is_lost());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancel_fires_once() {
        let signal = CancelSignal::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.cancel() })
            })
            .collect();

        let mut fired = 0;
        for handle in handles {
            if handle.await.unwrap() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[tokio::test]
    async fn test_waiters_wake_on_cancel() {
        let signal = CancelSignal::new();
        let mut lost = signal.subscribe();

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled() did not wake")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), lost.lost())
            .await
            .expect("lost() did not wake");
    }

    #[tokio::test]
    async fn test_cancelled_after_fire_returns_immediately() {
        let signal = CancelSignal::new();
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_signal_releases_waiters() {
        let signal = CancelSignal::new();
        let mut lost = signal.subscribe();
        drop(signal);

        tokio::time::timeout(Duration::from_millis(100), lost.lost())
            .await
            .unwrap();
        assert!(!lost.is_lost());
    }
}
