//! Observability hooks for locks
//!
//! A [`LockObserver`] is handed to each lock when it is built, so different
//! backends in one process can report to different sinks. Every hook has an
//! empty default body.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Public lock operations that are timed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOperation {
    Lock,
    Unlock,
    Value,
}

impl LockOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            LockOperation::Lock => "lock",
            LockOperation::Unlock => "unlock",
            LockOperation::Value => "value",
        }
    }
}

/// Result of one renewal round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    /// The store refused the write, or a fresh foreign record was found
    Refused,
    /// Transport or encoding failure
    Failed,
}

impl RenewOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RenewOutcome::Renewed => "renewed",
            RenewOutcome::Refused => "refused",
            RenewOutcome::Failed => "failed",
        }
    }
}

/// Receives lock lifecycle events
pub trait LockObserver: Send + Sync {
    /// A public operation finished
    fn operation(&self, _op: LockOperation, _key: &str, _elapsed: Duration, _success: bool) {}

    /// A renewal round finished
    fn renewal(&self, _key: &str, _outcome: RenewOutcome) {}

    /// The watch loop failed to read the record
    fn watch_failure(&self, _key: &str, _consecutive: u32) {}

    /// The watch loop declared leadership lost
    fn leadership_lost(&self, _key: &str) {}
}

/// Observer that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LockObserver for NoopObserver {}

/// Observer publishing through the `metrics` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl MetricsObserver {
    /// Register metric descriptions with the installed recorder
    pub fn describe() {
        describe_histogram!(
            "latchkey_lock_operation_seconds",
            "Duration of lock, unlock and value calls in seconds"
        );
        describe_counter!(
            "latchkey_lock_operation_errors_total",
            "Total number of lock operations that returned an error"
        );
        describe_counter!(
            "latchkey_lock_renewals_total",
            "Total number of lock renewal rounds by outcome"
        );
        describe_counter!(
            "latchkey_lock_watch_failures_total",
            "Total number of failed ownership checks"
        );
        describe_counter!(
            "latchkey_lock_lost_total",
            "Total number of times leadership was declared lost"
        );
    }
}

impl LockObserver for MetricsObserver {
    fn operation(&self, op: LockOperation, _key: &str, elapsed: Duration, success: bool) {
        histogram!("latchkey_lock_operation_seconds", "op" => op.as_str()).record(elapsed.as_secs_f64());
        if !success {
            counter!("latchkey_lock_operation_errors_total", "op" => op.as_str()).increment(1);
        }
    }

    fn renewal(&self, _key: &str, outcome: RenewOutcome) {
        counter!("latchkey_lock_renewals_total", "outcome" => outcome.as_str()).increment(1);
    }

    fn watch_failure(&self, _key: &str, _consecutive: u32) {
        counter!("latchkey_lock_watch_failures_total").increment(1);
    }

    fn leadership_lost(&self, key: &str) {
        counter!("latchkey_lock_lost_total", "key" => key.to_string()).increment(1);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Observer that records every event, for assertions
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub(crate) operations: Mutex<Vec<(LockOperation, bool)>>,
        pub(crate) renewals: Mutex<Vec<RenewOutcome>>,
        pub(crate) watch_failures: Mutex<Vec<u32>>,
        pub(crate) lost: Mutex<u32>,
    }

    impl LockObserver for RecordingObserver {
        fn operation(&self, op: LockOperation, _key: &str, _elapsed: Duration, success: bool) {
            self.operations.lock().unwrap().push((op, success));
        }

        fn renewal(&self, _key: &str, outcome: RenewOutcome) {
            self.renewals.lock().unwrap().push(outcome);
        }

        fn watch_failure(&self, _key: &str, consecutive: u32) {
            self.watch_failures.lock().unwrap().push(consecutive);
        }

        fn leadership_lost(&self, _key: &str) {
            *self.lost.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_metrics_observer_without_recorder() {
        // With no recorder installed the macros are no-ops
        MetricsObserver::describe();
        let observer = MetricsObserver;
        observer.operation(LockOperation::Lock, "k", Duration::from_millis(3), true);
        observer.operation(LockOperation::Unlock, "k", Duration::from_millis(3), false);
        observer.renewal("k", RenewOutcome::Refused);
        observer.watch_failure("k", 1);
        observer.leadership_lost("k");
    }

    #[test]
    fn test_labels() {
        assert_eq!(LockOperation::Value.as_str(), "value");
        assert_eq!(RenewOutcome::Failed.as_str(), "failed");
    }
}
