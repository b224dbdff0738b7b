//! Latchkey Consistency - Storage-backed leader election
//!
//! This crate provides:
//! - The lock record data model and its codec
//! - The lock state machine (acquire, renew, watch, release)
//! - An HA backend that hands out locks sharing one store and one concurrency gate
//! - HA configuration loading
//! - Injectable observability hooks
//!
//! Coordination happens entirely through conditional writes against an
//! [`ObjectStore`](latchkey_persistence::ObjectStore); replicas never talk to
//! each other directly.

pub mod backend;
pub mod config;
pub mod error;
pub mod lock;
pub mod observer;

pub use backend::HaBackend;
pub use crate::config::HaConfiguration;
pub use error::{ConfigError, LockError};
pub use lock::{
    CancelSignal, LeadershipLost, Lock, LockBuilder, LockOptions, LockRecord, LockState,
    ObservedRecord,
};
pub use observer::{LockObserver, LockOperation, MetricsObserver, NoopObserver, RenewOutcome};
