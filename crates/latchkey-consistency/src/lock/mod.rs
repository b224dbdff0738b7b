//! Storage-backed leader election lock
//!
//! This module provides:
//! - Lock record data model and tunables
//! - JSON codec for the record stored in the object store
//! - Single-use cancellation signal shared by the background loops
//! - The lock state machine itself

pub mod codec;
mod model;
mod service;
mod signal;

pub use model::*;
pub use service::{Lock, LockBuilder};
pub use signal::{CancelSignal, LeadershipLost};
