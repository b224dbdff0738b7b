//! Latchkey Common - Shared types and utilities
//!
//! This crate provides the foundational pieces used across all Latchkey components:
//! - Store error taxonomy
//! - Bounded concurrency gate for backend calls
//! - Duration parsing helpers
//! - Logging bootstrap

pub mod error;
pub mod logging;
pub mod permit;
pub mod utils;

// Re-exports for convenience
pub use error::StoreError;
pub use logging::init_logging;
pub use permit::{Permit, PermitPool};
pub use utils::parse_duration;

/// Default number of concurrent backend operations allowed through a gate
pub const DEFAULT_PARALLEL_OPERATIONS: usize = 128;
