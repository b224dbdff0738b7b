//! Latchkey Persistence - Object store abstraction
//!
//! This crate provides:
//! - The conditional (CAS) object store contract the lock is written against
//! - An in-memory implementation used for single-process deployments and tests

pub mod memory;
pub mod store;

pub use memory::MemoryObjectStore;
pub use store::{Condition, DeleteOutcome, ObjectStore, StoredObject, VersionToken, WriteOutcome};
