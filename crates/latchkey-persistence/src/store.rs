//! Conditional object store contract
//!
//! The lock only needs three operations from its backing store: a read that
//! returns an opaque version token, and a write and a delete that are both
//! guarded by a [`Condition`]. A failed condition is reported as an outcome,
//! never as a [`StoreError`], so callers can tell contention from transport
//! trouble.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use latchkey_common::StoreError;

/// Store-assigned CAS token (an ETag, a generation number, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Precondition attached to a write or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The key must be absent
    MustNotExist,
    /// The key must exist with exactly this version
    MustMatchVersion(VersionToken),
}

/// An object as read from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub payload: Bytes,
    pub version: VersionToken,
}

/// Result of a conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { version: VersionToken },
    PreconditionFailed,
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written { .. })
    }
}

/// Result of a conditional delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    PreconditionFailed,
}

/// Object store with conditional writes
///
/// Implementations must make `put_conditional` and `delete_conditional`
/// atomic with respect to their condition: of two racing
/// `MustNotExist` writes against an absent key, exactly one may succeed.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the object at `key`, `Ok(None)` if absent
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Write `payload` at `key` if `condition` holds
    async fn put_conditional(
        &self,
        key: &str,
        payload: Bytes,
        condition: Condition,
    ) -> Result<WriteOutcome, StoreError>;

    /// Delete `key` if `condition` holds.
    ///
    /// `MustNotExist` succeeds trivially on an absent key and fails otherwise.
    async fn delete_conditional(
        &self,
        key: &str,
        condition: Condition,
    ) -> Result<DeleteOutcome, StoreError>;
}
