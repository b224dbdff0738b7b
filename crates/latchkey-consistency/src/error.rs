//! Error types for locking and HA configuration

use latchkey_common::StoreError;

/// Errors returned by [`Lock`](crate::lock::Lock) operations
///
/// Losing a CAS race is never an error. It shows up as "not acquired" from
/// `lock` and is swallowed by `unlock`.
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("lock already held")]
    AlreadyHeld,

    #[error("lock handle already released; create a new lock to acquire again")]
    Retired,

    #[error("high availability is not enabled for this backend")]
    HaDisabled,

    #[error("failed to encode lock record: {0}")]
    Encode(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while loading or validating HA configuration
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: String, reason: String },

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
