//! Error types shared by the storage and locking layers
//!
//! A failed precondition on a conditional write or delete is an expected
//! outcome of the CAS protocol and is therefore *not* represented here.
//! Storage implementations report it through their outcome enums instead.

/// Errors raised by an object store or the gate in front of it
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("concurrency gate closed")]
    GateClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Transport("connection reset".to_string());
        assert_eq!(err.to_string(), "transport error: connection reset");
        assert_eq!(StoreError::GateClosed.to_string(), "concurrency gate closed");
    }
}
