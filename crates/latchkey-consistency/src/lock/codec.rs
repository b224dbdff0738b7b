//! Lock record codec
//!
//! Records are stored as JSON. Decoding is lenient on purpose: a payload that
//! cannot be parsed is reported as [`LockRecord::unreadable`] rather than as an
//! error, so a corrupt record only delays acquisition until it can be
//! conditionally overwritten.

use bytes::Bytes;
use tracing::warn;

use super::model::LockRecord;
use crate::error::LockError;

pub fn encode(record: &LockRecord) -> Result<Bytes, LockError> {
    serde_json::to_vec(record)
        .map(Bytes::from)
        .map_err(|e| LockError::Encode(e.to_string()))
}

pub fn decode(payload: &[u8]) -> Result<LockRecord, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Decode `payload`, falling back to [`LockRecord::unreadable`]
pub fn decode_lenient(key: &str, payload: &[u8]) -> LockRecord {
    match decode(payload) {
        Ok(record) => record,
        Err(e) => {
            warn!(key = %key, error = %e, "unreadable lock record, treating as foreign");
            LockRecord::unreadable()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_uses_wire_names() {
        let record = LockRecord::new("core/lock", "10.0.0.1:8200", "abc");
        let bytes = encode(&record).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["key"], "core/lock");
        assert_eq!(json["value"], "10.0.0.1:8200");
        assert_eq!(json["identity"], "abc");
        assert!(json["timestamp"].is_string());
        assert_eq!(decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_decode_written_by_another_replica() {
        let payload = br#"{"key":"core/lock","value":"node-2","identity":"f00","timestamp":"2024-05-01T12:00:00Z"}"#;
        let record = decode(payload).unwrap();
        assert_eq!(record.value, "node-2");
        assert_eq!(record.holder_identity, "f00");
    }

    #[test]
    fn test_lenient_decode_of_garbage() {
        assert_eq!(decode_lenient("k", b"not json"), LockRecord::unreadable());
        assert_eq!(decode_lenient("k", b""), LockRecord::unreadable());
        assert_eq!(
            decode_lenient("k", br#"{"key":"k","value":"v"}"#),
            LockRecord::unreadable()
        );
    }

    proptest! {
        #[test]
        fn prop_lenient_decode_never_panics(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_lenient("k", &payload);
        }
    }
}
