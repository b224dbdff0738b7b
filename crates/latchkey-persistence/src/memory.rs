//! In-memory object store with CAS semantics
//!
//! Version tokens are drawn from a single monotonically increasing generation
//! counter, so a token is never reused for the same key even after a delete.
//! Fault injection and call counters let tests drive the lock through
//! transport failures and observe exactly which calls it made.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use latchkey_common::StoreError;

use crate::store::{Condition, DeleteOutcome, ObjectStore, StoredObject, VersionToken, WriteOutcome};

#[derive(Default)]
struct Faults {
    fail_reads: AtomicU32,
    fail_writes: AtomicU32,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct CallStats {
    gets: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
}

/// In-memory [`ObjectStore`]
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, StoredObject>,
    generation: AtomicU64,
    faults: Faults,
    stats: CallStats,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> VersionToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        VersionToken::new(generation.to_string())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Unconditionally write `payload` at `key`, bypassing faults and counters
    pub fn seed(&self, key: &str, payload: impl Into<Bytes>) -> VersionToken {
        let version = self.next_version();
        self.objects.insert(
            key.to_string(),
            StoredObject {
                payload: payload.into(),
                version: version.clone(),
            },
        );
        version
    }

    /// Unconditionally remove `key`, as an operator or another system would
    pub fn remove(&self, key: &str) -> bool {
        self.objects.remove(key).is_some()
    }

    /// Current object at `key`, bypassing faults and counters
    pub fn peek(&self, key: &str) -> Option<StoredObject> {
        self.objects.get(key).map(|o| o.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Make the next `n` reads fail with a transport error
    pub fn fail_next_reads(&self, n: u32) {
        self.faults.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` writes and deletes fail with a transport error
    pub fn fail_next_writes(&self, n: u32) {
        self.faults.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Fail every call until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u64 {
        self.stats.gets.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> u64 {
        self.stats.puts.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.stats.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        self.stats.gets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if Self::take_fault(&self.faults.fail_reads) {
            return Err(StoreError::Transport(format!("injected read failure for {key}")));
        }

        Ok(self.objects.get(key).map(|o| o.clone()))
    }

    async fn put_conditional(
        &self,
        key: &str,
        payload: Bytes,
        condition: Condition,
    ) -> Result<WriteOutcome, StoreError> {
        self.stats.puts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if Self::take_fault(&self.faults.fail_writes) {
            return Err(StoreError::Transport(format!("injected write failure for {key}")));
        }

        let outcome = match (self.objects.entry(key.to_string()), condition) {
            (Entry::Vacant(entry), Condition::MustNotExist) => {
                let version = self.next_version();
                entry.insert(StoredObject {
                    payload,
                    version: version.clone(),
                });
                WriteOutcome::Written { version }
            }
            (Entry::Occupied(mut entry), Condition::MustMatchVersion(expected))
                if entry.get().version == expected =>
            {
                let version = self.next_version();
                entry.insert(StoredObject {
                    payload,
                    version: version.clone(),
                });
                WriteOutcome::Written { version }
            }
            _ => WriteOutcome::PreconditionFailed,
        };

        debug!(key = %key, written = outcome.is_written(), "conditional put");
        Ok(outcome)
    }

    async fn delete_conditional(
        &self,
        key: &str,
        condition: Condition,
    ) -> Result<DeleteOutcome, StoreError> {
        self.stats.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if Self::take_fault(&self.faults.fail_writes) {
            return Err(StoreError::Transport(format!("injected delete failure for {key}")));
        }

        let outcome = match condition {
            Condition::MustNotExist => {
                if self.objects.contains_key(key) {
                    DeleteOutcome::PreconditionFailed
                } else {
                    DeleteOutcome::Deleted
                }
            }
            Condition::MustMatchVersion(expected) => {
                match self.objects.remove_if(key, |_, o| o.version == expected) {
                    Some(_) => DeleteOutcome::Deleted,
                    None => DeleteOutcome::PreconditionFailed,
                }
            }
        };

        debug!(key = %key, ?outcome, "conditional delete");
        Ok(outcome)
    }
}
