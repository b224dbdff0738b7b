//! HA backend
//!
//! Binds one object store to its HA settings and hands out [`Lock`]s that all
//! share the same concurrency gate and observer.

use std::sync::Arc;

use tracing::{debug, info};

use latchkey_common::PermitPool;
use latchkey_persistence::ObjectStore;

use crate::config::HaConfiguration;
use crate::error::{ConfigError, LockError};
use crate::lock::{Lock, LockOptions};
use crate::observer::{LockObserver, MetricsObserver};

/// Lock factory for one storage backend
#[derive(Clone)]
pub struct HaBackend {
    store: Arc<dyn ObjectStore>,
    gate: PermitPool,
    options: LockOptions,
    ha_enabled: bool,
    observer: Arc<dyn LockObserver>,
}

impl HaBackend {
    pub fn new(store: Arc<dyn ObjectStore>, config: &HaConfiguration) -> Result<Self, ConfigError> {
        let ha_enabled = config.ha_enabled()?;
        let gate = PermitPool::new(config.max_parallel()?);
        let options = config.lock_options()?;

        info!(
            ha_enabled,
            max_parallel = gate.capacity(),
            ttl_ms = options.ttl.as_millis() as u64,
            renew_ms = options.renew_interval.as_millis() as u64,
            watch_ms = options.watch_interval.as_millis() as u64,
            "HA backend configured"
        );

        Ok(Self {
            store,
            gate,
            options,
            ha_enabled,
            observer: Arc::new(MetricsObserver),
        })
    }

    /// Replace the default [`MetricsObserver`] for locks created from now on
    pub fn with_observer(mut self, observer: Arc<dyn LockObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn ha_enabled(&self) -> bool {
        self.ha_enabled
    }

    /// Gate shared by every lock of this backend
    pub fn permit_pool(&self) -> &PermitPool {
        &self.gate
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Shut the backend's gate.
    ///
    /// Every later store call from its locks fails with
    /// [`StoreError::GateClosed`](latchkey_common::StoreError::GateClosed):
    /// pending acquisitions abort, and held locks lose leadership once the
    /// watch failure budget runs out. Calls already in flight finish normally.
    pub fn close(&self) {
        info!("HA backend closed");
        self.gate.close();
    }

    /// Create a lock on `key` advertising `value` to other replicas.
    ///
    /// Fails with [`LockError::HaDisabled`] unless HA was enabled in the
    /// configuration. Nothing is read or written until [`Lock::lock`].
    pub fn lock_with(&self, key: &str, value: &str) -> Result<Lock, LockError> {
        if !self.ha_enabled {
            return Err(LockError::HaDisabled);
        }

        let lock = Lock::builder(key, value, self.store.clone())
            .gate(self.gate.clone())
            .options(self.options)
            .observer(self.observer.clone())
            .build();
        debug!(key = %key, identity = %lock.identity(), "lock created");
        Ok(lock)
    }
}
