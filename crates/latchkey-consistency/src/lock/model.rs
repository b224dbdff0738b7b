//! Lock data model

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use latchkey_persistence::VersionToken;

/// Default lock TTL (15 seconds)
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15);

/// Default interval between renewals of a held lock
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Default interval between acquisition attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default interval between ownership checks of a held lock
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Default failure budget of the watch loop
pub const DEFAULT_WATCH_MAX_FAILURES: u32 = 5;

/// Lifecycle phase of a [`Lock`](super::Lock) handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// Not yet acquired, or the last acquisition was cancelled
    #[default]
    Idle,
    /// Acquisition loop is running
    Acquiring,
    /// Record written and background loops running
    Held,
    /// Voluntarily released through `unlock`
    Released,
    /// Watch loop declared leadership lost
    Lost,
}

impl LockState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            LockState::Idle => 0,
            LockState::Acquiring => 1,
            LockState::Held => 2,
            LockState::Released => 3,
            LockState::Lost => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => LockState::Acquiring,
            2 => LockState::Held,
            3 => LockState::Released,
            4 => LockState::Lost,
            _ => LockState::Idle,
        }
    }

    /// Whether the handle has finished its single acquisition
    pub fn is_terminal(self) -> bool {
        matches!(self, LockState::Released | LockState::Lost)
    }
}

/// Payload written at the lock's key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Logical lock name
    pub key: String,
    /// Caller-supplied payload, e.g. the advertised address of the leader
    pub value: String,
    /// Identity of the handle that wrote the record
    #[serde(rename = "identity")]
    pub holder_identity: String,
    /// Wall-clock time of the last write
    pub timestamp: DateTime<Utc>,
}

impl LockRecord {
    /// Record stamped with the current time
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        holder_identity: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            holder_identity: holder_identity.into(),
            timestamp: Utc::now(),
        }
    }

    /// Stand-in for a payload that could not be decoded.
    ///
    /// It matches no identity and is as old as it can be, so it never blocks
    /// a conditional overwrite.
    pub fn unreadable() -> Self {
        Self {
            key: String::new(),
            value: String::new(),
            holder_identity: String::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Time since the record was written. Zero if the timestamp is in the future.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    /// `now - timestamp >= ttl`
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder_identity == identity
    }
}

/// A decoded record together with the version token it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRecord {
    pub record: LockRecord,
    pub version: VersionToken,
}

/// Timing tunables of a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// How often a held lock rewrites its record
    pub renew_interval: Duration,
    /// How long acquisition waits between attempts
    pub retry_interval: Duration,
    /// Age after which a record may be stolen
    pub ttl: Duration,
    /// How often a held lock checks it still owns the record
    pub watch_interval: Duration,
    /// Failure budget of the watch loop; loss is declared after
    /// `watch_max_failures - 1` consecutive failed reads (at least one)
    pub watch_max_failures: u32,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            renew_interval: DEFAULT_RENEW_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            ttl: DEFAULT_LOCK_TTL,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            watch_max_failures: DEFAULT_WATCH_MAX_FAILURES,
        }
    }
}

impl LockOptions {
    /// Number of consecutive failed reads after which the watch loop gives up
    pub fn watch_failure_threshold(&self) -> u32 {
        self.watch_max_failures.saturating_sub(1).max(1)
    }
}
