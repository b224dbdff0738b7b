//! Lock state machine
//!
//! A [`Lock`] is a single-use handle on one key:
//!
//! 1. `lock` loops read → conditional write until the write lands or the
//!    caller's stop future resolves.
//! 2. Once held, a renewal task rewrites the record every `renew_interval` and
//!    a watch task re-reads it every `watch_interval`. Renewal only ever
//!    writes over the version it just read; it never recreates a missing
//!    record.
//! 3. The watch task is the only authority on loss. It fires the shared
//!    [`CancelSignal`] when another identity owns the record, when the record
//!    is gone, or when its read failure budget runs out.
//! 4. `unlock` fires the same signal, waits for both tasks to stop, and
//!    deletes the record if it still carries this handle's identity. Store
//!    failures at that point are logged; the record is left to expire.
//!
//! Mutual exclusion comes from the store's CAS guarantee alone: every write is
//! either create-if-absent or conditioned on the version token just read.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use latchkey_common::{PermitPool, StoreError};
use latchkey_persistence::{Condition, DeleteOutcome, ObjectStore, WriteOutcome};

use super::codec;
use super::model::{LockOptions, LockRecord, LockState, ObservedRecord};
use super::signal::{CancelSignal, LeadershipLost};
use crate::error::LockError;
use crate::observer::{LockObserver, LockOperation, NoopObserver, RenewOutcome};

const MIN_TICK: Duration = Duration::from_millis(1);

/// Everything the background tasks need, and nothing else
struct LockContext {
    key: String,
    value: String,
    identity: String,
    store: Arc<dyn ObjectStore>,
    gate: PermitPool,
    options: LockOptions,
    observer: Arc<dyn LockObserver>,
    phase: AtomicU8,
}

#[derive(Default)]
struct HeldState {
    held: bool,
    signal: Option<CancelSignal>,
    renew_task: Option<JoinHandle<()>>,
    watch_task: Option<JoinHandle<()>>,
}

/// Storage-backed leader election lock
///
/// Each handle mints its own holder identity and can be acquired at most
/// once. Build a new handle for the next election round.
pub struct Lock {
    ctx: Arc<LockContext>,
    state: Mutex<HeldState>,
}

/// Builder for [`Lock`]
pub struct LockBuilder {
    key: String,
    value: String,
    store: Arc<dyn ObjectStore>,
    gate: Option<PermitPool>,
    options: LockOptions,
    observer: Arc<dyn LockObserver>,
}

impl LockBuilder {
    /// Share a concurrency gate with other locks on the same store
    pub fn gate(mut self, gate: PermitPool) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn options(mut self, options: LockOptions) -> Self {
        self.options = options;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LockObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> Lock {
        let ctx = LockContext {
            key: self.key,
            value: self.value,
            identity: Uuid::new_v4().to_string(),
            store: self.store,
            gate: self.gate.unwrap_or_default(),
            options: self.options,
            observer: self.observer,
            phase: AtomicU8::new(LockState::Idle.as_u8()),
        };
        Lock {
            ctx: Arc::new(ctx),
            state: Mutex::new(HeldState::default()),
        }
    }
}

impl Lock {
    pub fn builder(
        key: impl Into<String>,
        value: impl Into<String>,
        store: Arc<dyn ObjectStore>,
    ) -> LockBuilder {
        LockBuilder {
            key: key.into(),
            value: value.into(),
            store,
            gate: None,
            options: LockOptions::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn key(&self) -> &str {
        &self.ctx.key
    }

    /// Holder identity written into every record of this handle
    pub fn identity(&self) -> &str {
        &self.ctx.identity
    }

    pub fn options(&self) -> &LockOptions {
        &self.ctx.options
    }

    pub fn state(&self) -> LockState {
        self.ctx.phase()
    }

    /// Whether this handle acquired the lock and has not released it.
    ///
    /// Stays `true` after the watch loop declares loss, until `unlock` runs.
    /// Does not wait for an acquisition in progress.
    pub async fn is_held(&self) -> bool {
        self.state.lock().await.held
    }

    /// Block until the lock is acquired or `stop` resolves.
    ///
    /// Returns `Ok(Some(_))` with a loss notification once acquired and
    /// `Ok(None)` if `stop` resolved first. A transport error from the store
    /// aborts the attempt and is returned; retrying is up to the caller.
    pub async fn lock<F>(&self, stop: F) -> Result<Option<LeadershipLost>, LockError>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let result = self.lock_inner(stop).await;
        self.ctx.observer.operation(
            LockOperation::Lock,
            &self.ctx.key,
            started.elapsed(),
            result.is_ok(),
        );
        result
    }

    async fn lock_inner<F>(&self, stop: F) -> Result<Option<LeadershipLost>, LockError>
    where
        F: Future<Output = ()>,
    {
        {
            let state = self.state.lock().await;
            if state.held {
                return Err(LockError::AlreadyHeld);
            }
            match self.ctx.phase() {
                LockState::Acquiring => return Err(LockError::AlreadyHeld),
                phase if phase.is_terminal() => return Err(LockError::Retired),
                _ => {}
            }
            self.ctx.set_phase(LockState::Acquiring);
        }

        // The state guard is not held across the retry loop, so `is_held` and
        // `unlock` stay responsive. Any exit before `Held` goes back to `Idle`.
        let _reset = PhaseReset(self.ctx.as_ref());
        debug!(key = %self.ctx.key, identity = %self.ctx.identity, "acquiring lock");

        match self.ctx.attempt_lock(stop).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(key = %self.ctx.key, "lock acquisition stopped by caller");
                return Ok(None);
            }
            Err(e) => {
                warn!(key = %self.ctx.key, error = %e, "lock acquisition failed");
                return Err(e);
            }
        }

        let mut state = self.state.lock().await;
        let signal = CancelSignal::new();
        let lost = signal.subscribe();
        self.ctx.set_phase(LockState::Held);
        state.held = true;
        state.renew_task = Some(tokio::spawn(renew_loop(self.ctx.clone(), signal.clone())));
        state.watch_task = Some(tokio::spawn(watch_loop(self.ctx.clone(), signal.clone())));
        state.signal = Some(signal);

        info!(key = %self.ctx.key, identity = %self.ctx.identity, "lock acquired");
        Ok(Some(lost))
    }

    /// Release the lock. A no-op if it is not held.
    ///
    /// The record is deleted only if it still carries this handle's identity,
    /// conditioned on the version just read. Losing that race is not an error,
    /// and neither is a store failure: it is logged and the record expires on
    /// its own. The handle is released either way.
    pub async fn unlock(&self) -> Result<(), LockError> {
        let started = Instant::now();
        let result = self.unlock_inner().await;
        self.ctx.observer.operation(
            LockOperation::Unlock,
            &self.ctx.key,
            started.elapsed(),
            result.is_ok(),
        );
        result
    }

    async fn unlock_inner(&self) -> Result<(), LockError> {
        let mut state = self.state.lock().await;
        if !state.held {
            return Ok(());
        }

        if let Some(signal) = &state.signal {
            signal.cancel();
        }
        // An in-flight renewal must land before we read the version to delete
        for task in [state.renew_task.take(), state.watch_task.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = task.await {
                warn!(key = %self.ctx.key, error = %e, "lock background task ended abnormally");
            }
        }

        if let Err(e) = self.ctx.delete_own_record().await {
            warn!(
                key = %self.ctx.key,
                error = %e,
                "failed to delete lock record, leaving it to expire"
            );
        }

        state.held = false;
        state.signal = None;
        self.ctx.transition(LockState::Held, LockState::Released);
        Ok(())
    }

    /// Read the current record regardless of who holds it.
    ///
    /// Returns the record's value if one exists. An unreadable record exists
    /// with an empty value.
    pub async fn value(&self) -> Result<Option<String>, LockError> {
        let started = Instant::now();
        let result = self
            .ctx
            .read_record()
            .await
            .map(|observed| observed.map(|o| o.record.value))
            .map_err(LockError::from);
        self.ctx.observer.operation(
            LockOperation::Value,
            &self.ctx.key,
            started.elapsed(),
            result.is_ok(),
        );
        result
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(signal) = state.signal.take()
            && signal.cancel()
        {
            debug!(key = %self.ctx.key, "lock handle dropped while held, stopping background tasks");
        }
    }
}

impl LockContext {
    fn phase(&self) -> LockState {
        LockState::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: LockState) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    fn transition(&self, from: LockState, to: LockState) -> bool {
        self.phase
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn attempt_lock<F>(&self, stop: F) -> Result<bool, LockError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);
        loop {
            if self.write_lock(None).await? {
                return Ok(true);
            }

            tokio::select! {
                _ = &mut stop => return Ok(false),
                _ = tokio::time::sleep(self.options.retry_interval) => {}
            }
        }
    }

    async fn read_record(&self) -> Result<Option<ObservedRecord>, StoreError> {
        let object = self.gate.run(self.store.get(&self.key)).await?;
        Ok(object.map(|object| ObservedRecord {
            record: codec::decode_lenient(&self.key, &object.payload),
            version: object.version,
        }))
    }

    async fn delete_own_record(&self) -> Result<(), StoreError> {
        match self.read_record().await? {
            Some(observed) if observed.record.is_held_by(&self.identity) => {
                let outcome = self
                    .gate
                    .run(
                        self.store
                            .delete_conditional(&self.key, Condition::MustMatchVersion(observed.version)),
                    )
                    .await?;
                match outcome {
                    DeleteOutcome::Deleted => {
                        info!(key = %self.key, identity = %self.identity, "lock released");
                    }
                    DeleteOutcome::PreconditionFailed => {
                        debug!(key = %self.key, "lock record changed before delete, nothing to release");
                    }
                }
            }
            _ => {
                debug!(key = %self.key, "lock record no longer ours, nothing to delete");
            }
        }
        Ok(())
    }

    /// One read + conditional write round. `Ok(false)` means "not this time".
    ///
    /// `renewal` is the signal of the tenure being renewed. With it set, a
    /// missing record is left missing and the write is skipped once the
    /// signal has fired.
    async fn write_lock(&self, renewal: Option<&CancelSignal>) -> Result<bool, LockError> {
        let condition = match self.read_record().await? {
            Some(observed) => {
                let record = &observed.record;
                if !record.is_held_by(&self.identity) && !record.is_stale(self.options.ttl) {
                    debug!(
                        key = %self.key,
                        holder = %record.holder_identity,
                        age_ms = record.age().as_millis() as u64,
                        "lock held by another instance"
                    );
                    return Ok(false);
                }
                Condition::MustMatchVersion(observed.version)
            }
            None if renewal.is_some() => {
                debug!(key = %self.key, "lock record missing, not recreating it on renewal");
                return Ok(false);
            }
            None => Condition::MustNotExist,
        };

        if renewal.is_some_and(CancelSignal::is_cancelled) {
            return Ok(false);
        }

        let payload = codec::encode(&LockRecord::new(&self.key, &self.value, &self.identity))?;
        let outcome = self
            .gate
            .run(self.store.put_conditional(&self.key, payload, condition))
            .await?;

        match outcome {
            WriteOutcome::Written { version } => {
                debug!(key = %self.key, version = %version, "lock record written");
                Ok(true)
            }
            WriteOutcome::PreconditionFailed => {
                debug!(key = %self.key, "lock record changed concurrently");
                Ok(false)
            }
        }
    }
}

/// Returns an abandoned acquisition to `Idle`
struct PhaseReset<'a>(&'a LockContext);

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        self.0.transition(LockState::Acquiring, LockState::Idle);
    }
}

/// Interval whose first tick is one full period away
fn ticker(period: Duration) -> Interval {
    let period = period.max(MIN_TICK);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn renew_loop(ctx: Arc<LockContext>, signal: CancelSignal) {
    let mut ticker = ticker(ctx.options.renew_interval);

    loop {
        tokio::select! {
            biased;
            _ = signal.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = match ctx.write_lock(Some(&signal)).await {
            Ok(true) => RenewOutcome::Renewed,
            Ok(false) if signal.is_cancelled() => break,
            Ok(false) => {
                warn!(key = %ctx.key, "lock renewal refused");
                RenewOutcome::Refused
            }
            Err(e) => {
                warn!(key = %ctx.key, error = %e, "lock renewal failed");
                RenewOutcome::Failed
            }
        };
        ctx.observer.renewal(&ctx.key, outcome);
    }

    debug!(key = %ctx.key, "renewal loop stopped");
}

async fn watch_loop(ctx: Arc<LockContext>, signal: CancelSignal) {
    let threshold = ctx.options.watch_failure_threshold();
    let mut ticker = ticker(ctx.options.watch_interval);
    let mut failures = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = signal.cancelled() => {
                debug!(key = %ctx.key, "watch loop stopped by release");
                return;
            }
            _ = ticker.tick() => {}
        }

        match ctx.read_record().await {
            Ok(Some(observed)) if observed.record.is_held_by(&ctx.identity) => {
                failures = 0;
            }
            Ok(Some(observed)) => {
                info!(
                    key = %ctx.key,
                    holder = %observed.record.holder_identity,
                    "lock taken over by another instance"
                );
                break;
            }
            Ok(None) => {
                info!(key = %ctx.key, "lock record disappeared");
                break;
            }
            Err(e) => {
                failures += 1;
                warn!(key = %ctx.key, error = %e, consecutive = failures, "failed to verify lock ownership");
                ctx.observer.watch_failure(&ctx.key, failures);
                if failures >= threshold {
                    warn!(key = %ctx.key, failures, "watch failure budget exhausted, giving up leadership");
                    break;
                }
            }
        }
    }

    if signal.cancel() {
        ctx.transition(LockState::Held, LockState::Lost);
        ctx.observer.leadership_lost(&ctx.key);
        info!(key = %ctx.key, identity = %ctx.identity, "leadership lost");
    }
}
