//! Reminder scheduler.
//!
//! Turns batches of [`ReminderRecord`]s into host notifications. Each
//! record becomes either a chained tokio timer (fire time in the future),
//! an immediate catch-up notification (already due, event still today or
//! later) or nothing (stale, malformed, or already handled this session).
//!
//! Batches are queued and drained by a single processing task that first
//! resolves notification permission. All state sits behind one mutex that
//! is never held across an `.await`; timer tasks keep only a weak reference
//! to the scheduler.

use crate::config::ReminderConfig;
use crate::error::ReminderError;
use crate::reminders::clock::{Clock, SystemClock};
use crate::reminders::index::{ArmedTimer, ReminderIndex};
use crate::reminders::notifier::{Notifier, ReminderNotification};
use crate::reminders::permission::{PermissionGate, PermissionNegotiator, PermissionState};
use crate::reminders::record::{ReminderKey, ReminderRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Context accompanying one `schedule_many` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOptions {
    /// Household the records belong to. Used for log labels only.
    #[serde(default)]
    pub household_id: String,
    /// Pet id → display name lookup. Blank names are ignored.
    #[serde(default)]
    pub pet_names: HashMap<String, String>,
}

impl ScheduleOptions {
    /// Options for a household with no pet-name lookup.
    pub fn new(household_id: impl Into<String>) -> Self {
        Self {
            household_id: household_id.into(),
            pet_names: HashMap::new(),
        }
    }

    /// Add one pet display name.
    pub fn with_pet_name(mut self, pet_id: impl Into<String>, name: impl Into<String>) -> Self {
        self.pet_names.insert(pet_id.into(), name.into());
        self
    }
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderStats {
    /// Armed timers (reminders that have not fired yet).
    pub active_timers: usize,
    /// Distinct `reminder_at` values among armed reminders.
    pub buckets: usize,
    /// Armed timers plus records still waiting in queued batches.
    pub queue_depth: usize,
}

impl ReminderStats {
    /// Diagnostics fields published for these counters.
    pub fn diagnostic_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        fields.insert("reminder_active_timers".to_owned(), self.active_timers.into());
        fields.insert("reminder_buckets".to_owned(), self.buckets.into());
        fields.insert("reminder_queue_depth".to_owned(), self.queue_depth.into());
        fields
    }
}

/// What happened to a single record.
#[derive(Debug)]
pub enum ScheduleOutcome {
    /// A timer for this key is already armed.
    AlreadyScheduled,
    /// The key already fired (or was retired) this session.
    AlreadyCaughtUp,
    /// A timer was armed; `delay_ms` is the first step of the chain.
    Armed { delay_ms: u64 },
    /// Overdue but still relevant: notified immediately.
    CaughtUp,
    /// Overdue and the event is in the past: retired without notifying.
    Stale,
    /// Malformed record, logged and dropped.
    Dropped(ReminderError),
    /// Notification permission is not granted; the record was discarded.
    NotPermitted,
}

#[derive(Debug)]
struct ScheduleBatch {
    records: Vec<ReminderRecord>,
    household_id: String,
}

#[derive(Debug, Default)]
struct SchedulerState {
    index: ReminderIndex,
    known_pet_names: HashMap<String, String>,
    pending: VecDeque<ScheduleBatch>,
    household_id: Option<String>,
    /// Set while a processing task owns the queue.
    processing: bool,
    /// Bumped by `cancel_all` so orphaned processing tasks stand down.
    epoch: u64,
    next_generation: u64,
}

impl SchedulerState {
    fn stats(&self) -> ReminderStats {
        let active_timers = self.index.active_timers();
        let queued: usize = self.pending.iter().map(|batch| batch.records.len()).sum();
        ReminderStats {
            active_timers,
            buckets: self.index.buckets(),
            queue_depth: active_timers + queued,
        }
    }

    fn pet_name_for(&self, record: &ReminderRecord, fallback: &str) -> String {
        record
            .own_pet_name()
            .or_else(|| self.known_pet_names.get(&record.pet_id).map(String::as_str))
            .unwrap_or(fallback)
            .to_owned()
    }
}

struct Inner {
    config: ReminderConfig,
    max_delay_ms: u64,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    permission: PermissionNegotiator,
    state: Mutex<SchedulerState>,
    busy_tx: watch::Sender<bool>,
    stats_tx: watch::Sender<ReminderStats>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit_stats(&self, state: &SchedulerState) {
        self.stats_tx.send_replace(state.stats());
    }

    fn schedule_locked(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        record: ReminderRecord,
    ) -> (ScheduleOutcome, Option<ReminderNotification>) {
        let key = record.key();
        if state.index.is_armed(&key) {
            return (ScheduleOutcome::AlreadyScheduled, None);
        }
        if state.index.is_caught_up(&key) {
            return (ScheduleOutcome::AlreadyCaughtUp, None);
        }

        let Some(fire_at_ms) = record.reminder_at_ms() else {
            let err = ReminderError::InvalidReminderAt {
                key: key.to_string(),
                value: record.reminder_at.clone(),
            };
            warn!(key = %key, pet_id = %record.pet_id, "dropping reminder: {err}");
            return (ScheduleOutcome::Dropped(err), None);
        };

        if fire_at_ms > self.clock.now_ms() {
            let delay_ms = self.arm(state, key, fire_at_ms, Arc::new(record));
            return (ScheduleOutcome::Armed { delay_ms }, None);
        }

        // Overdue: whether to catch up depends on the event's local day.
        state.index.mark_caught_up(&key);
        let Some(event_day) = record.event_day() else {
            let err = ReminderError::InvalidEventDate {
                key: key.to_string(),
                value: record.event_date.clone(),
            };
            warn!(key = %key, pet_id = %record.pet_id, "retiring overdue reminder: {err}");
            return (ScheduleOutcome::Dropped(err), None);
        };

        if event_day < self.clock.today() {
            debug!(key = %key, %event_day, "overdue reminder for past event, not notifying");
            return (ScheduleOutcome::Stale, None);
        }

        let pet_name = state.pet_name_for(&record, &self.config.default_pet_name);
        info!(key = %key, pet_id = %record.pet_id, "reminder overdue, sending catch-up");
        (ScheduleOutcome::CaughtUp, Some(record.notification(&pet_name)))
    }

    /// Arm one chain step for `key`, replacing any existing step.
    ///
    /// The step sleeps for `min(fire_at - now, max_delay)`.
    fn arm(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        key: ReminderKey,
        fire_at_ms: i64,
        record: Arc<ReminderRecord>,
    ) -> u64 {
        let remaining = fire_at_ms.saturating_sub(self.clock.now_ms());
        let delay_ms = u64::try_from(remaining)
            .unwrap_or(0)
            .min(self.max_delay_ms);

        state.next_generation += 1;
        let generation = state.next_generation;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(delay_ms);
        let weak: Weak<Self> = Arc::downgrade(self);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_timer_elapsed(&task_key, generation);
            }
        });

        debug!(key = %key, delay_ms, generation, "reminder timer armed");
        state.index.arm(
            key,
            ArmedTimer {
                abort: handle.abort_handle(),
                generation,
                fire_at_ms,
                record,
            },
        );
        self.emit_stats(state);
        delay_ms
    }

    fn on_timer_elapsed(self: &Arc<Self>, key: &ReminderKey, generation: u64) {
        let notification = {
            let mut state = self.lock_state();
            match state.index.timer(key) {
                Some(timer) if timer.generation == generation => {}
                _ => {
                    debug!(key = %key, generation, "stale timer step ignored");
                    return;
                }
            }
            let Some(timer) = state.index.take_fired(key) else {
                return;
            };

            if timer.fire_at_ms > self.clock.now_ms() {
                let delay_ms = self.arm(&mut state, key.clone(), timer.fire_at_ms, timer.record);
                debug!(key = %key, delay_ms, "reminder still in the future, chaining");
                return;
            }

            let pet_name = state.pet_name_for(&timer.record, &self.config.default_pet_name);
            timer.record.notification(&pet_name)
        };

        info!(key = %key, "reminder due, notifying");
        self.notifier.send(notification);
        let state = self.lock_state();
        self.emit_stats(&state);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        state.index.clear();
    }
}

/// Drain the pending queue: resolve permission once, then schedule every
/// record of every batch in FIFO order.
async fn process_queue(inner: Arc<Inner>, epoch: u64) {
    let permission = inner.permission.resolve().await;

    if permission != PermissionState::Granted {
        let mut state = inner.lock_state();
        if state.epoch != epoch {
            return;
        }
        let discarded: usize = state.pending.drain(..).map(|b| b.records.len()).sum();
        state.processing = false;
        inner.busy_tx.send_replace(false);
        inner.emit_stats(&state);
        debug!(discarded, "notification permission {permission}, queued reminders discarded");
        return;
    }

    loop {
        let mut catchups = Vec::new();
        {
            let mut state = inner.lock_state();
            if state.epoch != epoch {
                return;
            }
            let Some(batch) = state.pending.pop_front() else {
                state.processing = false;
                inner.busy_tx.send_replace(false);
                return;
            };

            let total = batch.records.len();
            let (mut armed, mut dropped) = (0usize, 0usize);
            for record in batch.records {
                let (outcome, notification) = inner.schedule_locked(&mut state, record);
                match outcome {
                    ScheduleOutcome::Armed { .. } => armed += 1,
                    ScheduleOutcome::Dropped(_) => dropped += 1,
                    _ => {}
                }
                catchups.extend(notification);
            }
            inner.emit_stats(&state);
            debug!(
                household_id = %batch.household_id,
                total,
                armed,
                caught_up = catchups.len(),
                dropped,
                "reminder batch processed"
            );
        }

        for notification in catchups {
            inner.notifier.send(notification);
        }
    }
}

/// Handle to the reminder scheduler. Clones share the same state.
#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<Inner>,
}

/// Builder for [`ReminderScheduler`].
pub struct ReminderSchedulerBuilder {
    config: ReminderConfig,
    gate: Arc<dyn PermissionGate>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl ReminderSchedulerBuilder {
    /// Override the configuration.
    pub fn with_config(mut self, config: ReminderConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the wall-clock source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the scheduler with empty state.
    pub fn build(self) -> ReminderScheduler {
        let (busy_tx, _) = watch::channel(false);
        let (stats_tx, _) = watch::channel(ReminderStats::default());
        ReminderScheduler {
            inner: Arc::new(Inner {
                max_delay_ms: self.config.effective_max_delay(),
                config: self.config,
                clock: self.clock,
                notifier: self.notifier,
                permission: PermissionNegotiator::new(self.gate),
                state: Mutex::new(SchedulerState::default()),
                busy_tx,
                stats_tx,
            }),
        }
    }
}

impl ReminderScheduler {
    /// Start building a scheduler around the host permission gate and notifier.
    pub fn builder(
        gate: Arc<dyn PermissionGate>,
        notifier: Arc<dyn Notifier>,
    ) -> ReminderSchedulerBuilder {
        ReminderSchedulerBuilder {
            config: ReminderConfig::default(),
            gate,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    /// Configuration the scheduler was built with.
    pub fn config(&self) -> &ReminderConfig {
        &self.inner.config
    }

    /// Reset for a fresh view mount: cancels everything and clears the queue.
    pub fn init(&self) {
        self.cancel_all();
        debug!("reminder scheduler initialised");
    }

    /// Queue a batch and wait until the queue has been drained.
    ///
    /// Safe to call repeatedly with the full current record set: already
    /// armed or already handled keys are skipped. An empty batch still
    /// resolves permission and updates the pet-name and household context.
    pub async fn schedule_many(&self, records: Vec<ReminderRecord>, options: ScheduleOptions) {
        let spawn_epoch = {
            let mut state = self.inner.lock_state();
            for (pet_id, name) in &options.pet_names {
                let name = name.trim();
                if !name.is_empty() {
                    state.known_pet_names.insert(pet_id.clone(), name.to_owned());
                }
            }
            state.household_id = Some(options.household_id.clone());
            state.pending.push_back(ScheduleBatch {
                records,
                household_id: options.household_id,
            });
            self.inner.emit_stats(&state);

            if state.processing {
                None
            } else {
                state.processing = true;
                self.inner.busy_tx.send_replace(true);
                Some(state.epoch)
            }
        };

        if let Some(epoch) = spawn_epoch {
            tokio::spawn(process_queue(Arc::clone(&self.inner), epoch));
        }
        self.wait_idle().await;
    }

    /// Wait until no processing task owns the queue.
    pub async fn wait_idle(&self) {
        let mut busy_rx = self.inner.busy_tx.subscribe();
        let _ = busy_rx.wait_for(|busy| !*busy).await;
    }

    /// Run the scheduling decision for a single record right away.
    ///
    /// Does not consult the permission gate: unless an earlier
    /// `schedule_many` resolved permission as granted, the record is
    /// discarded with [`ScheduleOutcome::NotPermitted`]. A catch-up
    /// notification is sent before this returns.
    pub fn schedule_record(&self, record: ReminderRecord) -> ScheduleOutcome {
        let permission = self.inner.permission.cached();
        if permission != PermissionState::Granted {
            debug!(key = %record.key(), %permission, "reminder discarded, permission not granted");
            return ScheduleOutcome::NotPermitted;
        }

        let (outcome, notification) = {
            let mut state = self.inner.lock_state();
            self.inner.schedule_locked(&mut state, record)
        };
        if let Some(notification) = notification {
            self.inner.notifier.send(notification);
        }
        self.inner.emit_stats(&self.inner.lock_state());
        outcome
    }

    /// Cancel every reminder tracked for `pet_id`. Returns how many were cancelled.
    ///
    /// Nothing is requeued; follow with `schedule_many` carrying the
    /// pet's updated records.
    pub fn reschedule_for_pet(&self, pet_id: &str) -> usize {
        let mut state = self.inner.lock_state();
        let cancelled = state.index.cancel_pet(pet_id);
        self.inner.emit_stats(&state);
        debug!(pet_id, cancelled, "pet reminders cleared for rescheduling");
        cancelled
    }

    /// Cancel everything: timers, indexes, catch-up history, queue,
    /// processing guard and household context. Pet names are kept.
    pub fn cancel_all(&self) {
        let mut state = self.inner.lock_state();
        let cancelled = state.index.clear();
        state.pending.clear();
        state.processing = false;
        state.epoch += 1;
        state.household_id = None;
        self.inner.busy_tx.send_replace(false);
        self.inner.emit_stats(&state);
        if cancelled > 0 {
            info!(cancelled, "all reminders cancelled");
        }
    }

    /// Current counters. No side effects.
    pub fn stats(&self) -> ReminderStats {
        self.inner.lock_state().stats()
    }

    /// Watch channel updated after every registry or queue change.
    pub fn subscribe_stats(&self) -> watch::Receiver<ReminderStats> {
        self.inner.stats_tx.subscribe()
    }

    /// Cached permission state (`Unknown` until first resolved).
    pub fn permission_state(&self) -> PermissionState {
        self.inner.permission.cached()
    }

    /// Forget the cached permission answer. Teardown/test hook.
    pub async fn reset_permission(&self) {
        self.inner.permission.reset().await;
    }

    /// Household of the most recent batch.
    pub fn household_id(&self) -> Option<String> {
        self.inner.lock_state().household_id.clone()
    }

    /// Cached display name for a pet.
    pub fn known_pet_name(&self, pet_id: &str) -> Option<String> {
        self.inner.lock_state().known_pet_names.get(pet_id).cloned()
    }
}

impl std::fmt::Debug for ReminderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderScheduler")
            .field("stats", &self.stats())
            .field("permission", &self.permission_state())
            .finish_non_exhaustive()
    }
}
