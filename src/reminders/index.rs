//! Bookkeeping for armed reminders.
//!
//! Holds the timer registry, the key/pet inverse index and the catch-up set.
//! `key_to_pet` and `pet_to_keys` always describe the same relation; every
//! mutation goes through [`ReminderIndex::track_key`] /
//! [`ReminderIndex::untrack_key`] to keep them in step.

use crate::reminders::record::{ReminderKey, ReminderRecord};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::debug;

/// One armed step of a (possibly chained) reminder timer.
#[derive(Debug)]
pub(crate) struct ArmedTimer {
    /// Abort handle of the sleeping timer task.
    pub(crate) abort: AbortHandle,
    /// Distinguishes this step from superseded or cancelled ones.
    pub(crate) generation: u64,
    /// Absolute fire time in epoch milliseconds.
    pub(crate) fire_at_ms: i64,
    /// Record the notification is built from when the timer fires.
    pub(crate) record: Arc<ReminderRecord>,
}

#[derive(Debug, Default)]
pub(crate) struct ReminderIndex {
    timers: HashMap<ReminderKey, ArmedTimer>,
    key_to_pet: HashMap<ReminderKey, String>,
    pet_to_keys: HashMap<String, HashSet<ReminderKey>>,
    catchup_keys: HashSet<ReminderKey>,
}

impl ReminderIndex {
    pub(crate) fn is_armed(&self, key: &ReminderKey) -> bool {
        self.timers.contains_key(key)
    }

    pub(crate) fn timer(&self, key: &ReminderKey) -> Option<&ArmedTimer> {
        self.timers.get(key)
    }

    pub(crate) fn track_key(&mut self, pet_id: &str, key: &ReminderKey) {
        if let Some(previous) = self.key_to_pet.insert(key.clone(), pet_id.to_owned()) {
            if previous != pet_id {
                self.remove_from_bucket(&previous, key);
            }
        }
        self.pet_to_keys
            .entry(pet_id.to_owned())
            .or_default()
            .insert(key.clone());
    }

    pub(crate) fn untrack_key(&mut self, key: &ReminderKey) {
        if let Some(pet_id) = self.key_to_pet.remove(key) {
            self.remove_from_bucket(&pet_id, key);
        }
    }

    fn remove_from_bucket(&mut self, pet_id: &str, key: &ReminderKey) {
        if let Some(bucket) = self.pet_to_keys.get_mut(pet_id) {
            bucket.remove(key);
            if bucket.is_empty() {
                self.pet_to_keys.remove(pet_id);
            }
        }
    }

    /// Abort and forget the timer for `key`. Returns `true` when one existed.
    pub(crate) fn cancel_key(&mut self, key: &ReminderKey) -> bool {
        let cancelled = match self.timers.remove(key) {
            Some(timer) => {
                timer.abort.abort();
                true
            }
            None => false,
        };
        self.untrack_key(key);
        if cancelled {
            debug!(key = %key, "reminder cancelled");
        }
        cancelled
    }

    /// Store a timer step for `key`, aborting any predecessor first.
    pub(crate) fn arm(&mut self, key: ReminderKey, timer: ArmedTimer) {
        if let Some(previous) = self.timers.remove(&key) {
            previous.abort.abort();
        }
        self.track_key(&timer.record.pet_id, &key);
        self.timers.insert(key, timer);
    }

    /// Remove a timer that is firing now. Its task is the caller, so it is
    /// not aborted.
    pub(crate) fn take_fired(&mut self, key: &ReminderKey) -> Option<ArmedTimer> {
        let timer = self.timers.remove(key)?;
        self.untrack_key(key);
        Some(timer)
    }

    pub(crate) fn keys_for_pet(&self, pet_id: &str) -> Vec<ReminderKey> {
        self.pet_to_keys
            .get(pet_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Cancel every key tracked for `pet_id`. Returns how many timers were aborted.
    pub(crate) fn cancel_pet(&mut self, pet_id: &str) -> usize {
        let mut cancelled = 0;
        for key in self.keys_for_pet(pet_id) {
            if self.cancel_key(&key) {
                cancelled += 1;
            }
        }
        self.pet_to_keys.remove(pet_id);
        cancelled
    }

    /// Abort every timer and clear all bookkeeping, catch-up set included.
    pub(crate) fn clear(&mut self) -> usize {
        let cancelled = self.timers.len();
        for (_, timer) in self.timers.drain() {
            timer.abort.abort();
        }
        self.key_to_pet.clear();
        self.pet_to_keys.clear();
        self.catchup_keys.clear();
        cancelled
    }

    pub(crate) fn is_caught_up(&self, key: &ReminderKey) -> bool {
        self.catchup_keys.contains(key)
    }

    /// Record that `key` must never fire again this session.
    /// Returns `true` when the key was not marked before.
    pub(crate) fn mark_caught_up(&mut self, key: &ReminderKey) -> bool {
        self.catchup_keys.insert(key.clone())
    }

    pub(crate) fn active_timers(&self) -> usize {
        self.timers.len()
    }

    /// Number of distinct `reminder_at` values among armed keys.
    pub(crate) fn buckets(&self) -> usize {
        self.timers
            .values()
            .map(|timer| timer.record.reminder_at.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (key, pet_id) in &self.key_to_pet {
            assert!(
                self.pet_to_keys
                    .get(pet_id)
                    .is_some_and(|keys| keys.contains(key)),
                "{key} missing from bucket {pet_id}"
            );
        }
        for (pet_id, keys) in &self.pet_to_keys {
            assert!(!keys.is_empty(), "empty bucket left for {pet_id}");
            for key in keys {
                assert_eq!(self.key_to_pet.get(key), Some(pet_id));
            }
        }
    }
}
