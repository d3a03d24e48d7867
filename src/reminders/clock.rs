//! Time sources for the reminder scheduler.

use crate::reminders::record::local_day_of;
use chrono::{Local, NaiveDate, Utc};

/// Wall-clock source used for due-time decisions.
///
/// Timers themselves always run on tokio's timer wheel; the clock only
/// answers "what time is it" so past-due and chaining checks can be made.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> i64;

    /// Local calendar day containing [`now_ms`](Self::now_ms).
    fn today(&self) -> NaiveDate {
        local_day_of(self.now_ms()).unwrap_or_else(|| Local::now().date_naive())
    }
}

/// Reads the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Wall clock derived from tokio's monotonic clock.
///
/// Captures the wall time once and then advances with
/// [`tokio::time::Instant`]. When tokio time is paused (tests), advancing
/// it moves this clock and the scheduler's timers together.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    wall_anchor_ms: i64,
    instant_anchor: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor to the current system time.
    pub fn new() -> Self {
        Self::anchored_at(Utc::now().timestamp_millis())
    }

    /// Anchor to an explicit wall time in epoch milliseconds.
    pub fn anchored_at(wall_anchor_ms: i64) -> Self {
        Self {
            wall_anchor_ms,
            instant_anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        let elapsed = self.instant_anchor.elapsed().as_millis();
        self.wall_anchor_ms
            .saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX))
    }
}
