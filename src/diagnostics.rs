//! Diagnostics publishing for reminder counters.
//!
//! The scheduler only updates a watch channel with its latest
//! [`ReminderStats`]. [`DiagnosticsPublisher`] subscribes to that channel,
//! coalesces bursts of changes over a short quiet period and forwards the
//! latest snapshot to a [`DiagnosticsSink`]. Sink failures are logged and
//! ignored; they never reach the scheduler.
//!
//! ```rust,ignore
//! let cancel = CancellationToken::new();
//! let publisher = DiagnosticsPublisher::new(sink, &config.diagnostics, cancel.child_token());
//! tokio::spawn(publisher.run(scheduler.subscribe_stats()));
//! ```

use crate::config::DiagnosticsConfig;
use crate::reminders::ReminderStats;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Best-effort key-value diagnostics store.
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    /// Merge `fields` into the section named `section`.
    async fn publish(&self, section: &str, fields: Map<String, Value>) -> anyhow::Result<()>;
}

/// In-memory sink, used by tests and embedders that poll diagnostics.
#[derive(Debug, Default)]
pub struct MemoryDiagnosticsSink {
    sections: Mutex<HashMap<String, Map<String, Value>>>,
    publishes: Mutex<usize>,
}

impl MemoryDiagnosticsSink {
    /// Current contents of one section.
    pub fn section(&self, section: &str) -> Option<Map<String, Value>> {
        self.sections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(section)
            .cloned()
    }

    /// Number of successful publish calls so far.
    pub fn publish_count(&self) -> usize {
        *self.publishes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DiagnosticsSink for MemoryDiagnosticsSink {
    async fn publish(&self, section: &str, fields: Map<String, Value>) -> anyhow::Result<()> {
        self.sections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(section.to_owned())
            .or_default()
            .extend(fields);
        *self.publishes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

/// Sink that writes each snapshot to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDiagnosticsSink;

#[async_trait]
impl DiagnosticsSink for LogDiagnosticsSink {
    async fn publish(&self, section: &str, fields: Map<String, Value>) -> anyhow::Result<()> {
        info!(section, fields = %serde_json::Value::Object(fields), "diagnostics updated");
        Ok(())
    }
}

/// Debounced forwarder from the scheduler's stats channel to a sink.
pub struct DiagnosticsPublisher {
    sink: Arc<dyn DiagnosticsSink>,
    section: String,
    debounce: Duration,
    cancel: CancellationToken,
}

impl DiagnosticsPublisher {
    /// Create a publisher using the configured section and debounce window.
    ///
    /// Call [`run`](Self::run) to start forwarding.
    pub fn new(
        sink: Arc<dyn DiagnosticsSink>,
        config: &DiagnosticsConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sink,
            section: config.section.clone(),
            debounce: Duration::from_millis(config.debounce_ms),
            cancel,
        }
    }

    /// Forward stats until the token is cancelled or the channel closes.
    ///
    /// Publishes the current snapshot immediately, then at most once per
    /// debounce window, and only when the counters actually changed.
    pub async fn run(self, mut stats_rx: watch::Receiver<ReminderStats>) {
        debug!(section = %self.section, "diagnostics publisher started");
        let mut last_published: Option<ReminderStats> = None;

        loop {
            let current = *stats_rx.borrow_and_update();
            if last_published != Some(current) {
                self.publish(current).await;
                last_published = Some(current);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = stats_rx.changed() => {
                    if changed.is_err() {
                        debug!("stats channel closed, stopping diagnostics publisher");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.debounce) => {}
            }
        }
        debug!(section = %self.section, "diagnostics publisher stopped");
    }

    async fn publish(&self, stats: ReminderStats) {
        if let Err(e) = self
            .sink
            .publish(&self.section, stats.diagnostic_fields())
            .await
        {
            debug!(section = %self.section, "diagnostics publish failed, ignoring: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(debounce_ms: u64) -> DiagnosticsConfig {
        DiagnosticsConfig {
            debounce_ms,
            ..DiagnosticsConfig::default()
        }
    }

    fn stats(active: usize) -> ReminderStats {
        ReminderStats {
            active_timers: active,
            buckets: active,
            queue_depth: active,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl DiagnosticsSink for FailingSink {
        async fn publish(&self, _section: &str, _fields: Map<String, Value>) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("diagnostics store unavailable")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_initial_snapshot() {
        let (_tx, rx) = watch::channel(stats(2));
        let sink = Arc::new(MemoryDiagnosticsSink::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            DiagnosticsPublisher::new(sink.clone(), &config(500), cancel.clone()).run(rx),
        );
        settle().await;

        let section = sink.section("pets").expect("published");
        assert_eq!(section["reminder_active_timers"], 2);
        assert_eq!(sink.publish_count(), 1);

        cancel.cancel();
        task.await.expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_bursts_into_one_publish() {
        let (tx, rx) = watch::channel(stats(0));
        let sink = Arc::new(MemoryDiagnosticsSink::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            DiagnosticsPublisher::new(sink.clone(), &config(500), cancel.clone()).run(rx),
        );
        settle().await;
        assert_eq!(sink.publish_count(), 1);

        for n in 1..=5 {
            tx.send_replace(stats(n));
            settle().await;
        }
        assert_eq!(sink.publish_count(), 1);

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(sink.publish_count(), 2);
        assert_eq!(sink.section("pets").expect("section")["reminder_queue_depth"], 5);

        cancel.cancel();
        task.await.expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_stats_are_not_republished() {
        let (tx, rx) = watch::channel(stats(1));
        let sink = Arc::new(MemoryDiagnosticsSink::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            DiagnosticsPublisher::new(sink.clone(), &config(100), cancel.clone()).run(rx),
        );
        settle().await;

        tx.send_replace(stats(1));
        settle().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(sink.publish_count(), 1);

        cancel.cancel();
        task.await.expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failures_are_swallowed() {
        let (tx, rx) = watch::channel(stats(0));
        let sink = Arc::new(FailingSink {
            attempts: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            DiagnosticsPublisher::new(sink.clone(), &config(10), cancel.clone()).run(rx),
        );
        settle().await;

        tx.send_replace(stats(3));
        settle().await;
        tokio::time::advance(Duration::from_millis(10)).await;
        settle().await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
        assert!(!task.is_finished());

        cancel.cancel();
        task.await.expect("join");
    }

    #[tokio::test]
    async fn stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(stats(0));
        let sink = Arc::new(MemoryDiagnosticsSink::default());
        let task = tokio::spawn(
            DiagnosticsPublisher::new(sink, &config(10), CancellationToken::new()).run(rx),
        );
        drop(tx);

        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(result.is_ok(), "publisher should stop once the scheduler is gone");
    }

    #[tokio::test]
    async fn log_sink_accepts_stats_fields() {
        let sink = LogDiagnosticsSink;
        sink.publish("pets", stats(3).diagnostic_fields())
            .await
            .expect("log sink never fails");
    }
}
