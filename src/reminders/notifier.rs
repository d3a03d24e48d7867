//! Notification delivery seam.
//!
//! The scheduler treats delivery as fire-and-forget: it calls
//! [`Notifier::send`] once per fired reminder and never learns whether the
//! host actually displayed anything.

use tokio::sync::mpsc;
use tracing::{debug, info};

/// A notification ready for the host to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderNotification {
    /// Short title.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Host tag used to replace or group notifications (the reminder key).
    pub tag: String,
}

/// Displays reminder notifications.
///
/// Implementations must not block: the call happens on the timer path.
pub trait Notifier: Send + Sync {
    /// Hand a notification to the host.
    fn send(&self, notification: ReminderNotification);
}

/// Forwards notifications into an unbounded channel.
///
/// Lets a slow host display path run on its own task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<ReminderNotification>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiver the host should drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReminderNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn send(&self, notification: ReminderNotification) {
        if self.tx.send(notification).is_err() {
            debug!("notification receiver closed, dropping reminder");
        }
    }
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: ReminderNotification) {
        info!(
            tag = %notification.tag,
            "{}: {}",
            notification.title,
            notification.body
        );
    }
}
