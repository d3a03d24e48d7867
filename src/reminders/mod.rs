//! Pet medical reminders.
//!
//! [`ReminderScheduler`] turns medical-event reminder records into host
//! notifications. Hosts plug in a [`PermissionGate`] and a [`Notifier`];
//! diagnostics are observed through [`ReminderScheduler::subscribe_stats`].

pub mod clock;
mod index;
pub mod notifier;
pub mod permission;
pub mod record;
pub mod scheduler;

pub use clock::{Clock, SystemClock, TokioClock};
pub use notifier::{ChannelNotifier, LogNotifier, Notifier, ReminderNotification};
pub use permission::{PermissionDecision, PermissionGate, PermissionState, StaticPermissionGate};
pub use record::{ReminderKey, ReminderRecord};
pub use scheduler::{
    ReminderScheduler, ReminderSchedulerBuilder, ReminderStats, ScheduleOptions, ScheduleOutcome,
};
