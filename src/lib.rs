//! Hearth: household management core.
//!
//! This crate hosts the pet medical reminder scheduler used by the desktop
//! shell:
//! - **Records**: medical-event reminders loaded from the pet history
//! - **Scheduler**: dedupes by key, negotiates notification permission once,
//!   chains host timers past the 32-bit delay limit and catches up on
//!   reminders that came due while the app was closed
//! - **Diagnostics**: debounced counters published to the host's diagnostics store

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod reminders;

pub use config::ReminderConfig;
pub use error::{ReminderError, Result};
pub use reminders::{ReminderRecord, ReminderScheduler, ReminderStats, ScheduleOptions};
