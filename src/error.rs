//! Error types for the reminder scheduler.

/// Top-level error type for the hearth reminder subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    /// A record's `reminderAt` could not be parsed as a timestamp.
    #[error("invalid reminder time {value:?} for {key}")]
    InvalidReminderAt {
        /// Reminder key of the offending record.
        key: String,
        /// Raw `reminderAt` value.
        value: String,
    },

    /// A past-due record's `eventDate` could not be parsed.
    ///
    /// Such reminders are never retried and never notify.
    #[error("invalid event date {value:?} for {key}")]
    InvalidEventDate {
        /// Reminder key of the offending record.
        key: String,
        /// Raw `eventDate` value.
        value: String,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReminderError {
    /// Returns `true` for data-quality failures caused by malformed records.
    pub fn is_data_quality(&self) -> bool {
        matches!(
            self,
            Self::InvalidReminderAt { .. } | Self::InvalidEventDate { .. }
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ReminderError>;
