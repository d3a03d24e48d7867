//! Reminder input records and the keys derived from them.
//!
//! A [`ReminderRecord`] says "notify about `description` at `reminder_at`,
//! concerning `pet_id`'s medical event on `event_date`". Timestamps arrive as
//! strings from the data layer and are parsed lazily so a malformed record
//! only affects itself.

use crate::reminders::notifier::ReminderNotification;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Naive timestamp layouts accepted in addition to RFC 3339.
///
/// Naive values are interpreted in the local time zone.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One medical event reminder as loaded from the pet's medical history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRecord {
    /// Identifier of the owning medical record.
    pub medical_id: String,
    /// Pet the medical event concerns.
    pub pet_id: String,
    /// Date of the medical event (`YYYY-MM-DD` or a timestamp).
    pub event_date: String,
    /// Absolute time the reminder should fire.
    pub reminder_at: String,
    /// Free-text description of the event.
    #[serde(default)]
    pub description: String,
    /// Display name of the pet, when the caller already knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pet_name: Option<String>,
}

impl ReminderRecord {
    /// Create a record without a pet name.
    pub fn new(
        medical_id: impl Into<String>,
        pet_id: impl Into<String>,
        event_date: impl Into<String>,
        reminder_at: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            medical_id: medical_id.into(),
            pet_id: pet_id.into(),
            event_date: event_date.into(),
            reminder_at: reminder_at.into(),
            description: description.into(),
            pet_name: None,
        }
    }

    /// Attach a display name for the pet.
    pub fn with_pet_name(mut self, name: impl Into<String>) -> Self {
        self.pet_name = Some(name.into());
        self
    }

    /// Key identifying this reminder occurrence.
    pub fn key(&self) -> ReminderKey {
        ReminderKey::new(&self.medical_id, &self.reminder_at)
    }

    /// Fire time in epoch milliseconds, or `None` when unparseable.
    pub fn reminder_at_ms(&self) -> Option<i64> {
        parse_instant_ms(&self.reminder_at)
    }

    /// Local calendar day of the medical event, or `None` when unparseable.
    pub fn event_day(&self) -> Option<NaiveDate> {
        parse_local_day(&self.event_date)
    }

    /// The record's own pet name, if it carries a non-blank one.
    pub fn own_pet_name(&self) -> Option<&str> {
        self.pet_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Build the notification shown when this reminder fires.
    pub fn notification(&self, pet_name: &str) -> ReminderNotification {
        let description = self.description.trim();
        let what = if description.is_empty() {
            "Medical event"
        } else {
            description
        };
        ReminderNotification {
            title: format!("Reminder for {pet_name}"),
            body: format!("{what} on {}", self.event_date.trim()),
            tag: self.key().to_string(),
        }
    }
}

/// Identity of one scheduled occurrence: `"{medical_id}:{reminder_at}"`.
///
/// Editing a record's reminder time produces a different key; the old one
/// is not diffed away automatically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReminderKey(String);

impl ReminderKey {
    /// Build a key from the raw medical id and reminder timestamp.
    pub fn new(medical_id: &str, reminder_at: &str) -> Self {
        Self(format!("{medical_id}:{reminder_at}"))
    }

    /// Borrow the key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReminderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a timestamp into epoch milliseconds.
///
/// Accepts RFC 3339, naive date-times (local time) and bare dates (local
/// midnight).
pub fn parse_instant_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp_millis());
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return local_millis(naive);
        }
    }
    let date = NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()?;
    local_millis(date.and_hms_opt(0, 0, 0)?)
}

/// Parse a date or timestamp into the local calendar day it falls on.
pub fn parse_local_day(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, DATE_FORMAT) {
        return Some(date);
    }
    let millis = parse_instant_ms(trimmed)?;
    local_day_of(millis)
}

/// Local calendar day containing the given epoch-millisecond instant.
pub fn local_day_of(millis: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|utc| utc.with_timezone(&Local).date_naive())
}

fn local_millis(naive: NaiveDateTime) -> Option<i64> {
    // Nonexistent local times (DST gap) resolve to the instant an hour later.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            Local
                .from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn record(reminder_at: &str) -> ReminderRecord {
        ReminderRecord::new("med-1", "pet-1", "2026-03-01", reminder_at, "Rabies booster")
    }

    #[test]
    fn key_joins_medical_id_and_raw_reminder_time() {
        let r = record("2026-02-28T09:00:00Z");
        assert_eq!(r.key().as_str(), "med-1:2026-02-28T09:00:00Z");
    }

    #[test]
    fn edited_reminder_time_changes_key() {
        let a = record("2026-02-28T09:00:00Z");
        let b = record("2026-02-27T09:00:00Z");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn rfc3339_parses_to_epoch_millis() {
        assert_eq!(parse_instant_ms("1970-01-01T00:00:01.500Z"), Some(1_500));
        assert_eq!(parse_instant_ms("1970-01-01T01:00:00+01:00"), Some(0));
    }

    #[test]
    fn naive_forms_parse_as_local_time() {
        let expected = Local
            .with_ymd_and_hms(2026, 5, 4, 10, 30, 0)
            .earliest()
            .map(|dt| dt.timestamp_millis());
        assert_eq!(parse_instant_ms("2026-05-04T10:30:00"), expected);
        assert_eq!(parse_instant_ms("2026-05-04T10:30"), expected);
        assert_eq!(parse_instant_ms("2026-05-04 10:30"), expected);
    }

    #[test]
    fn bare_date_is_local_midnight() {
        let expected = Local
            .with_ymd_and_hms(2026, 5, 4, 0, 0, 0)
            .earliest()
            .map(|dt| dt.timestamp_millis());
        assert_eq!(parse_instant_ms("2026-05-04"), expected);
    }

    #[test]
    fn garbage_does_not_parse() {
        assert_eq!(parse_instant_ms(""), None);
        assert_eq!(parse_instant_ms("tomorrow-ish"), None);
        assert_eq!(parse_instant_ms("2026-13-40"), None);
        assert_eq!(parse_local_day("not a date"), None);
    }

    #[test]
    fn event_day_accepts_dates_and_timestamps() {
        let r = record("2026-02-28T09:00:00Z");
        assert_eq!(r.event_day(), NaiveDate::from_ymd_opt(2026, 3, 1));

        let mut r2 = r.clone();
        r2.event_date = "2026-03-01T12:00".to_owned();
        assert_eq!(r2.event_day(), NaiveDate::from_ymd_opt(2026, 3, 1));
    }

    #[test]
    fn blank_pet_name_is_ignored() {
        let r = record("2026-02-28T09:00:00Z").with_pet_name("  ");
        assert_eq!(r.own_pet_name(), None);
        let r = record("2026-02-28T09:00:00Z").with_pet_name("Biscuit");
        assert_eq!(r.own_pet_name(), Some("Biscuit"));
    }

    #[test]
    fn notification_mentions_pet_description_and_date() {
        let n = record("2026-02-28T09:00:00Z").notification("Biscuit");
        assert_eq!(n.title, "Reminder for Biscuit");
        assert_eq!(n.body, "Rabies booster on 2026-03-01");
        assert_eq!(n.tag, "med-1:2026-02-28T09:00:00Z");

        let mut blank = record("x");
        blank.description = String::new();
        assert_eq!(blank.notification("Rex").body, "Medical event on 2026-03-01");
    }

    #[test]
    fn deserializes_camel_case_json() {
        let json = r#"{
            "medicalId": "m9",
            "petId": "p3",
            "eventDate": "2026-06-01",
            "reminderAt": "2026-05-31T08:00:00Z",
            "description": "Dental check",
            "petName": "Mochi"
        }"#;
        let r: ReminderRecord = serde_json::from_str(json).expect("parse");
        assert_eq!(r.medical_id, "m9");
        assert_eq!(r.pet_name.as_deref(), Some("Mochi"));
        assert_eq!(r.key().as_str(), "m9:2026-05-31T08:00:00Z");
    }
}
