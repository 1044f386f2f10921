//! Reading-progress value types.
//!
//! A [`ProgressRecord`] is the durable unit of reading state for one
//! `(user_id, manga_id)` pair. A [`ProgressUpdate`] is the transient
//! broadcast projection of it that devices stream to the sync server.
//!
//! `updated_at` is the only field reconciliation looks at, so every
//! mutation on a record advances it and never moves it backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest accepted rating. 0 means unrated.
pub const MAX_RATING: u8 = 10;

/// Errors raised when mutating or parsing progress values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("Invalid reading status: {0}")]
    InvalidStatus(String),
    #[error("Rating {0} out of range 0..=10")]
    RatingOutOfRange(u8),
}

/// Reading status of a library entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadingStatus {
    Reading,
    Completed,
    OnHold,
    Dropped,
    #[default]
    PlanToRead,
}

impl ReadingStatus {
    pub const ALL: [ReadingStatus; 5] = [
        ReadingStatus::Reading,
        ReadingStatus::Completed,
        ReadingStatus::OnHold,
        ReadingStatus::Dropped,
        ReadingStatus::PlanToRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Reading => "reading",
            ReadingStatus::Completed => "completed",
            ReadingStatus::OnHold => "on-hold",
            ReadingStatus::Dropped => "dropped",
            ReadingStatus::PlanToRead => "plan-to-read",
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReadingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ProgressError::InvalidStatus(s.to_string()))
    }
}

/// Durable reading state for one `(user_id, manga_id)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub user_id: String,
    pub manga_id: String,
    pub current_chapter: u32,
    pub status: ReadingStatus,
    /// 0..=10, 0 = unrated
    pub rating: u8,
    #[serde(default)]
    pub notes: String,
    pub started_at: DateTime<Utc>,
    /// Set only while `status` is `Completed`
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// A fresh library entry: plan-to-read, chapter 0.
    pub fn new(user_id: impl Into<String>, manga_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            manga_id: manga_id.into(),
            current_chapter: 0,
            status: ReadingStatus::PlanToRead,
            rating: 0,
            notes: String::new(),
            started_at: at,
            completed_at: None,
            updated_at: at,
        }
    }

    /// Record created from a sync update when no entry existed yet.
    ///
    /// The user has already read up to a chapter, so the entry starts as
    /// `reading` rather than `plan-to-read`.
    pub fn from_update(update: &ProgressUpdate) -> Self {
        let at = update.timestamp_utc();
        Self {
            current_chapter: update.chapter,
            status: ReadingStatus::Reading,
            ..Self::new(update.user_id.clone(), update.manga_id.clone(), at)
        }
    }

    /// Composite identity.
    pub fn key(&self) -> (&str, &str) {
        (&self.user_id, &self.manga_id)
    }

    pub fn record_chapter(&mut self, chapter: u32, at: DateTime<Utc>) {
        self.current_chapter = chapter;
        self.touch(at);
    }

    pub fn set_status(&mut self, status: ReadingStatus, at: DateTime<Utc>) {
        match (self.status, status) {
            (previous, ReadingStatus::Completed) if previous != ReadingStatus::Completed => {
                self.completed_at = Some(at);
            }
            (ReadingStatus::Completed, next) if next != ReadingStatus::Completed => {
                self.completed_at = None;
            }
            _ => {}
        }
        self.status = status;
        self.touch(at);
    }

    pub fn set_rating(&mut self, rating: u8, at: DateTime<Utc>) -> Result<(), ProgressError> {
        if rating > MAX_RATING {
            return Err(ProgressError::RatingOutOfRange(rating));
        }
        self.rating = rating;
        self.touch(at);
        Ok(())
    }

    pub fn set_notes(&mut self, notes: impl Into<String>, at: DateTime<Utc>) {
        self.notes = notes.into();
        self.touch(at);
    }

    /// Advance `updated_at`; never moves it backwards.
    fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }
}

/// A point-in-time chapter change streamed by a device.
///
/// Wire form is one JSON object per line:
/// `{"user_id":"u1","manga_id":"op","chapter":12,"timestamp":1700000000,"device_id":"phone"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub user_id: String,
    pub manga_id: String,
    pub chapter: u32,
    /// Unix seconds
    pub timestamp: i64,
    /// Origin device, display only
    #[serde(default)]
    pub device_id: String,
}

impl ProgressUpdate {
    pub fn new(
        user_id: impl Into<String>,
        manga_id: impl Into<String>,
        chapter: u32,
        timestamp: i64,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            manga_id: manga_id.into(),
            chapter,
            timestamp,
            device_id: device_id.into(),
        }
    }

    /// Update stamped with the current unix time.
    pub fn now(
        user_id: impl Into<String>,
        manga_id: impl Into<String>,
        chapter: u32,
        device_id: impl Into<String>,
    ) -> Self {
        Self::new(user_id, manga_id, chapter, crate::unix_now(), device_id)
    }

    /// `timestamp` as a UTC datetime; out-of-range values map to the epoch.
    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.timestamp, 0).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_status_tokens() {
        for status in ReadingStatus::ALL {
            let parsed: ReadingStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(
            serde_json::to_string(&ReadingStatus::PlanToRead).unwrap(),
            "\"plan-to-read\""
        );
        assert_eq!(
            serde_json::from_str::<ReadingStatus>("\"on-hold\"").unwrap(),
            ReadingStatus::OnHold
        );
    }

    #[test]
    fn test_status_unknown_token() {
        let err = "finished".parse::<ReadingStatus>().unwrap_err();
        assert_eq!(err, ProgressError::InvalidStatus("finished".into()));
    }

    #[test]
    fn test_from_update_forces_reading() {
        let update = ProgressUpdate::new("u1", "op", 42, 1_700_000_000, "phone");
        let record = ProgressRecord::from_update(&update);
        assert_eq!(record.status, ReadingStatus::Reading);
        assert_eq!(record.current_chapter, 42);
        assert_eq!(record.started_at, t(1_700_000_000));
        assert_eq!(record.updated_at, t(1_700_000_000));
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_completed_at_follows_status() {
        let mut record = ProgressRecord::new("u1", "op", t(100));
        record.set_status(ReadingStatus::Completed, t(200));
        assert_eq!(record.completed_at, Some(t(200)));

        // Re-completing keeps the original completion time
        record.set_status(ReadingStatus::Completed, t(300));
        assert_eq!(record.completed_at, Some(t(200)));

        record.set_status(ReadingStatus::Reading, t(400));
        assert!(record.completed_at.is_none());
        assert_eq!(record.updated_at, t(400));
    }

    #[test]
    fn test_updated_at_is_monotonic() {
        let mut record = ProgressRecord::new("u1", "op", t(500));
        record.record_chapter(3, t(100));
        assert_eq!(record.current_chapter, 3);
        assert_eq!(record.updated_at, t(500));

        record.set_notes("great arc", t(900));
        assert_eq!(record.updated_at, t(900));
    }

    #[test]
    fn test_rating_bounds() {
        let mut record = ProgressRecord::new("u1", "op", t(0));
        assert!(record.set_rating(10, t(1)).is_ok());
        assert_eq!(record.rating, 10);
        assert_eq!(
            record.set_rating(11, t(2)),
            Err(ProgressError::RatingOutOfRange(11))
        );
        assert_eq!(record.rating, 10);
        assert_eq!(record.updated_at, t(1));
    }

    #[test]
    fn test_update_wire_format() {
        let line = r#"{"user_id":"u1","manga_id":"op","chapter":12,"timestamp":1700000000,"device_id":"tablet"}"#;
        let update: ProgressUpdate = serde_json::from_str(line).unwrap();
        assert_eq!(update.chapter, 12);
        assert_eq!(update.device_id, "tablet");

        // device_id is optional on the wire
        let bare = r#"{"user_id":"u1","manga_id":"op","chapter":1,"timestamp":5}"#;
        let update: ProgressUpdate = serde_json::from_str(bare).unwrap();
        assert!(update.device_id.is_empty());
    }

    #[test]
    fn test_negative_chapter_rejected() {
        let line = r#"{"user_id":"u1","manga_id":"op","chapter":-1,"timestamp":5}"#;
        assert!(serde_json::from_str::<ProgressUpdate>(line).is_err());
    }

    #[test]
    fn test_record_json_uses_kebab_status() {
        let record = ProgressRecord::new("u1", "nk", t(0));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "plan-to-read");
        assert_eq!(json["current_chapter"], 0);
    }
}
