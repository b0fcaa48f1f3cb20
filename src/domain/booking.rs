//! Booking data model: the persisted field reservation
//!
//! A booking reserves one field for a time window on a single date.
//! Records are created in `Pending` and only move through the transitions
//! enforced by `services::lifecycle`; the invariants here are re-checked
//! by the store on every write.

use crate::domain::error::{BookingError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype wrapper for booking IDs (UUIDv7, time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BookingId(pub Uuid);

impl BookingId {
    /// Mint a fresh time-sortable id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BookingId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Newtype wrapper for field IDs to provide type safety
///
/// A lookup key into the field catalog, never an owning reference;
/// unknown ids are tolerated and rendered with a fallback name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FieldId(pub i32);

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Back-reference to the requesting team; may dangle if the team is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TeamRef(pub i64);

impl std::fmt::Display for TeamRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Back-reference to the requesting user; may dangle if the user is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct UserRef(pub i64);

impl std::fmt::Display for UserRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Actor type performing a cancellation
///
/// Recorded as attribution, never authenticated here. Governs
/// reactivation eligibility: only user-cancelled bookings may return
/// to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    Admin,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::User => "user",
            Actor::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Actor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Actor::User),
            "admin" => Ok(Actor::Admin),
            other => Err(format!("unknown actor: {other}")),
        }
    }
}

/// Booking lifecycle states; no other states exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }

    /// Cancelled and Expired records are immutable except for
    /// reactivation and hard deletion
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Expired)
    }

    /// States the expiry sweep considers (active states)
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "expired" => Ok(BookingStatus::Expired),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// The persisted reservation entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: BookingId,
    pub field_id: FieldId,
    /// Calendar date of the booking, no time component
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: BookingStatus,
    /// Some iff status == Cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<Actor>,
    /// Free-form label, display only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_ref: Option<TeamRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ref: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Creation timestamp, immutable
    pub created_at: DateTime<Utc>,
}

impl BookingRecord {
    /// Build a new booking request in `Pending` with a minted id
    #[allow(clippy::too_many_arguments)]
    pub fn new_request(
        field_id: FieldId,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        activity_type: Option<String>,
        team_ref: Option<TeamRef>,
        user_ref: Option<UserRef>,
        notes: Option<String>,
    ) -> Result<Self> {
        let record = Self {
            id: BookingId::new(),
            field_id,
            date,
            start_time,
            end_time,
            status: BookingStatus::Pending,
            cancelled_by: None,
            activity_type,
            team_ref,
            user_ref,
            notes,
            created_at: Utc::now(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Check the record invariants
    pub fn validate(&self) -> Result<()> {
        if self.start_time >= self.end_time {
            return Err(BookingError::InvalidRecord(format!(
                "start_time {} must be before end_time {}",
                self.start_time, self.end_time
            )));
        }
        match (self.status, self.cancelled_by) {
            (BookingStatus::Cancelled, None) => Err(BookingError::InvalidRecord(
                "cancelled booking must carry cancellation attribution".to_string(),
            )),
            (status, Some(_)) if status != BookingStatus::Cancelled => {
                Err(BookingError::InvalidRecord(format!(
                    "cancelled_by set on a {status} booking"
                )))
            }
            _ => Ok(()),
        }
    }

    /// End of the booking window as a local wall-clock instant
    #[inline]
    pub fn end_datetime(&self) -> NaiveDateTime {
        self.date.and_time(self.end_time)
    }
}

/// Partial update applied through the store
///
/// Absent fields leave the record untouched. The store re-validates the
/// patched record, so a patch cannot smuggle in an inconsistent
/// status/attribution pair.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingPatch {
    #[serde(default)]
    pub field_id: Option<FieldId>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub team_ref: Option<TeamRef>,
    #[serde(default)]
    pub user_ref: Option<UserRef>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<BookingStatus>,
    #[serde(default)]
    pub cancelled_by: Option<Actor>,
}

impl BookingPatch {
    /// Apply onto a copy of the record; caller validates the result
    pub fn apply(&self, record: &BookingRecord) -> BookingRecord {
        let mut next = record.clone();
        if let Some(field_id) = self.field_id {
            next.field_id = field_id;
        }
        if let Some(date) = self.date {
            next.date = date;
        }
        if let Some(start_time) = self.start_time {
            next.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            next.end_time = end_time;
        }
        if let Some(activity_type) = &self.activity_type {
            next.activity_type = Some(activity_type.clone());
        }
        if let Some(team_ref) = self.team_ref {
            next.team_ref = Some(team_ref);
        }
        if let Some(user_ref) = self.user_ref {
            next.user_ref = Some(user_ref);
        }
        if let Some(notes) = &self.notes {
            next.notes = Some(notes.clone());
        }
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(actor) = self.cancelled_by {
            next.cancelled_by = Some(actor);
        }
        next
    }

    /// True when the patch touches the state machine fields
    pub fn touches_status(&self) -> bool {
        self.status.is_some() || self.cancelled_by.is_some()
    }
}

/// A booking as rendered to clients: the record plus its read-time
/// effective status (a past-due Pending/Confirmed booking displays as
/// Expired without the transition being persisted)
#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: BookingRecord,
    pub effective_status: BookingStatus,
}

impl BookingView {
    pub fn new(booking: BookingRecord, effective_status: BookingStatus) -> Self {
        Self { booking, effective_status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BookingRecord {
        BookingRecord::new_request(
            FieldId(1),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            Some("allenamento".to_string()),
            None,
            Some(UserRef(42)),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_new_request_starts_pending() {
        let record = sample();
        assert_eq!(record.status, BookingStatus::Pending);
        assert!(record.cancelled_by.is_none());
    }

    #[test]
    fn test_rejects_inverted_window() {
        let result = BookingRecord::new_request(
            FieldId(1),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            None,
            None,
            None,
            None,
        );
        assert!(matches!(result, Err(BookingError::InvalidRecord(_))));
    }

    #[test]
    fn test_rejects_zero_length_window() {
        let result = BookingRecord::new_request(
            FieldId(1),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            None,
            None,
            None,
            None,
        );
        assert!(matches!(result, Err(BookingError::InvalidRecord(_))));
    }

    #[test]
    fn test_attribution_invariant() {
        let mut record = sample();

        // Cancelled without attribution is invalid
        record.status = BookingStatus::Cancelled;
        record.cancelled_by = None;
        assert!(record.validate().is_err());

        // Cancelled with attribution is valid
        record.cancelled_by = Some(Actor::User);
        assert!(record.validate().is_ok());

        // Attribution on a non-cancelled booking is invalid
        record.status = BookingStatus::Confirmed;
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_serde_omits_null_attribution() {
        let record = sample();
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("cancelled_by"));

        let mut cancelled = record.clone();
        cancelled.status = BookingStatus::Cancelled;
        cancelled.cancelled_by = Some(Actor::Admin);
        let json = serde_json::to_string(&cancelled).unwrap();
        assert!(json.contains("\"cancelled_by\":\"admin\""));
    }

    #[test]
    fn test_serde_round_trip() {
        let record = sample();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: BookingRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_end_datetime() {
        let record = sample();
        assert_eq!(
            record.end_datetime(),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap().and_hms_opt(19, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_patch_applies_partially() {
        let record = sample();
        let patch = BookingPatch {
            notes: Some("porta i palloni".to_string()),
            ..Default::default()
        };
        let next = patch.apply(&record);
        assert_eq!(next.notes.as_deref(), Some("porta i palloni"));
        assert_eq!(next.field_id, record.field_id);
        assert_eq!(next.status, record.status);
        assert!(!patch.touches_status());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("pending".parse::<BookingStatus>().unwrap(), BookingStatus::Pending);
        assert_eq!("expired".parse::<BookingStatus>().unwrap(), BookingStatus::Expired);
        assert!("confermata".parse::<BookingStatus>().is_err());
    }
}
