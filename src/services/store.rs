//! Booking store - the sole gateway to persisted bookings
//!
//! `BookingStore` is the one seam every other service goes through;
//! nothing else touches storage. `MemoryStore` keeps records in an
//! in-process map with optional JSONL snapshot persistence: the file is
//! loaded at construction and rewritten after every mutation, so each
//! call reflects current storage state with no caching layer.

use crate::domain::{
    Actor, BookingError, BookingId, BookingPatch, BookingRecord, BookingStatus, FieldId, Result,
    UserRef,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    #[inline]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }
}

/// CRUD gateway over persisted bookings
///
/// All mutating operations persist synchronously before returning.
/// `update_status_if` is the conditional write the lifecycle controller
/// relies on to avoid lost updates between concurrent transitions.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Fetch one booking; `NotFound` on unknown id
    async fn get(&self, id: BookingId) -> Result<BookingRecord>;

    /// All bookings, newest first (admin table order)
    async fn list(&self) -> Result<Vec<BookingRecord>>;

    /// Bookings for one field within a range, date then start time ascending
    async fn list_by_field(&self, field_id: FieldId, range: DateRange)
        -> Result<Vec<BookingRecord>>;

    /// Bookings for all fields within a range, date then start time ascending
    async fn list_by_range(&self, range: DateRange) -> Result<Vec<BookingRecord>>;

    /// Bookings requested by one user, newest first
    async fn list_by_user(&self, user_ref: UserRef) -> Result<Vec<BookingRecord>>;

    /// Insert a new record; `Conflict` on duplicate id or invariant violation
    async fn insert(&self, record: BookingRecord) -> Result<BookingRecord>;

    /// Partial update; the patched record is re-validated and the write
    /// rejected with `Conflict` (record unchanged) on any invariant
    /// violation. Terminal records reject all patches.
    async fn update(&self, id: BookingId, patch: BookingPatch) -> Result<BookingRecord>;

    /// Conditional status write: fails with `Conflict` when the current
    /// status no longer equals `expected` (stale read). Sets attribution
    /// when moving to Cancelled, clears it otherwise.
    async fn update_status_if(
        &self,
        id: BookingId,
        expected: BookingStatus,
        next: BookingStatus,
        cancelled_by: Option<Actor>,
    ) -> Result<BookingRecord>;

    /// Hard delete, irreversible; returns the removed record
    async fn delete(&self, id: BookingId) -> Result<BookingRecord>;

    /// Bulk purge of Expired records; returns the number removed
    async fn delete_expired(&self) -> Result<usize>;
}

/// In-memory store with optional JSONL snapshot write-through
pub struct MemoryStore {
    records: RwLock<FxHashMap<BookingId, BookingRecord>>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    /// Purely in-memory store (tests, ephemeral deployments)
    pub fn new() -> Self {
        Self { records: RwLock::new(FxHashMap::default()), snapshot: None }
    }

    /// Store backed by a JSONL snapshot file, loaded now and rewritten
    /// after every mutation. A missing file starts empty.
    pub fn with_snapshot<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let records = Self::load_snapshot(&path)?;
        info!(file = %path.display(), records = records.len(), "store_snapshot_loaded");
        Ok(Self { records: RwLock::new(records), snapshot: Some(path) })
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    fn load_snapshot(path: &Path) -> Result<FxHashMap<BookingId, BookingRecord>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FxHashMap::default()),
            Err(e) => {
                return Err(BookingError::Storage(format!(
                    "failed to read snapshot {}: {e}",
                    path.display()
                )))
            }
        };

        let mut records = FxHashMap::default();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: BookingRecord = serde_json::from_str(line).map_err(|e| {
                BookingError::Storage(format!(
                    "corrupt snapshot {} line {}: {e}",
                    path.display(),
                    lineno + 1
                ))
            })?;
            records.insert(record.id, record);
        }
        Ok(records)
    }

    /// Rewrite the snapshot from the current map, called with the write
    /// lock held so the file never lags behind the map
    fn persist(&self, records: &FxHashMap<BookingId, BookingRecord>) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    BookingError::Storage(format!("failed to create snapshot dir: {e}"))
                })?;
            }
        }

        let mut sorted: Vec<&BookingRecord> = records.values().collect();
        sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                BookingError::Storage(format!("failed to open snapshot {}: {e}", path.display()))
            })?;

        for record in sorted {
            let json = serde_json::to_string(record)
                .map_err(|e| BookingError::Storage(format!("failed to encode record: {e}")))?;
            writeln!(file, "{}", json)
                .map_err(|e| BookingError::Storage(format!("failed to write snapshot: {e}")))?;
        }

        debug!(file = %path.display(), records = records.len(), "store_snapshot_written");
        Ok(())
    }

    fn sorted_ascending(mut records: Vec<BookingRecord>) -> Vec<BookingRecord> {
        records.sort_by(|a, b| a.date.cmp(&b.date).then(a.start_time.cmp(&b.start_time)));
        records
    }

    fn sorted_descending(mut records: Vec<BookingRecord>) -> Vec<BookingRecord> {
        records.sort_by(|a, b| b.date.cmp(&a.date).then(b.start_time.cmp(&a.start_time)));
        records
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn get(&self, id: BookingId) -> Result<BookingRecord> {
        self.records.read().get(&id).cloned().ok_or(BookingError::NotFound)
    }

    async fn list(&self) -> Result<Vec<BookingRecord>> {
        let records: Vec<BookingRecord> = self.records.read().values().cloned().collect();
        Ok(Self::sorted_descending(records))
    }

    async fn list_by_field(
        &self,
        field_id: FieldId,
        range: DateRange,
    ) -> Result<Vec<BookingRecord>> {
        let records: Vec<BookingRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.field_id == field_id && range.contains(r.date))
            .cloned()
            .collect();
        Ok(Self::sorted_ascending(records))
    }

    async fn list_by_range(&self, range: DateRange) -> Result<Vec<BookingRecord>> {
        let records: Vec<BookingRecord> =
            self.records.read().values().filter(|r| range.contains(r.date)).cloned().collect();
        Ok(Self::sorted_ascending(records))
    }

    async fn list_by_user(&self, user_ref: UserRef) -> Result<Vec<BookingRecord>> {
        let records: Vec<BookingRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.user_ref == Some(user_ref))
            .cloned()
            .collect();
        Ok(Self::sorted_descending(records))
    }

    async fn insert(&self, record: BookingRecord) -> Result<BookingRecord> {
        record.validate().map_err(|e| BookingError::Conflict(e.to_string()))?;

        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(BookingError::Conflict(format!("duplicate booking id {}", record.id)));
        }
        records.insert(record.id, record.clone());
        // Roll back on persist failure so memory never leads the snapshot
        if let Err(e) = self.persist(&records) {
            records.remove(&record.id);
            return Err(e);
        }
        Ok(record)
    }

    async fn update(&self, id: BookingId, patch: BookingPatch) -> Result<BookingRecord> {
        let mut records = self.records.write();
        let current = records.get(&id).ok_or(BookingError::NotFound)?;

        if current.status.is_terminal() {
            return Err(BookingError::Conflict(format!(
                "{} bookings are immutable",
                current.status
            )));
        }

        let next = patch.apply(current);
        next.validate().map_err(|e| BookingError::Conflict(e.to_string()))?;

        let previous = records.insert(id, next.clone());
        if let Err(e) = self.persist(&records) {
            if let Some(previous) = previous {
                records.insert(id, previous);
            }
            return Err(e);
        }
        Ok(next)
    }

    async fn update_status_if(
        &self,
        id: BookingId,
        expected: BookingStatus,
        next: BookingStatus,
        cancelled_by: Option<Actor>,
    ) -> Result<BookingRecord> {
        let mut records = self.records.write();
        let current = records.get(&id).ok_or(BookingError::NotFound)?;

        if current.status != expected {
            return Err(BookingError::Conflict(format!(
                "expected status {expected}, found {}",
                current.status
            )));
        }

        let mut updated = current.clone();
        updated.status = next;
        updated.cancelled_by = if next == BookingStatus::Cancelled { cancelled_by } else { None };
        updated.validate().map_err(|e| BookingError::Conflict(e.to_string()))?;

        let previous = records.insert(id, updated.clone());
        if let Err(e) = self.persist(&records) {
            if let Some(previous) = previous {
                records.insert(id, previous);
            }
            return Err(e);
        }
        Ok(updated)
    }

    async fn delete(&self, id: BookingId) -> Result<BookingRecord> {
        let mut records = self.records.write();
        let removed = records.remove(&id).ok_or(BookingError::NotFound)?;
        if let Err(e) = self.persist(&records) {
            records.insert(id, removed);
            return Err(e);
        }
        Ok(removed)
    }

    async fn delete_expired(&self) -> Result<usize> {
        let mut records = self.records.write();
        let expired: Vec<BookingRecord> = records
            .values()
            .filter(|r| r.status == BookingStatus::Expired)
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        for record in &expired {
            records.remove(&record.id);
        }
        if let Err(e) = self.persist(&records) {
            for record in expired {
                records.insert(record.id, record);
            }
            return Err(e);
        }
        Ok(expired.len())
    }
}
