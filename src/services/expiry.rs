//! Expiry evaluation - pure decision plus the persisting sweep
//!
//! `is_expired` and `effective_status` are pure functions of
//! `(booking, now)`, applied at read time so every view displays a
//! correct status without mutating anything. Persisting the Expired
//! state is the separate, explicit sweep: the two are never conflated.

use crate::domain::{BookingId, BookingRecord, BookingStatus, Result};
use crate::infra::Metrics;
use crate::services::lifecycle::{bounded, LifecycleController};
use crate::services::store::BookingStore;
use chrono::NaiveDateTime;
use serde::Serialize;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// True iff the booking is still active and its window is strictly in
/// the past. Cancelled and already-Expired bookings are never
/// re-evaluated, so the check is idempotent for any fixed `now`.
#[inline]
pub fn is_expired(booking: &BookingRecord, now: NaiveDateTime) -> bool {
    booking.status.is_active() && booking.end_datetime() < now
}

/// Read-time status for display; never persisted by itself
#[inline]
pub fn effective_status(booking: &BookingRecord, now: NaiveDateTime) -> BookingStatus {
    if is_expired(booking, now) {
        BookingStatus::Expired
    } else {
        booking.status
    }
}

/// Outcome of one sweep run
///
/// Per-candidate failures do not abort the sweep; they are reported
/// here so the caller can log or retry on the next run.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub updated: usize,
    pub failed: Vec<BookingId>,
}

/// Bulk-transitions overdue bookings to Expired through the lifecycle
/// controller, one conditional write per candidate
pub struct ExpirySweeper {
    store: Arc<dyn BookingStore>,
    lifecycle: Arc<LifecycleController>,
    metrics: Arc<Metrics>,
    deadline: Duration,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn BookingStore>,
        lifecycle: Arc<LifecycleController>,
        metrics: Arc<Metrics>,
        deadline: Duration,
    ) -> Self {
        Self { store, lifecycle, metrics, deadline }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Expire every past-due active booking; idempotent, an immediate
    /// re-run with an unchanged clock reports 0 updated
    pub async fn sweep(&self, now: NaiveDateTime) -> Result<SweepReport> {
        let candidates = bounded(self.deadline, self.store.list()).await?;

        let mut updated = 0usize;
        let mut failed: SmallVec<[BookingId; 4]> = SmallVec::new();

        for candidate in candidates.iter().filter(|b| is_expired(b, now)) {
            match self.lifecycle.expire(candidate.id, now).await {
                Ok(_) => updated += 1,
                Err(e) => {
                    warn!(id = %candidate.id, error = %e, "sweep_candidate_failed");
                    failed.push(candidate.id);
                }
            }
        }

        self.metrics.record_sweep(updated as u64, failed.len() as u64);
        info!(updated, failed = failed.len(), "sweep_completed");
        Ok(SweepReport { updated, failed: failed.into_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BookingRecord, FieldId};
    use crate::services::store::MemoryStore;
    use chrono::{NaiveDate, NaiveTime};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn booking(d: NaiveDate, start: NaiveTime, end: NaiveTime) -> BookingRecord {
        BookingRecord::new_request(FieldId(1), d, start, end, None, None, None, None).unwrap()
    }

    fn sweeper(store: Arc<MemoryStore>) -> ExpirySweeper {
        let metrics = Arc::new(Metrics::new());
        let deadline = Duration::from_secs(5);
        let lifecycle =
            Arc::new(LifecycleController::new(store.clone(), metrics.clone(), deadline));
        ExpirySweeper::new(store, lifecycle, metrics, deadline)
    }

    #[test]
    fn test_is_expired_after_window_end() {
        let b = booking(date(2025, 3, 10), time(18, 0), time(19, 0));
        let now = date(2025, 3, 10).and_hms_opt(20, 0, 0).unwrap();
        assert!(is_expired(&b, now));
    }

    #[test]
    fn test_is_not_expired_before_window_end() {
        let b = booking(date(2025, 3, 10), time(18, 0), time(19, 0));
        let now = date(2025, 3, 10).and_hms_opt(17, 0, 0).unwrap();
        assert!(!is_expired(&b, now));
    }

    #[test]
    fn test_is_not_expired_exactly_at_window_end() {
        // Strictly earlier: `now == end` is not yet expired
        let b = booking(date(2025, 3, 10), time(18, 0), time(19, 0));
        let now = date(2025, 3, 10).and_hms_opt(19, 0, 0).unwrap();
        assert!(!is_expired(&b, now));
    }

    #[test]
    fn test_cancelled_and_expired_never_re_evaluated() {
        let now = date(2025, 3, 11).and_hms_opt(12, 0, 0).unwrap();

        let mut cancelled = booking(date(2025, 3, 10), time(18, 0), time(19, 0));
        cancelled.status = BookingStatus::Cancelled;
        cancelled.cancelled_by = Some(crate::domain::Actor::User);
        assert!(!is_expired(&cancelled, now));
        assert_eq!(effective_status(&cancelled, now), BookingStatus::Cancelled);

        let mut expired = booking(date(2025, 3, 10), time(18, 0), time(19, 0));
        expired.status = BookingStatus::Expired;
        assert!(!is_expired(&expired, now));
        assert_eq!(effective_status(&expired, now), BookingStatus::Expired);
    }

    #[test]
    fn test_is_expired_idempotent_for_fixed_now() {
        let b = booking(date(2025, 3, 10), time(18, 0), time(19, 0));
        let now = date(2025, 3, 10).and_hms_opt(20, 0, 0).unwrap();
        assert_eq!(is_expired(&b, now), is_expired(&b, now));
    }

    #[test]
    fn test_effective_status_shows_expired_without_mutation() {
        let b = booking(date(2025, 3, 10), time(18, 0), time(19, 0));
        let now = date(2025, 3, 10).and_hms_opt(20, 0, 0).unwrap();
        assert_eq!(effective_status(&b, now), BookingStatus::Expired);
        // The record itself is untouched
        assert_eq!(b.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_sweep_updates_only_past_due_and_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = sweeper(store.clone());
        let now = date(2025, 3, 10).and_hms_opt(12, 0, 0).unwrap();

        // 2 past-due, 3 in the future
        let past1 = booking(date(2025, 3, 9), time(18, 0), time(19, 0));
        let past2 = booking(date(2025, 3, 10), time(8, 0), time(9, 0));
        let future1 = booking(date(2025, 3, 10), time(18, 0), time(19, 0));
        let future2 = booking(date(2025, 3, 11), time(18, 0), time(19, 0));
        let future3 = booking(date(2025, 3, 12), time(18, 0), time(19, 0));
        for b in [&past1, &past2, &future1, &future2, &future3] {
            store.insert(b.clone()).await.unwrap();
        }

        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(report.updated, 2);
        assert!(report.failed.is_empty());
        assert_eq!(store.get(past1.id).await.unwrap().status, BookingStatus::Expired);
        assert_eq!(store.get(past2.id).await.unwrap().status, BookingStatus::Expired);
        assert_eq!(store.get(future1.id).await.unwrap().status, BookingStatus::Pending);

        // Immediate re-run with the same clock changes nothing
        let second = sweeper.sweep(now).await.unwrap();
        assert_eq!(second.updated, 0);
        assert!(second.failed.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_skips_cancelled_bookings() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = sweeper(store.clone());
        let now = date(2025, 3, 11).and_hms_opt(12, 0, 0).unwrap();

        let mut cancelled = booking(date(2025, 3, 10), time(18, 0), time(19, 0));
        cancelled.status = BookingStatus::Cancelled;
        cancelled.cancelled_by = Some(crate::domain::Actor::Admin);
        store.insert(cancelled.clone()).await.unwrap();

        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(store.get(cancelled.id).await.unwrap().status, BookingStatus::Cancelled);
    }
}
