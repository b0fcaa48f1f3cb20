//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::Actor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector for the booking core
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps the per-interval counters to
/// get a consistent snapshot.
pub struct Metrics {
    /// Total HTTP requests handled (monotonic)
    requests_total: AtomicU64,
    /// Requests since last report (reset on report)
    requests_since_report: AtomicU64,
    /// Request handling latency histogram buckets (reset on report)
    request_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Sum of request latencies in microseconds (reset on report)
    request_latency_sum_us: AtomicU64,
    /// Max request latency in microseconds (reset on report)
    request_latency_max_us: AtomicU64,

    /// Bookings created (monotonic)
    bookings_created: AtomicU64,
    /// Confirmations applied (monotonic)
    confirmed: AtomicU64,
    /// Cancellations by users (monotonic)
    cancelled_by_user: AtomicU64,
    /// Cancellations by admins (monotonic)
    cancelled_by_admin: AtomicU64,
    /// Reactivations applied (monotonic)
    reactivated: AtomicU64,
    /// Reactivations refused for admin-cancelled bookings (monotonic)
    reactivations_refused: AtomicU64,
    /// Transitions rejected as illegal (monotonic)
    transitions_rejected: AtomicU64,
    /// Expiry transitions persisted (monotonic)
    expired: AtomicU64,
    /// Bookings confirmed by tacit consent (monotonic)
    auto_confirmed: AtomicU64,
    /// Sweep runs (monotonic)
    sweeps: AtomicU64,
    /// Candidates updated by sweeps (monotonic)
    sweep_updated: AtomicU64,
    /// Candidates failed during sweeps (monotonic)
    sweep_failed: AtomicU64,
    /// Hard deletions (monotonic)
    deleted: AtomicU64,
    /// Expired records purged in bulk (monotonic)
    purged: AtomicU64,

    /// Process start, for uptime and rate calculations
    started: Instant,
    /// Last report time, swapped on report for the rate window
    last_report_epoch_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            requests_total: ZERO,
            requests_since_report: ZERO,
            request_latency_buckets: [ZERO; METRICS_NUM_BUCKETS],
            request_latency_sum_us: ZERO,
            request_latency_max_us: ZERO,
            bookings_created: ZERO,
            confirmed: ZERO,
            cancelled_by_user: ZERO,
            cancelled_by_admin: ZERO,
            reactivated: ZERO,
            reactivations_refused: ZERO,
            transitions_rejected: ZERO,
            expired: ZERO,
            auto_confirmed: ZERO,
            sweeps: ZERO,
            sweep_updated: ZERO,
            sweep_failed: ZERO,
            deleted: ZERO,
            purged: ZERO,
            started: Instant::now(),
            last_report_epoch_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_request(&self, latency_us: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_since_report.fetch_add(1, Ordering::Relaxed);
        self.request_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.request_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.request_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_created(&self) {
        self.bookings_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_confirmed(&self) {
        self.confirmed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cancelled(&self, actor: Actor) {
        match actor {
            Actor::User => self.cancelled_by_user.fetch_add(1, Ordering::Relaxed),
            Actor::Admin => self.cancelled_by_admin.fetch_add(1, Ordering::Relaxed),
        };
    }

    #[inline]
    pub fn record_reactivated(&self) {
        self.reactivated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reactivation_refused(&self) {
        self.reactivations_refused.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition_rejected(&self) {
        self.transitions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_auto_confirmed(&self, count: u64) {
        self.auto_confirmed.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sweep(&self, updated: u64, failed: u64) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.sweep_updated.fetch_add(updated, Ordering::Relaxed);
        self.sweep_failed.fetch_add(failed, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_purged(&self, count: u64) {
        self.purged.fetch_add(count, Ordering::Relaxed);
    }

    /// Produce a snapshot and reset the per-interval counters
    pub fn report(&self, records: usize) -> MetricsSummary {
        let now_ms = self.started.elapsed().as_millis() as u64;
        let last_ms = self.last_report_epoch_ms.swap(now_ms, Ordering::Relaxed);
        // Concurrent reports can swap out of order; clamp the window
        // instead of underflowing
        let window_secs = (now_ms.saturating_sub(last_ms) as f64 / 1000.0).max(0.001);

        let requests_in_window = self.requests_since_report.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.request_latency_buckets);
        let lat_sum = self.request_latency_sum_us.swap(0, Ordering::Relaxed);
        let lat_max = self.request_latency_max_us.swap(0, Ordering::Relaxed);
        let lat_avg = if requests_in_window > 0 { lat_sum / requests_in_window } else { 0 };

        MetricsSummary {
            uptime_secs: self.started.elapsed().as_secs(),
            records,
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_per_sec: requests_in_window as f64 / window_secs,
            request_latency_avg_us: lat_avg,
            request_latency_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            request_latency_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            request_latency_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            request_latency_max_us: lat_max,
            request_latency_buckets: lat_buckets,
            bookings_created: self.bookings_created.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            cancelled_by_user: self.cancelled_by_user.load(Ordering::Relaxed),
            cancelled_by_admin: self.cancelled_by_admin.load(Ordering::Relaxed),
            reactivated: self.reactivated.load(Ordering::Relaxed),
            reactivations_refused: self.reactivations_refused.load(Ordering::Relaxed),
            transitions_rejected: self.transitions_rejected.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            auto_confirmed: self.auto_confirmed.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            sweep_updated: self.sweep_updated.load(Ordering::Relaxed),
            sweep_failed: self.sweep_failed.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Consistent snapshot of all counters for logging and exposition
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub records: usize,
    pub requests_total: u64,
    pub requests_per_sec: f64,
    pub request_latency_avg_us: u64,
    pub request_latency_p50_us: u64,
    pub request_latency_p95_us: u64,
    pub request_latency_p99_us: u64,
    pub request_latency_max_us: u64,
    pub request_latency_buckets: [u64; METRICS_NUM_BUCKETS],
    pub bookings_created: u64,
    pub confirmed: u64,
    pub cancelled_by_user: u64,
    pub cancelled_by_admin: u64,
    pub reactivated: u64,
    pub reactivations_refused: u64,
    pub transitions_rejected: u64,
    pub expired: u64,
    pub auto_confirmed: u64,
    pub sweeps: u64,
    pub sweep_updated: u64,
    pub sweep_failed: u64,
    pub deleted: u64,
    pub purged: u64,
}

impl MetricsSummary {
    /// Log the summary as one structured event
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            records = %self.records,
            requests_total = %self.requests_total,
            requests_per_sec = self.requests_per_sec,
            lat_avg_us = %self.request_latency_avg_us,
            lat_p50_us = %self.request_latency_p50_us,
            lat_p95_us = %self.request_latency_p95_us,
            lat_p99_us = %self.request_latency_p99_us,
            lat_max_us = %self.request_latency_max_us,
            created = %self.bookings_created,
            confirmed = %self.confirmed,
            cancelled_user = %self.cancelled_by_user,
            cancelled_admin = %self.cancelled_by_admin,
            reactivated = %self.reactivated,
            reactivations_refused = %self.reactivations_refused,
            transitions_rejected = %self.transitions_rejected,
            expired = %self.expired,
            auto_confirmed = %self.auto_confirmed,
            sweeps = %self.sweeps,
            sweep_updated = %self.sweep_updated,
            sweep_failed = %self.sweep_failed,
            deleted = %self.deleted,
            purged = %self.purged,
            "metrics_summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(100000), 10);
    }

    #[test]
    fn test_record_and_report() {
        let metrics = Metrics::new();
        metrics.record_request(150);
        metrics.record_request(250);
        metrics.record_created();
        metrics.record_confirmed();
        metrics.record_cancelled(Actor::User);
        metrics.record_cancelled(Actor::Admin);
        metrics.record_sweep(2, 1);

        let summary = metrics.report(5);
        assert_eq!(summary.records, 5);
        assert_eq!(summary.requests_total, 2);
        assert_eq!(summary.request_latency_avg_us, 200);
        assert_eq!(summary.request_latency_max_us, 250);
        assert_eq!(summary.bookings_created, 1);
        assert_eq!(summary.confirmed, 1);
        assert_eq!(summary.cancelled_by_user, 1);
        assert_eq!(summary.cancelled_by_admin, 1);
        assert_eq!(summary.sweeps, 1);
        assert_eq!(summary.sweep_updated, 2);
        assert_eq!(summary.sweep_failed, 1);
    }

    #[test]
    fn test_report_resets_interval_counters() {
        let metrics = Metrics::new();
        metrics.record_request(150);

        let first = metrics.report(0);
        assert_eq!(first.request_latency_max_us, 150);

        let second = metrics.report(0);
        assert_eq!(second.request_latency_max_us, 0);
        assert_eq!(second.request_latency_avg_us, 0);
        // Monotonic totals survive the reset
        assert_eq!(second.requests_total, 1);
    }

    #[test]
    fn test_concurrent_reports_keep_rates_sane() {
        use std::sync::Arc;

        // A /metrics scrape racing the periodic summary task must never
        // panic or produce a negative rate
        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        metrics.record_request(100);
                        let summary = metrics.report(0);
                        assert!(summary.requests_per_sec.is_finite());
                        assert!(summary.requests_per_sec >= 0.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_percentile_from_empty_buckets() {
        let buckets = [0u64; METRICS_NUM_BUCKETS];
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 0);
    }
}
