//! Prometheus text exposition for booking metrics
//!
//! Formats the metrics snapshot served by the HTTP layer at /metrics.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn render(metrics: &Metrics, site: &str, records: usize) -> String {
    let summary = metrics.report(records);
    let mut output = String::with_capacity(8192);

    write_request_metrics(&mut output, site, &summary);
    write_lifecycle_metrics(&mut output, site, &summary);
    write_sweep_metrics(&mut output, site, &summary);

    output
}

fn write_request_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "fieldbook_http_requests_total",
        "Total HTTP requests handled",
        MetricType::Counter,
        site,
        summary.requests_total,
    );
    let _ = writeln!(output, "# HELP fieldbook_requests_per_sec Requests handled per second");
    let _ = writeln!(output, "# TYPE fieldbook_requests_per_sec gauge");
    let _ = writeln!(
        output,
        "fieldbook_requests_per_sec{{site=\"{site}\"}} {:.2}",
        summary.requests_per_sec
    );

    write_histogram(
        output,
        "fieldbook_request_latency_us",
        "Request handling latency in microseconds",
        site,
        &summary.request_latency_buckets,
        summary.request_latency_avg_us,
    );
    write_metric(
        output,
        "fieldbook_request_latency_p50_us",
        "50th percentile request latency",
        MetricType::Gauge,
        site,
        summary.request_latency_p50_us,
    );
    write_metric(
        output,
        "fieldbook_request_latency_p95_us",
        "95th percentile request latency",
        MetricType::Gauge,
        site,
        summary.request_latency_p95_us,
    );
    write_metric(
        output,
        "fieldbook_request_latency_p99_us",
        "99th percentile request latency",
        MetricType::Gauge,
        site,
        summary.request_latency_p99_us,
    );

    write_metric(
        output,
        "fieldbook_records",
        "Current number of stored bookings",
        MetricType::Gauge,
        site,
        summary.records as u64,
    );
}

fn write_lifecycle_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "fieldbook_bookings_created_total",
        "Bookings created",
        MetricType::Counter,
        site,
        summary.bookings_created,
    );
    write_metric(
        output,
        "fieldbook_confirmed_total",
        "Confirmations applied",
        MetricType::Counter,
        site,
        summary.confirmed,
    );
    write_metric(
        output,
        "fieldbook_cancelled_by_user_total",
        "Cancellations by users",
        MetricType::Counter,
        site,
        summary.cancelled_by_user,
    );
    write_metric(
        output,
        "fieldbook_cancelled_by_admin_total",
        "Cancellations by admins",
        MetricType::Counter,
        site,
        summary.cancelled_by_admin,
    );
    write_metric(
        output,
        "fieldbook_reactivated_total",
        "Reactivations applied",
        MetricType::Counter,
        site,
        summary.reactivated,
    );
    write_metric(
        output,
        "fieldbook_reactivations_refused_total",
        "Reactivations refused for admin-cancelled bookings",
        MetricType::Counter,
        site,
        summary.reactivations_refused,
    );
    write_metric(
        output,
        "fieldbook_transitions_rejected_total",
        "Transitions rejected as illegal",
        MetricType::Counter,
        site,
        summary.transitions_rejected,
    );
    write_metric(
        output,
        "fieldbook_expired_total",
        "Expiry transitions persisted",
        MetricType::Counter,
        site,
        summary.expired,
    );
    write_metric(
        output,
        "fieldbook_auto_confirmed_total",
        "Bookings confirmed by tacit consent",
        MetricType::Counter,
        site,
        summary.auto_confirmed,
    );
    write_metric(
        output,
        "fieldbook_deleted_total",
        "Bookings hard-deleted",
        MetricType::Counter,
        site,
        summary.deleted,
    );
}

fn write_sweep_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "fieldbook_sweeps_total",
        "Expiry sweep runs",
        MetricType::Counter,
        site,
        summary.sweeps,
    );
    write_metric(
        output,
        "fieldbook_sweep_updated_total",
        "Bookings expired by sweeps",
        MetricType::Counter,
        site,
        summary.sweep_updated,
    );
    write_metric(
        output,
        "fieldbook_sweep_failed_total",
        "Sweep candidates that failed to transition",
        MetricType::Counter,
        site,
        summary.sweep_failed,
    );
    write_metric(
        output,
        "fieldbook_purged_total",
        "Expired bookings purged in bulk",
        MetricType::Counter,
        site,
        summary.purged,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Actor;

    #[test]
    fn test_render_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_request(150);
        metrics.record_request(250);
        metrics.record_created();
        metrics.record_cancelled(Actor::Admin);
        metrics.record_sweep(2, 0);

        let output = render(&metrics, "polisportiva", 7);

        assert!(output.contains("fieldbook_http_requests_total{site=\"polisportiva\"} 2"));
        assert!(output.contains("fieldbook_request_latency_us_bucket{site=\"polisportiva\""));
        assert!(output.contains("fieldbook_bookings_created_total{site=\"polisportiva\"} 1"));
        assert!(output.contains("fieldbook_cancelled_by_admin_total{site=\"polisportiva\"} 1"));
        assert!(output.contains("fieldbook_sweep_updated_total{site=\"polisportiva\"} 2"));
        assert!(output.contains("fieldbook_records{site=\"polisportiva\"} 7"));
    }
}
