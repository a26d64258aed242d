//! Metrics collection for spatial queries
//!
//! Thread-safe counters using atomic operations, plus rendering in the
//! Prometheus text exposition format.

use crate::error::SpatialError;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for the query handler
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    // Request statistics
    total_requests: AtomicU64,
    row_stream_requests: AtomicU64,
    count_requests: AtomicU64,
    not_modified: AtomicU64,

    // Failures
    client_errors: AtomicU64,
    engine_failures: AtomicU64,
    aborted_streams: AtomicU64,

    // Output
    rows_sent: AtomicU64,
    bytes_sent: AtomicU64,

    // Time until the response head was ready (microseconds)
    total_head_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub row_stream_requests: u64,
    pub count_requests: u64,
    pub not_modified: u64,
    pub client_errors: u64,
    pub engine_failures: u64,
    pub aborted_streams: u64,
    pub rows_sent: u64,
    pub bytes_sent: u64,
    pub total_head_duration_us: u64,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_row_stream(&self) {
        self.row_stream_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_count(&self) {
        self.count_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_modified(&self) {
        self.not_modified.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that ended in an error response or an aborted stream
    pub fn record_error(&self, error: &SpatialError) {
        match error {
            SpatialError::ClientDisconnected => {}
            e if e.is_client_error() => {
                self.client_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.engine_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_aborted_stream(&self) {
        self.aborted_streams.fetch_add(1, Ordering::Relaxed);
    }

    /// Record rows and bytes written to a client
    pub fn record_output(&self, rows: u64, bytes: u64) {
        self.rows_sent.fetch_add(rows, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_head_duration(&self, duration: Duration) {
        self.total_head_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are loaded one by one, so a snapshot taken under load may not
    /// be perfectly consistent across fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            row_stream_requests: self.row_stream_requests.load(Ordering::Relaxed),
            count_requests: self.count_requests.load(Ordering::Relaxed),
            not_modified: self.not_modified.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            engine_failures: self.engine_failures.load(Ordering::Relaxed),
            aborted_streams: self.aborted_streams.load(Ordering::Relaxed),
            rows_sent: self.rows_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            total_head_duration_us: self.total_head_duration_us.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Average time until the response head was ready, in milliseconds
    pub fn avg_head_duration_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_head_duration_us as f64 / self.total_requests as f64) / 1000.0
        }
    }

    /// Share of row-stream requests answered with 304, as a percentage
    pub fn not_modified_rate(&self) -> f64 {
        let eligible = self.row_stream_requests + self.not_modified;
        if eligible == 0 {
            0.0
        } else {
            (self.not_modified as f64 / eligible as f64) * 100.0
        }
    }

    /// Render in the Prometheus text exposition format
    pub fn format_prometheus(&self) -> String {
        let counters: [(&str, &str, u64); 9] = [
            ("requests_total", "Total number of spatial query requests", self.total_requests),
            ("row_stream_requests_total", "Requests answered with a row stream", self.row_stream_requests),
            ("count_requests_total", "Requests answered in count mode", self.count_requests),
            ("not_modified_total", "Requests answered with 304 Not Modified", self.not_modified),
            ("client_errors_total", "Requests rejected with a 4xx error", self.client_errors),
            ("engine_failures_total", "Requests failed by the index engine", self.engine_failures),
            ("aborted_streams_total", "Row streams aborted after the response started", self.aborted_streams),
            ("rows_sent_total", "Rows written to clients", self.rows_sent),
            ("bytes_sent_total", "Body bytes written to clients", self.bytes_sent),
        ];
        let gauges: [(&str, &str, f64); 2] = [
            ("head_duration_ms_avg", "Average time until the response head was ready in milliseconds", self.avg_head_duration_ms()),
            ("not_modified_rate", "Share of conditional requests answered with 304, percentage", self.not_modified_rate()),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP spatial_view_{} {}", name, help);
            let _ = writeln!(output, "# TYPE spatial_view_{} counter", name);
            let _ = writeln!(output, "spatial_view_{} {}\n", name, value);
        }
        for (name, help, value) in gauges {
            let _ = writeln!(output, "# HELP spatial_view_{} {}", name, help);
            let _ = writeln!(output, "# TYPE spatial_view_{} gauge", name);
            let _ = writeln!(output, "spatial_view_{} {:.2}\n", name, value);
        }
        output
    }
}
