//! Prometheus metrics export.
//!
//! Workflow counters (`classroom_bookings_total`, `payments_reconciled_total`,
//! `payouts_settled_total`, `notifications_delivered_total`, ...) are emitted
//! by the library; this module installs the exporter and adds HTTP and job
//! metrics.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
///
/// # Errors
///
/// Returns an error message if the listener cannot be installed
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))?;
    describe();
    Ok(())
}

fn describe() {
    metrics::describe_counter!("http_requests_total", "HTTP requests by method and status");
    metrics::describe_histogram!("http_request_duration_ms", "HTTP request latency");
    metrics::describe_counter!("classroom_bookings_total", "Classrooms booked by mode");
    metrics::describe_counter!("classroom_transitions_total", "Classroom status changes");
    metrics::describe_counter!("payments_reconciled_total", "Payment references reconciled");
    metrics::describe_counter!("payouts_settled_total", "Payout requests processed");
    metrics::describe_counter!("payouts_skipped_total", "Payout requests left for lack of funds");
    metrics::describe_counter!("payouts_failed_total", "Payout requests failed in a run");
    metrics::describe_counter!("payouts_expired_total", "Pending payouts past the window");
    metrics::describe_counter!("notifications_delivered_total", "Notification emails sent");
    metrics::describe_counter!("notifications_failed_total", "Notification emails given up on");
    metrics::describe_counter!("notifications_dropped_total", "Notifications lost to a full queue");
    metrics::describe_counter!("meeting_link_failures_total", "Accepted classes without a link");
    metrics::describe_counter!("job_runs_total", "Background job runs by job and outcome");
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Auth Metrics
// ============================================================================

/// Increment login attempts counter.
pub fn login_attempts_total(success: bool) {
    metrics::counter!("login_attempts_total",
        "success" => success.to_string()
    )
    .increment(1);
}

// ============================================================================
// Job Metrics
// ============================================================================

/// Count one background job run.
pub fn job_runs_total(job: &'static str, success: bool) {
    metrics::counter!("job_runs_total",
        "job" => job,
        "outcome" => if success { "ok" } else { "error" }
    )
    .increment(1);
}
