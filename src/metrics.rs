//! Prometheus metrics for the automation core
//!
//! Provides observability metrics for production monitoring:
//! - Job queue throughput
//! - Action execution durations
//! - Screenshot broadcast volume
//! - Resource cleanup failures

use crate::job::JobState;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use warp::Filter;

lazy_static! {
    /// Total jobs accepted by the producer
    pub static ref JOBS_ENQUEUED_TOTAL: Counter = register_counter!(
        "panelpilot_jobs_enqueued_total",
        "Total number of jobs accepted by the producer"
    )
    .unwrap();

    /// Jobs reaching a terminal state
    pub static ref JOBS_FINISHED_TOTAL: CounterVec = register_counter_vec!(
        "panelpilot_jobs_finished_total",
        "Total number of jobs reaching a terminal state",
        &["state"]  // "completed", "failed", "cancelled"
    )
    .unwrap();

    /// Action execution duration histogram
    pub static ref ACTION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "panelpilot_action_duration_seconds",
        "Wall-clock action execution duration in seconds",
        &["action", "status"],  // status: "success", "fail", "unknown"
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]
    )
    .unwrap();

    /// Screenshot frames published to subscribers
    pub static ref SCREENSHOT_FRAMES_TOTAL: Counter = register_counter!(
        "panelpilot_screenshot_frames_total",
        "Total number of screenshot frames published"
    )
    .unwrap();

    /// Browser resources closed by cleanup sweeps
    pub static ref CLEANUP_CLOSED_TOTAL: CounterVec = register_counter_vec!(
        "panelpilot_cleanup_closed_total",
        "Total number of browser resources closed by cleanup sweeps",
        &["resource"]  // "page", "context", "browser"
    )
    .unwrap();

    /// Close calls that failed during cleanup (best-effort, sweep continues)
    pub static ref CLEANUP_FAILURES_TOTAL: Counter = register_counter!(
        "panelpilot_cleanup_failures_total",
        "Total number of resource close failures during cleanup"
    )
    .unwrap();
}

/// Start the Prometheus metrics HTTP server
///
/// Serves metrics on the specified address.
/// Returns a future that runs until cancelled
pub async fn start_metrics_server(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("[metrics] Starting Prometheus metrics server on {}", addr);

    let metrics_route = warp::path("metrics").and(warp::get()).map(|| {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            eprintln!("[metrics] Error encoding metrics: {}", e);
            return warp::reply::with_status(
                "Error encoding metrics".to_string(),
                warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            );
        }

        warp::reply::with_status(
            String::from_utf8_lossy(&buffer).to_string(),
            warp::http::StatusCode::OK,
        )
    });

    let health_route = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));

    let routes = metrics_route.or(health_route);

    eprintln!("[metrics] Metrics available at http://{}/metrics", addr);

    warp::serve(routes).run(addr).await;

    Ok(())
}

/// Helper to record an enqueued job
pub fn record_job_enqueued() {
    JOBS_ENQUEUED_TOTAL.inc();
}

/// Helper to record a job reaching a terminal state
pub fn record_job_finished(state: JobState) {
    JOBS_FINISHED_TOTAL
        .with_label_values(&[&state.to_string()])
        .inc();
}

/// Helper to record one action execution
pub fn record_action(action: &str, status: &str, elapsed_secs: f64) {
    ACTION_DURATION_SECONDS
        .with_label_values(&[action, status])
        .observe(elapsed_secs);
}

/// Helper to record a published screenshot frame
pub fn record_frame_published() {
    SCREENSHOT_FRAMES_TOTAL.inc();
}

/// Helper to record a closed resource
pub fn record_resource_closed(resource: &str) {
    CLEANUP_CLOSED_TOTAL.with_label_values(&[resource]).inc();
}

/// Helper to record a failed close call
pub fn record_cleanup_failure() {
    CLEANUP_FAILURES_TOTAL.inc();
}
