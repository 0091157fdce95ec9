/// Metrics and telemetry for Tessera
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Credential resolution outcomes
/// - Workflow operations
/// - Email deliveries
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    /// Error responses by status code
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "errors_total",
        "Total number of error responses",
        &["status"]
    )
    .unwrap();

    // ========== Auth Metrics ==========

    /// Credential resolutions by mode (bearer, basic, none) and outcome
    pub static ref AUTH_RESOLUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "auth_resolutions_total",
        "Total number of credential resolutions",
        &["mode", "status"]
    )
    .unwrap();

    // ========== Workflow Metrics ==========

    /// Workflow operations by name and outcome
    pub static ref WORKFLOW_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "workflow_operations_total",
        "Total number of account workflow operations",
        &["operation", "status"]
    )
    .unwrap();

    /// Email deliveries by kind and outcome
    pub static ref EMAIL_DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "email_deliveries_total",
        "Total number of email delivery attempts",
        &["kind", "status"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();
}

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record an error response
pub fn record_error(status: u16) {
    ERRORS_TOTAL.with_label_values(&[&status.to_string()]).inc();
}

/// Record a credential resolution
pub fn record_auth_resolution(mode: &str, success: bool) {
    AUTH_RESOLUTIONS_TOTAL
        .with_label_values(&[mode, status_label(success)])
        .inc();
}

/// Record a workflow operation
pub fn record_workflow(operation: &str, success: bool) {
    WORKFLOW_OPERATIONS_TOTAL
        .with_label_values(&[operation, status_label(success)])
        .inc();
}

/// Record an email delivery attempt
pub fn record_email_delivery(kind: &str, success: bool) {
    EMAIL_DELIVERIES_TOTAL
        .with_label_values(&[kind, status_label(success)])
        .inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}
