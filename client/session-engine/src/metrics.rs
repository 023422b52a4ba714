use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // Session lifecycle
    pub static ref SESSION_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "session_transitions_total",
        "Total number of session phase transitions, by target phase",
        &["phase"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sessions_active",
        "Number of sessions currently in the active or submitting phase"
    )
    .unwrap();

    pub static ref TIMER_TICKS_TOTAL: IntCounter = register_int_counter!(
        "timer_ticks_total",
        "Total number of countdown ticks processed"
    )
    .unwrap();

    // Submission pipeline
    pub static ref ANSWERS_PERSISTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_persisted_total",
        "Per-answer persistence attempts during finalization",
        &["outcome"]
    )
    .unwrap();

    pub static ref FINALIZE_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "finalize_attempts_total",
        "Finalization attempts by trigger and outcome",
        &["trigger", "outcome"]
    )
    .unwrap();

    // Remote grading service
    pub static ref REMOTE_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "remote_requests_total",
        "Total number of grading service requests",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref REMOTE_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "remote_request_duration_seconds",
        "Grading service request duration in seconds",
        &["operation"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Local cache
    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_operations_total",
        "Total number of local snapshot cache operations",
        &["operation", "status"]
    )
    .unwrap();
}

/// Render all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track a grading service call with metrics
pub async fn track_remote_call<F, T, E>(operation: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    REMOTE_REQUESTS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    REMOTE_REQUEST_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

/// Record a local cache operation outcome
pub fn record_cache_operation(operation: &str, ok: bool) {
    let status = if ok { "success" } else { "error" };
    CACHE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
}
