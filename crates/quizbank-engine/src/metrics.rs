//! Prometheus metrics for the QuizBank engine.
//!
//! ## Metrics
//! - `validation_steps_total` - Counter for validation step outcomes
//! - `validation_failures_total` - Counter for validation failures by error code
//! - `command_operations_total` - Counter for command/query operations
//! - `taxonomy_references_total` - Counter for taxonomy references processed
//! - `operation_duration_seconds` - Histogram for engine operation latencies

use lazy_static::lazy_static;
use prometheus::{register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, HistogramVec};
use std::time::Instant;
use tracing::warn;

/// Operations slower than this are logged.
pub const SLOW_OPERATION_MS: u128 = 100;

/// Taxonomy batches larger than this are flagged.
pub const LARGE_TAXONOMY_BATCH: usize = 20;

lazy_static! {
    /// Counter for validation step outcomes by step name
    pub static ref VALIDATION_STEPS_TOTAL: CounterVec = register_counter_vec!(
        "validation_steps_total",
        "Validation chain step outcomes",
        &["step", "outcome"]
    )
    .unwrap();

    /// Counter for validation failures by error code
    pub static ref VALIDATION_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "validation_failures_total",
        "Validation failures by error code",
        &["code"]
    )
    .unwrap();

    /// Counter for command and query operations
    pub static ref COMMAND_OPERATIONS_TOTAL: CounterVec = register_counter_vec!(
        "command_operations_total",
        "Engine operations by name and status",
        &["operation", "status"]
    )
    .unwrap();

    /// Counter for taxonomy references processed across all commands
    pub static ref TAXONOMY_REFERENCES_TOTAL: Counter = register_counter!(
        "taxonomy_references_total",
        "Total taxonomy references processed"
    )
    .unwrap();

    /// Histogram for engine operation durations in seconds
    pub static ref OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "operation_duration_seconds",
        "Engine operation latency in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap();
}

/// Record a validation step outcome.
pub fn record_validation_step(step: &str, succeeded: bool) {
    let outcome = if succeeded { "success" } else { "failure" };
    VALIDATION_STEPS_TOTAL
        .with_label_values(&[step, outcome])
        .inc();
}

/// Record a validation failure by error code.
pub fn record_validation_failure(code: &str) {
    VALIDATION_FAILURES_TOTAL.with_label_values(&[code]).inc();
}

/// Record an engine operation outcome.
pub fn record_operation(operation: &str, status: &str) {
    COMMAND_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a batch of taxonomy references, flagging oversized batches.
pub fn record_taxonomy_references(count: usize) {
    TAXONOMY_REFERENCES_TOTAL.inc_by(count as f64);
    if count > LARGE_TAXONOMY_BATCH {
        warn!(count, threshold = LARGE_TAXONOMY_BATCH, "large taxonomy reference batch");
    }
}

/// Time an operation, record its duration, and log it when it exceeds
/// [`SLOW_OPERATION_MS`].
pub fn time_operation<T>(operation: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed();

    OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(elapsed.as_secs_f64());

    if elapsed.as_millis() > SLOW_OPERATION_MS {
        warn!(
            operation,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow engine operation"
        );
    }

    result
}
