// Prometheus metrics for template execution
//
// - Template executions by tool and terminal status (counter)
// - Execution durations by tool (histogram)
// - In-flight executions (gauge)
// - Validation rejections by rule (counter)
// - Timeouts by tool (counter)

use crate::result::ExecutionResult;
use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref TEMPLATE_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("template_executions_total", "Total number of template executions"),
        &["tool", "status"]
    ).expect("Failed to create template executions metric");

    pub static ref EXECUTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("execution_duration_seconds", "Template execution duration in seconds")
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        &["tool"]
    ).expect("Failed to create execution duration metric");

    pub static ref EXECUTIONS_IN_FLIGHT: IntGauge = IntGauge::new(
        "executions_in_flight",
        "Number of tool processes currently running"
    ).expect("Failed to create in-flight executions metric");

    pub static ref VALIDATION_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("validation_rejections_total", "Commands rejected by a security rule"),
        &["rule"]
    ).expect("Failed to create validation rejections metric");

    pub static ref EXECUTION_TIMEOUTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("execution_timeouts_total", "Tool processes killed at their deadline"),
        &["tool"]
    ).expect("Failed to create timeouts metric");
}

/// Register all metrics with the registry
///
/// Safe to call more than once; already registered collectors are skipped.
pub fn init() -> prometheus::Result<()> {
    register(Box::new(TEMPLATE_EXECUTIONS_TOTAL.clone()))?;
    register(Box::new(EXECUTION_DURATION_SECONDS.clone()))?;
    register(Box::new(EXECUTIONS_IN_FLIGHT.clone()))?;
    register(Box::new(VALIDATION_REJECTIONS_TOTAL.clone()))?;
    register(Box::new(EXECUTION_TIMEOUTS_TOTAL.clone()))?;
    Ok(())
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> prometheus::Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Record a finished execution
pub fn record_result(result: &ExecutionResult) {
    let status = result.status().to_string();
    TEMPLATE_EXECUTIONS_TOTAL
        .with_label_values(&[result.tool.as_str(), status.as_str()])
        .inc();
    EXECUTION_DURATION_SECONDS
        .with_label_values(&[result.tool.as_str()])
        .observe(result.execution_time);
    if result.timed_out {
        EXECUTION_TIMEOUTS_TOTAL
            .with_label_values(&[result.tool.as_str()])
            .inc();
    }
}

/// Record a command rejected by a security rule
pub fn record_rejection(rule: &str) {
    VALIDATION_REJECTIONS_TOTAL.with_label_values(&[rule]).inc();
}

/// Tracks one running process in the in-flight gauge until dropped
pub struct InFlightGuard;

impl InFlightGuard {
    pub fn new() -> Self {
        EXECUTIONS_IN_FLIGHT.inc();
        Self
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        EXECUTIONS_IN_FLIGHT.dec();
    }
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
