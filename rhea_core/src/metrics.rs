//! Prometheus metric registration.
//!
//! Counters and histograms are recorded with the `metrics` macros at the
//! call sites; this module installs the exporter and pins metric names and
//! bucket layouts in one place. The `/metrics` exposition itself is served
//! by the REST gateway.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

pub const FIND_TOOLS_REQUESTS: &str = "find_tools_requests_total";
pub const FIND_TOOLS_LATENCY: &str = "find_tools_request_latency_seconds";
pub const TOOL_EXECUTION_REQUESTS: &str = "tool_execution_request_total";
pub const TOOL_EXECUTION_RUNTIME: &str = "tool_execution_runtime_seconds";
pub const SUCCESSFUL_TOOL_EXECUTIONS: &str = "successful_tool_executions";
pub const FAILED_TOOL_EXECUTIONS: &str = "failed_tool_executions";
pub const WORKER_REGISTRY_SIZE: &str = "worker_registry_size";

/// Install the process-global recorder and return the exposition handle.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    // Tool runtimes spread from seconds to many minutes.
    let runtime_buckets: Vec<f64> = (1..601).step_by(15).map(|s| s as f64).collect();

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(TOOL_EXECUTION_RUNTIME.to_string()),
            &runtime_buckets,
        )?
        .install_recorder()?;

    describe();
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!(
        FIND_TOOLS_REQUESTS,
        "Total number of calls to the find_tools tool."
    );
    metrics::describe_histogram!(
        FIND_TOOLS_LATENCY,
        "Histogram of find_tools request latencies in seconds."
    );
    metrics::describe_counter!(
        TOOL_EXECUTION_REQUESTS,
        "Total number of tool executions (excluding find_tools)."
    );
    metrics::describe_histogram!(
        TOOL_EXECUTION_RUNTIME,
        "Histogram of tool execution runtimes in seconds."
    );
    metrics::describe_counter!(
        SUCCESSFUL_TOOL_EXECUTIONS,
        "Total number of successful tool executions."
    );
    metrics::describe_counter!(
        FAILED_TOOL_EXECUTIONS,
        "Total number of failed tool executions."
    );
    metrics::describe_gauge!(
        WORKER_REGISTRY_SIZE,
        "Number of workers currently registered with the scheduler."
    );
}
