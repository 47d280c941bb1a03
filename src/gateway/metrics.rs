//! Prometheus metrics for the agent.
//!
//! Probe gauges report `1.0` (yes), `0.0` (no), or `-1.0` (probe failed).

use std::sync::Arc;

use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{Error, Result};
use crate::pg::Cluster;

pub const METRIC_IS_ALIVE: &str = "pgsentinel_is_alive";
pub const METRIC_IN_RECOVERY: &str = "pgsentinel_in_recovery";
pub const METRIC_INFO: &str = "pgsentinel_info";

/// Install the process-wide Prometheus recorder and register the static
/// info gauge. Call once at startup.
pub fn install(hostname: &str) -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Config(format!("cannot install metrics recorder: {}", e)))?;

    describe_gauge!(METRIC_IS_ALIVE, "cluster liveness status");
    describe_gauge!(METRIC_IN_RECOVERY, "cluster recovery status");
    describe_gauge!(METRIC_INFO, "application info");

    gauge!(
        METRIC_INFO,
        "version" => env!("CARGO_PKG_VERSION"),
        "hostname" => hostname.to_string()
    )
    .set(1.0);

    Ok(handle)
}

/// Probe the cluster and update the liveness/recovery gauges.
pub async fn refresh_probes(cluster: &Arc<dyn Cluster>, hostname: &str) {
    let alive = probe_value(cluster.alive().await);
    gauge!(METRIC_IS_ALIVE, "hostname" => hostname.to_string()).set(alive);

    let in_recovery = probe_value(cluster.in_recovery().await);
    gauge!(METRIC_IN_RECOVERY, "hostname" => hostname.to_string()).set(in_recovery);
}

fn probe_value(result: Result<bool>) -> f64 {
    match result {
        Ok(true) => 1.0,
        Ok(false) => 0.0,
        Err(_) => -1.0,
    }
}
