//! Prometheus metrics for the identity service.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Histogram buckets for store operation latency, in seconds.
const STORE_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// Install the global Prometheus recorder.
///
/// Only one recorder can be installed per process; a second call fails.
pub fn init_metrics(service_name: &str) -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .add_global_label("service", service_name)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "castellan_store_operation_seconds".to_string(),
            ),
            STORE_BUCKETS,
        )?
        .install_recorder()?;

    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");
    Ok(handle)
}

fn register_metric_descriptions() {
    describe_counter!("castellan_errors_total", "Errors raised, by code and category");
    describe_counter!("castellan_users_created_total", "Users created, by type");
    describe_counter!("castellan_api_keys_issued_total", "API keys issued through bulk requests");
    describe_counter!(
        "castellan_authorization_decisions_total",
        "Authorization decisions, by action and outcome"
    );
    describe_histogram!(
        "castellan_store_operation_seconds",
        "Identity store operation latency in seconds"
    );
}

pub fn record_user_created(user_type: &str) {
    counter!("castellan_users_created_total", "type" => user_type.to_string()).increment(1);
}

pub fn record_api_keys_issued(count: u64) {
    counter!("castellan_api_keys_issued_total").increment(count);
}

pub fn record_authorization(action: &str, allowed: bool) {
    counter!(
        "castellan_authorization_decisions_total",
        "action" => action.to_string(),
        "outcome" => if allowed { "allowed" } else { "denied" },
    )
    .increment(1);
}

/// Records elapsed time for one store operation when dropped.
pub struct StoreTimer {
    operation: &'static str,
    started: Instant,
}

impl StoreTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            started: Instant::now(),
        }
    }
}

impl Drop for StoreTimer {
    fn drop(&mut self) {
        histogram!("castellan_store_operation_seconds", "operation" => self.operation)
            .record(self.started.elapsed().as_secs_f64());
    }
}
