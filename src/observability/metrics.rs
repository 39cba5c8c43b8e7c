//! Prometheus metrics export.

use crate::config::MetricsSettings;
use crate::{Error, Result};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Installs the Prometheus recorder when a listen address is configured.
///
/// Without an address no recorder is installed and every `metrics` macro
/// in the crate is a no-op. The HTTP listener runs on a background thread
/// owned by the exporter. Returns whether a listener was installed.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or a recorder is
/// already installed.
pub fn install_prometheus(settings: Option<&MetricsSettings>) -> Result<bool> {
    let Some(listen) = settings.and_then(|s| s.listen) else {
        return Ok(false);
    };

    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_listener_install".to_string(),
            cause: format!("{listen}: {e}"),
        })?;
    describe_metrics();

    tracing::info!(%listen, "Prometheus metrics listener installed");
    Ok(true)
}

fn describe_metrics() {
    metrics::describe_counter!("uq_records_total", "Records read from input");
    metrics::describe_counter!(
        "uq_records_emitted_total",
        "Records written to output"
    );
    metrics::describe_counter!(
        "uq_presort_suppressed_total",
        "Records dropped by the presort buffer"
    );
    metrics::describe_counter!(
        "uq_batches_committed_total",
        "Index batches made durable"
    );
    metrics::describe_counter!(
        "storage_operations_total",
        "Index backend operations by backend, operation and status"
    );
    metrics::describe_histogram!(
        "storage_operation_duration_ms",
        "Index backend operation latency in milliseconds"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_listen_address_installs_nothing() {
        assert!(!install_prometheus(None).unwrap());
        let settings = MetricsSettings { listen: None };
        assert!(!install_prometheus(Some(&settings)).unwrap());
    }
}
