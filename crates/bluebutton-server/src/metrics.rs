//! Prometheus metrics for the proxy.
//!
//! This module provides:
//! - proxied request counts by resource type, interaction and outcome
//! - access-control denials
//! - upstream failures and latency

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const PROXY_REQUESTS_TOTAL: &str = "bluebutton_proxy_requests_total";
    pub const ACCESS_DENIED_TOTAL: &str = "bluebutton_access_denied_total";
    pub const UPSTREAM_FAILURES_TOTAL: &str = "bluebutton_upstream_failures_total";
    pub const UPSTREAM_DURATION_SECONDS: &str = "bluebutton_upstream_duration_seconds";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: /metrics renders from the handle.
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Outcome label for a finished proxy request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Ok,
    Forbidden,
    NotFound,
    Unreachable,
    UpstreamError,
    MalformedBody,
    Internal,
}

impl ProxyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Unreachable => "unreachable",
            Self::UpstreamError => "upstream_error",
            Self::MalformedBody => "malformed_body",
            Self::Internal => "internal",
        }
    }
}

pub fn record_proxy_request(resource_type: &str, interaction: &str, outcome: ProxyOutcome) {
    counter!(
        names::PROXY_REQUESTS_TOTAL,
        "resource_type" => resource_type.to_string(),
        "interaction" => interaction.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_access_denied(resource_type: &str, outcome: ProxyOutcome) {
    counter!(
        names::ACCESS_DENIED_TOTAL,
        "resource_type" => resource_type.to_string(),
        "reason" => outcome.as_str()
    )
    .increment(1);
}

/// `kind` is "unreachable" or the upstream status code.
pub fn record_upstream_failure(kind: &str) {
    counter!(names::UPSTREAM_FAILURES_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_upstream_duration(duration: Duration) {
    histogram!(names::UPSTREAM_DURATION_SECONDS).record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels_are_snake_case() {
        assert_eq!(ProxyOutcome::NotFound.as_str(), "not_found");
        assert_eq!(ProxyOutcome::MalformedBody.as_str(), "malformed_body");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_proxy_request("Patient", "read", ProxyOutcome::Ok);
        record_upstream_duration(Duration::from_millis(5));
    }
}
