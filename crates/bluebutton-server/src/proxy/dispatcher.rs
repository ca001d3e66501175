//! Upstream URL construction and the outbound GET.

use std::sync::Arc;
use std::time::Instant;

use bluebutton_core::query::prepend_q;
use bluebutton_core::{CrosswalkEntry, RouterStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::UpstreamConfig;
use crate::metrics;

/// User-facing notice for an unreachable upstream.
pub const UNREACHABLE_MESSAGE: &str = "FHIR Server is unreachable.";

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Connection failure, timeout, or a body that could not be read.
    #[error("FHIR Server is unreachable.")]
    Unreachable(#[source] reqwest::Error),

    /// Upstream answered with a status from the configured error set.
    #[error("Upstream returned status {status}")]
    UpstreamStatus { status: u16, body: String },
}

/// Successful upstream answer.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub body: String,
    /// Final URL after redirects.
    pub url: String,
}

impl UpstreamResponse {
    /// Base the upstream actually answered from: the final URL up to and
    /// including the `/` before the `segment` path component.
    ///
    /// Differs from the requested base only when the upstream redirected, in
    /// which case the body carries the redirected host's URLs.
    pub fn base_url(&self, segment: &str) -> Option<String> {
        let path = self.url.split('?').next().unwrap_or_default();
        let marker = format!("/{segment}");
        path.match_indices(&marker)
            .map(|(i, _)| i)
            .find(|&i| matches!(path[i + marker.len()..].chars().next(), None | Some('/')))
            .map(|i| path[..=i].to_string())
    }
}

/// Builds upstream URLs and performs calls with a bounded timeout.
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    upstream: Arc<UpstreamConfig>,
    routers: Arc<dyn RouterStore>,
}

impl Dispatcher {
    /// Fails only when the HTTP client cannot be constructed (TLS backend
    /// initialization).
    pub fn new(
        upstream: UpstreamConfig,
        routers: Arc<dyn RouterStore>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(upstream.timeout())
            .build()?;
        Ok(Self {
            client,
            upstream: Arc::new(upstream),
            routers,
        })
    }

    pub fn upstream(&self) -> &UpstreamConfig {
        &self.upstream
    }

    /// Global base: `server + path + release`, with `release` forced to end
    /// in `/`. Empty when no upstream is configured.
    pub fn fhir_server_url(&self) -> String {
        if !self.upstream.is_configured() {
            return String::new();
        }
        let mut release = self.upstream.release.clone();
        if !release.ends_with('/') {
            release.push('/');
        }
        format!("{}{}{}", self.upstream.server, self.upstream.path, release)
    }

    /// Upstream base for `resource_type`.
    ///
    /// Priority: the principal's crosswalk source, then the router entry,
    /// then the global base.
    pub async fn resolve_base_path(
        &self,
        resource_type: &str,
        crosswalk: Option<&CrosswalkEntry>,
    ) -> Result<String, StoreError> {
        if let Some(base) = crosswalk.and_then(|c| c.upstream_base.as_deref())
            && !base.is_empty()
        {
            return Ok(with_trailing_slash(base));
        }
        if let Some(route) = self.routers.find(resource_type).await? {
            debug!(resource_type, base = %route.base_path, "Using router override");
            return Ok(with_trailing_slash(&route.base_path));
        }
        Ok(self.fhir_server_url())
    }

    /// `server + path + release + "/metadata"`.
    pub fn build_conformance_url(&self) -> String {
        let release = self.upstream.release.trim_end_matches('/');
        format!(
            "{}{}{}/metadata",
            self.upstream.server, self.upstream.path, release
        )
    }

    /// GETs `url`. Statuses in the configured error set come back as
    /// [`DispatchError::UpstreamStatus`]; nothing is retried.
    #[instrument(skip(self), fields(upstream_url = %url))]
    pub async fn dispatch(&self, url: &str) -> Result<UpstreamResponse, DispatchError> {
        let started = Instant::now();
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(timeout_secs = self.upstream.timeout_secs, "Upstream request timed out");
            } else {
                warn!(error = %e, "Upstream request failed");
            }
            metrics::record_upstream_failure("unreachable");
            DispatchError::Unreachable(e)
        })?;
        metrics::record_upstream_duration(started.elapsed());

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| {
            warn!(error = %e, "Failed to read upstream body");
            metrics::record_upstream_failure("unreachable");
            DispatchError::Unreachable(e)
        })?;

        if self.upstream.error_codes.contains(&status) {
            info!(status, "Upstream returned error status");
            metrics::record_upstream_failure(&status.to_string());
            return Err(DispatchError::UpstreamStatus { status, body });
        }

        info!(status, elapsed_ms = %started.elapsed().as_millis(), "Upstream request completed");
        Ok(UpstreamResponse {
            body,
            url: final_url,
        })
    }
}

/// `{base}{resource_type}/{masked_id}[_history/{vid}]?{query}`.
///
/// `masked_id` is expected to carry its trailing `/` already, as produced by
/// `masked_path_id(.., true)`.
pub fn build_resource_url(
    base: &str,
    resource_type: &str,
    masked_id: Option<&str>,
    version_id: Option<&str>,
    query: &str,
) -> String {
    let mut url = format!("{base}{resource_type}/");
    if let Some(id) = masked_id {
        url.push_str(id);
        if let Some(vid) = version_id {
            url.push_str("_history/");
            url.push_str(vid);
        }
    }
    url.push_str(&prepend_q(query));
    url
}

fn with_trailing_slash(base: &str) -> String {
    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    }
}
