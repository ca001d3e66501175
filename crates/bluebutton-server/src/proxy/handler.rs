//! Pass-through handlers for `read`, `vread` and `search`.
//!
//! Each request goes: access control, one crosswalk read, outbound query and
//! path id, upstream GET, URL masking, output envelope.

use axum::{
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, Uri, header},
};
use bluebutton_api::RenderedJson;
use bluebutton_core::query::parse_query;
use bluebutton_core::{
    Decision, RequestContext, authorize, build_outbound_query, derive_host_path, masked_path_id,
};
use tracing::{debug, info, instrument};

use super::dispatcher::build_resource_url;
use super::error::ProxyError;
use crate::metrics::{self, ProxyOutcome};
use crate::middleware::AuthenticatedPrincipal;
use crate::server::AppState;

/// Inbound request parts the pipeline needs besides path parameters.
#[derive(Debug)]
struct Inbound {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

/// `GET /{resource_type}`
pub async fn search(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(resource_type): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Result<RenderedJson, ProxyError> {
    let ctx = RequestContext::new(
        resource_type,
        None,
        None,
        parse_query(raw_query.as_deref().unwrap_or_default()),
        principal,
    );
    pass_through(&state, ctx, Inbound { method, uri, headers }).await
}

/// `GET /{resource_type}/{id}`
pub async fn read(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path((resource_type, id)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Result<RenderedJson, ProxyError> {
    let ctx = RequestContext::new(
        resource_type,
        Some(id),
        None,
        parse_query(raw_query.as_deref().unwrap_or_default()),
        principal,
    );
    pass_through(&state, ctx, Inbound { method, uri, headers }).await
}

/// `GET /{resource_type}/{id}/_history/{vid}`
pub async fn vread(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path((resource_type, id, vid)): Path<(String, String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Result<RenderedJson, ProxyError> {
    let ctx = RequestContext::new(
        resource_type,
        Some(id),
        Some(vid),
        parse_query(raw_query.as_deref().unwrap_or_default()),
        principal,
    );
    pass_through(&state, ctx, Inbound { method, uri, headers }).await
}

#[instrument(
    skip_all,
    fields(resource_type = %ctx.resource_type, interaction = %ctx.interaction)
)]
async fn pass_through(
    state: &AppState,
    ctx: RequestContext,
    inbound: Inbound,
) -> Result<RenderedJson, ProxyError> {
    let resource_type = ctx.resource_type.clone();
    let interaction = ctx.interaction.as_str();

    let result = run_pipeline(state, &ctx, &inbound).await;
    let outcome = match &result {
        Ok(_) => ProxyOutcome::Ok,
        Err(ProxyError::Forbidden(_)) => ProxyOutcome::Forbidden,
        Err(ProxyError::NotFound(_)) => ProxyOutcome::NotFound,
        Err(ProxyError::Unreachable { .. }) => ProxyOutcome::Unreachable,
        Err(ProxyError::UpstreamStatus { .. }) => ProxyOutcome::UpstreamError,
        Err(ProxyError::MalformedBody(_)) => ProxyOutcome::MalformedBody,
        Err(_) => ProxyOutcome::Internal,
    };
    metrics::record_proxy_request(&resource_type, interaction, outcome);
    result
}

async fn run_pipeline(
    state: &AppState,
    ctx: &RequestContext,
    inbound: &Inbound,
) -> Result<RenderedJson, ProxyError> {
    let resource_type = ctx.resource_type.as_str();

    // Access control runs before any upstream traffic.
    let policy = state.policies.get(resource_type).await?;
    match authorize(policy.as_ref(), resource_type, ctx.interaction.as_str()) {
        Decision::Allowed => {}
        Decision::Forbidden(reason) => {
            metrics::record_access_denied(resource_type, ProxyOutcome::Forbidden);
            info!(%reason, "Interaction denied");
            return Err(ProxyError::Forbidden(reason));
        }
        Decision::NotFound(reason) => {
            metrics::record_access_denied(resource_type, ProxyOutcome::NotFound);
            info!(%reason, "Unsupported resource type");
            return Err(ProxyError::NotFound(reason));
        }
    }

    // Single crosswalk read, shared by path masking and %PATIENT% substitution.
    let crosswalk = state
        .crosswalk
        .find_by_subject(&ctx.principal.subject)
        .await?;
    let patient_key = crosswalk.as_ref().map(|c| c.upstream_id.as_str());

    let query = build_outbound_query(&ctx.raw_query, policy.as_ref(), patient_key);
    let masked_id = ctx
        .id
        .as_deref()
        .map(|id| masked_path_id(resource_type, crosswalk.as_ref(), policy.as_ref(), id, true));

    let base = state
        .dispatcher
        .resolve_base_path(resource_type, crosswalk.as_ref())
        .await?;
    let url = build_resource_url(
        &base,
        resource_type,
        masked_id.as_deref(),
        ctx.version_id.as_deref(),
        &query,
    );
    debug!(upstream_url = %url, "Dispatching upstream");

    let upstream = state.dispatcher.dispatch(&url).await.map_err(|e| {
        ProxyError::from_dispatch(e, state.dispatcher.upstream().fail_redirect.as_deref())
    })?;

    let host_path = caller_host_path(&inbound.headers, &inbound.uri, resource_type);
    let mut mask_urls = vec![base];
    let candidates = [
        upstream.base_url(resource_type),
        Some(state.dispatcher.fhir_server_url()),
    ];
    for url in candidates.into_iter().flatten() {
        if !url.is_empty() && !mask_urls.contains(&url) {
            mask_urls.push(url);
        }
    }
    let bundle = state.rewriter.post_process(
        ctx.output_format,
        &host_path,
        &upstream.body,
        &mask_urls,
    )?;

    let envelope = state
        .rewriter
        .build_output_envelope(ctx, inbound.method.as_str(), bundle);
    let body = state.rewriter.render(&envelope)?;
    Ok(RenderedJson::ok(body))
}

/// Caller-facing base derived from the inbound Host and scheme.
pub(crate) fn caller_host_path(headers: &HeaderMap, uri: &Uri, resource_type: &str) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    let is_secure = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|p| p.eq_ignore_ascii_case("https"))
        .unwrap_or_else(|| uri.scheme_str() == Some("https"));
    let full_path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    derive_host_path(host, is_secure, full_path, resource_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn host_path_uses_forwarded_proto() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("api.example"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        let uri: Uri = "/Patient/42?_format=json".parse().unwrap();
        assert_eq!(
            caller_host_path(&headers, &uri, "Patient"),
            "https://api.example/"
        );
    }

    #[test]
    fn host_path_defaults_to_http() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("localhost:8000"));
        let uri: Uri = "/Observation?patient=1".parse().unwrap();
        assert_eq!(
            caller_host_path(&headers, &uri, "Observation"),
            "http://localhost:8000/"
        );
    }
}
