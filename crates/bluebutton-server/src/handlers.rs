use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, Uri, header},
    response::IntoResponse,
};
use bluebutton_api::RenderedJson;
use bluebutton_core::query::add_format_if_missing;
use bluebutton_core::{Bundle, OutputFormat, resolve_patient_key};
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::metrics;
use crate::middleware::AuthenticatedPrincipal;
use crate::proxy::ProxyError;
use crate::proxy::handler::caller_host_path;
use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "Blue Button FHIR Proxy",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready once an upstream base is configured.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.dispatcher.upstream().is_configured() {
        (StatusCode::OK, Json(HealthResponse { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "upstream not configured",
            }),
        )
    }
}

/// Prometheus text exposition.
pub async fn prometheus() -> impl IntoResponse {
    match metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics not initialized".to_string(),
        ),
    }
}

/// Upstream capability statement, with upstream URLs masked.
pub async fn metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<RenderedJson, ProxyError> {
    let url = format!(
        "{}{}",
        state.dispatcher.build_conformance_url(),
        add_format_if_missing("")
    );
    let upstream = state.dispatcher.dispatch(&url).await.map_err(|e| {
        ProxyError::from_dispatch(e, state.dispatcher.upstream().fail_redirect.as_deref())
    })?;

    let host_path = caller_host_path(&headers, &uri, "metadata");
    let mut urls = vec![state.dispatcher.fhir_server_url()];
    if let Some(answered) = upstream.base_url("metadata")
        && !urls.contains(&answered)
    {
        urls.push(answered);
    }
    let bundle = state
        .rewriter
        .post_process(OutputFormat::Json, &host_path, &upstream.body, &urls)?;
    let body = match &bundle {
        Bundle::Json(value) => state.rewriter.render(value)?,
        Bundle::Xml(text) => text.clone(),
    };
    Ok(RenderedJson::ok(body))
}

/// OIDC-style userinfo claims.
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub sub: String,
    pub name: String,
    pub given_name: String,
    pub family_name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub iat: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,
}

/// `GET /connect/userinfo`. A crosswalked caller's `sub` is their patient id.
pub async fn userinfo(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<UserInfo>, ProxyError> {
    let patient = resolve_patient_key(state.crosswalk.as_ref(), &principal).await?;
    let profile = &principal.profile;
    let given_name = profile.given_name.clone().unwrap_or_default();
    let family_name = profile.family_name.clone().unwrap_or_default();
    let name = profile
        .name
        .clone()
        .unwrap_or_else(|| format!("{given_name} {family_name}").trim().to_string());

    Ok(Json(UserInfo {
        sub: patient.clone().unwrap_or_else(|| principal.subject.clone()),
        name,
        given_name,
        family_name,
        email: profile.email.clone().unwrap_or_default(),
        iat: profile.joined_at,
        patient,
    }))
}
