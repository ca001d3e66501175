use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderName, HeaderValue, Request, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bluebutton_api::ApiError;
use bluebutton_core::Principal;
use url::form_urlencoded;
use uuid::Uuid;

use crate::proxy::ProxyError;
use crate::server::AppState;

// =============================================================================
// Authentication
// =============================================================================

/// Resolves the caller's bearer token to a [`Principal`] and stores it in
/// request extensions. The token comes from the `Authorization` header or,
/// failing that, the `access_token` query parameter.
pub async fn authentication_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if should_skip_authentication(&req) {
        return next.run(req).await;
    }

    let token = match extract_token(&req) {
        Ok(Some(token)) => token,
        Ok(None) => {
            tracing::debug!(path = %req.uri().path(), "No access token");
            return ApiError::unauthorized("Authentication required").into_response();
        }
        Err(message) => return ApiError::unauthorized(message).into_response(),
    };

    match state.identity.authenticate(&token).await {
        Ok(Some(principal)) => {
            tracing::debug!(subject = %principal.subject, "Token validated successfully");
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Ok(None) => {
            tracing::debug!("Unknown access token");
            ApiError::unauthorized("Invalid access token").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Identity provider failure");
            ApiError::internal("Identity provider unavailable").into_response()
        }
    }
}

fn extract_token(req: &Request<Body>) -> Result<Option<String>, &'static str> {
    if let Some(value) = req.headers().get(AUTHORIZATION) {
        let header = value
            .to_str()
            .map_err(|_| "Invalid Authorization header format")?;
        return match header.strip_prefix("Bearer ") {
            Some(t) if !t.trim().is_empty() => Ok(Some(t.trim().to_string())),
            _ => Err("Invalid Authorization header format"),
        };
    }

    Ok(req.uri().query().and_then(|q| {
        form_urlencoded::parse(q.as_bytes())
            .find(|(k, v)| k == "access_token" && !v.is_empty())
            .map(|(_, v)| v.into_owned())
    }))
}

fn should_skip_authentication(req: &Request<Body>) -> bool {
    let path = req.uri().path();
    let public_paths = ["/", "/healthz", "/readyz", "/metadata", "/metrics"];
    public_paths.contains(&path)
}

/// Extracts the [`Principal`] placed by [`authentication_middleware`].
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal(pub Principal);

impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = ProxyError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthenticatedPrincipal)
            .ok_or(ProxyError::Unauthenticated)
    }
}

// =============================================================================
// Other Middleware
// =============================================================================

// Ensures each request has an X-Request-Id and mirrors it on the response.
// Layered outside the trace layer, which reads the header for its span.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    let req_id_value = req
        .headers()
        .get(&header_name)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

    let Some(req_id_value) = req_id_value else {
        return next.run(req).await;
    };

    req.headers_mut()
        .insert(header_name.clone(), req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn token_from_bearer_header() {
        let req = request("/Patient/1", Some("Bearer abc123"));
        assert_eq!(extract_token(&req).unwrap(), Some("abc123".to_string()));
    }

    #[test]
    fn token_from_query_parameter() {
        let req = request("/Patient/1?_format=json&access_token=xyz", None);
        assert_eq!(extract_token(&req).unwrap(), Some("xyz".to_string()));
    }

    #[test]
    fn malformed_authorization_header_is_rejected() {
        let req = request("/Patient/1", Some("Basic dXNlcjpwYXNz"));
        assert!(extract_token(&req).is_err());
    }

    #[test]
    fn missing_token_is_none() {
        let req = request("/Patient/1?_count=5", None);
        assert_eq!(extract_token(&req).unwrap(), None);
    }

    #[test]
    fn public_paths_skip_authentication() {
        assert!(should_skip_authentication(&request("/healthz", None)));
        assert!(should_skip_authentication(&request("/metadata", None)));
        assert!(!should_skip_authentication(&request("/Patient", None)));
        assert!(!should_skip_authentication(&request("/connect/userinfo", None)));
    }

    async fn spawn_echo() -> String {
        use axum::{Router, http::HeaderMap, routing::get};

        let app = Router::new()
            .route(
                "/echo",
                get(|headers: HeaderMap| async move {
                    headers
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                }),
            )
            .layer(axum::middleware::from_fn(request_id));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/echo")
    }

    #[tokio::test]
    async fn generated_request_id_is_visible_downstream() {
        let url = spawn_echo().await;
        let resp = reqwest::get(&url).await.unwrap();
        let echoed_header = resp.headers()["x-request-id"].to_str().unwrap().to_string();
        let seen_by_handler = resp.text().await.unwrap();

        assert!(Uuid::parse_str(&seen_by_handler).is_ok());
        assert_eq!(seen_by_handler, echoed_header);
    }

    #[tokio::test]
    async fn supplied_request_id_is_kept() {
        let url = spawn_echo().await;
        let resp = reqwest::Client::new()
            .get(&url)
            .header("x-request-id", "req-7")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.headers()["x-request-id"], "req-7");
        assert_eq!(resp.text().await.unwrap(), "req-7");
    }
}
