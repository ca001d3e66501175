//! Proxy pipeline errors and their HTTP mapping.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bluebutton_api::ApiError;
use bluebutton_core::{RewriteError, StoreError};
use thiserror::Error;

use super::dispatcher::{DispatchError, UNREACHABLE_MESSAGE};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Upstream could not be reached; `redirect` is the configured fail target.
    #[error("FHIR Server is unreachable.")]
    Unreachable { redirect: Option<String> },

    #[error("Upstream returned status {status}")]
    UpstreamStatus { status: u16, body: String },

    #[error(transparent)]
    MalformedBody(#[from] RewriteError),

    #[error("Lookup failed: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to render response: {0}")]
    Render(#[from] serde_json::Error),
}

impl ProxyError {
    pub fn from_dispatch(err: DispatchError, redirect: Option<&str>) -> Self {
        match err {
            DispatchError::Unreachable(_) => Self::Unreachable {
                redirect: redirect.map(str::to_string),
            },
            DispatchError::UpstreamStatus { status, body } => Self::UpstreamStatus { status, body },
        }
    }

    fn into_api_error(self) -> ApiError {
        match self {
            Self::Unauthenticated => ApiError::unauthorized("Authentication required"),
            Self::Forbidden(msg) => ApiError::forbidden(msg),
            Self::NotFound(msg) => ApiError::not_found(msg),
            Self::Unreachable { .. } => ApiError::bad_gateway(UNREACHABLE_MESSAGE),
            Self::UpstreamStatus { status, body } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                ApiError::upstream(status, body)
            }
            Self::MalformedBody(e) => ApiError::internal(e.to_string()),
            Self::Store(e) => ApiError::internal(e.to_string()),
            Self::Render(e) => ApiError::internal(format!("Failed to render response: {e}")),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        if let Self::Unreachable {
            redirect: Some(target),
        } = &self
            && let Ok(location) = HeaderValue::from_str(target)
        {
            return (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
        }
        self.into_api_error().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_without_redirect_is_bad_gateway() {
        let resp = ProxyError::Unreachable { redirect: None }.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn unreachable_with_redirect_is_found() {
        let resp = ProxyError::Unreachable {
            redirect: Some("/home".into()),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/home");
    }

    #[test]
    fn upstream_status_is_mirrored() {
        let resp = ProxyError::UpstreamStatus {
            status: 410,
            body: String::new(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::GONE);
    }

    #[test]
    fn malformed_body_is_internal_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("<html>").unwrap_err();
        let resp = ProxyError::from(RewriteError::from(parse_err)).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn access_errors_map_to_403_and_404() {
        assert_eq!(
            ProxyError::Forbidden("no".into()).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ProxyError::NotFound("no".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
