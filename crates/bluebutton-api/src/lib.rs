use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const FHIR_JSON: &str = "application/fhir+json";

/// Minimal FHIR OperationOutcome representation for API error responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationOutcome {
    #[serde(rename = "resourceType")]
    pub resource_type: &'static str, // always "OperationOutcome"
    pub issue: Vec<OperationOutcomeIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationOutcomeIssue {
    /// FHIR issue severity: fatal | error | warning | information
    pub severity: &'static str,
    /// FHIR issue type code (subset used): login | forbidden | not-found |
    /// invalid | transient | exception
    pub code: &'static str,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl OperationOutcome {
    pub fn single(
        severity: &'static str,
        code: &'static str,
        diagnostics: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: "OperationOutcome",
            issue: vec![OperationOutcomeIssue {
                severity,
                code,
                diagnostics: Some(diagnostics.into()),
            }],
        }
    }
}

/// High-level API errors to be mapped to HTTP responses and FHIR OperationOutcome
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad gateway: {0}")]
    BadGateway(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    /// Upstream answered with an error status; status and body are mirrored.
    #[error("Upstream returned {status}")]
    Upstream { status: StatusCode, body: String },
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::BadGateway(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
    pub fn upstream(status: StatusCode, body: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            body: body.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream { status, .. } => *status,
        }
    }

    pub fn to_operation_outcome(&self) -> OperationOutcome {
        match self {
            ApiError::Unauthorized(msg) => OperationOutcome::single("error", "login", msg),
            ApiError::Forbidden(msg) => OperationOutcome::single("error", "forbidden", msg),
            ApiError::NotFound(msg) => OperationOutcome::single("error", "not-found", msg),
            ApiError::BadGateway(msg) => OperationOutcome::single("error", "transient", msg),
            ApiError::Internal(msg) => OperationOutcome::single("fatal", "exception", msg),
            ApiError::Upstream { status, body } => {
                let code = match status.as_u16() {
                    401 => "login",
                    403 => "forbidden",
                    404 | 410 => "not-found",
                    400..=499 => "invalid",
                    _ => "exception",
                };
                let diagnostics = if body.trim().is_empty() {
                    format!("Upstream FHIR server returned {status}")
                } else {
                    body.clone()
                };
                OperationOutcome::single("error", code, diagnostics)
            }
        }
    }

    fn body_bytes(&self) -> Vec<u8> {
        // Upstream JSON bodies (usually an OperationOutcome already) go back as sent.
        if let ApiError::Upstream { body, .. } = self
            && serde_json::from_str::<Value>(body).is_ok()
        {
            return body.clone().into_bytes();
        }

        match serde_json::to_vec(&self.to_operation_outcome()) {
            Ok(b) => b,
            Err(_) => {
                // Fallback minimal body if serialization fails
                let fallback =
                    OperationOutcome::single("fatal", "exception", "Serialization failure");
                serde_json::to_vec(&fallback).unwrap_or_else(|_| b"{}".to_vec())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.body_bytes();

        let mut builder = axum::http::Response::builder().status(status);
        builder = builder.header(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
        if status == StatusCode::UNAUTHORIZED {
            builder = builder.header(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        builder
            .body(axum::body::Body::from(body))
            .unwrap_or_else(|_| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON))],
                    "{}",
                )
                    .into_response()
            })
    }
}

// -------------------------
// Pre-rendered JSON responses
// -------------------------

/// JSON text rendered by the caller (e.g. pretty-printed with a configured
/// indent), sent without re-serialization.
#[derive(Debug, Clone)]
pub struct RenderedJson {
    pub body: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl RenderedJson {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }
}

impl IntoResponse for RenderedJson {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.headers_mut().extend(self.headers);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn into_response_sets_status_and_content_type() {
        let resp = ApiError::not_found("Foo is not a supported resource type").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, &HeaderValue::from_static(FHIR_JSON));
    }

    #[test]
    fn unauthorized_carries_bearer_challenge() {
        let resp = ApiError::unauthorized("Authentication required").into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            &HeaderValue::from_static("Bearer")
        );
    }

    #[test]
    fn api_error_variants_map_to_status_and_codes() {
        let cases: Vec<(ApiError, StatusCode, &str)> = vec![
            (ApiError::unauthorized("x"), StatusCode::UNAUTHORIZED, "login"),
            (ApiError::forbidden("x"), StatusCode::FORBIDDEN, "forbidden"),
            (ApiError::not_found("x"), StatusCode::NOT_FOUND, "not-found"),
            (ApiError::bad_gateway("x"), StatusCode::BAD_GATEWAY, "transient"),
            (
                ApiError::internal("x"),
                StatusCode::INTERNAL_SERVER_ERROR,
                "exception",
            ),
            (
                ApiError::upstream(StatusCode::GONE, "gone"),
                StatusCode::GONE,
                "not-found",
            ),
            (
                ApiError::upstream(StatusCode::BAD_GATEWAY, ""),
                StatusCode::BAD_GATEWAY,
                "exception",
            ),
        ];
        for (err, status, code) in cases.into_iter() {
            assert_eq!(err.status_code(), status);
            let oo = err.to_operation_outcome();
            assert_eq!(oo.issue[0].code, code);
        }
    }

    #[tokio::test]
    async fn upstream_json_body_is_mirrored() {
        let upstream_body = r#"{"resourceType":"OperationOutcome",
            "issue":[{"severity":"error","code":"processing"}]}"#;
        let resp = ApiError::upstream(StatusCode::NOT_FOUND, upstream_body).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["issue"][0]["code"], "processing");
    }

    #[tokio::test]
    async fn upstream_text_body_is_wrapped() {
        let resp = ApiError::upstream(StatusCode::INTERNAL_SERVER_ERROR, "<html>boom</html>")
            .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["resourceType"], "OperationOutcome");
        assert_eq!(body["issue"][0]["diagnostics"], "<html>boom</html>");
    }

    #[test]
    fn rendered_json_keeps_text_verbatim() {
        let resp = RenderedJson::ok("{\n    \"a\": 1\n}").into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            &HeaderValue::from_static("application/json")
        );
    }
}
