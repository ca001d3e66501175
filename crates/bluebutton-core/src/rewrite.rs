//! Response body rewriting and the output envelope.
//!
//! Upstream responses contain absolute URLs pointing at the upstream server
//! (bundle links, `fullUrl`s, references). Before anything reaches the caller
//! those URLs are replaced with this proxy's own base. Replacement is plain
//! substring substitution applied one URL at a time, in order: a later URL
//! is matched against text already rewritten by earlier ones.

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::PrettyFormatter;
use thiserror::Error;

use crate::model::{InteractionType, OutputFormat, RequestContext};
use crate::query::{ParamMap, concat_params, strip_oauth_params};

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("Upstream returned a malformed JSON body: {0}")]
    MalformedBody(#[from] serde_json::Error),
}

/// Rewritten upstream body: parsed JSON, or XML kept as opaque text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Bundle {
    Json(Value),
    Xml(String),
}

/// Extra envelope fields emitted in verbose mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub request_method: String,
    pub interaction_type: InteractionType,
    pub parameters: String,
    pub format: OutputFormat,
    pub note: String,
}

/// Final response document returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputEnvelope {
    pub resource_type: String,
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<String>,
    #[serde(flatten)]
    pub diagnostics: Option<Diagnostics>,
    pub bundle: Bundle,
}

/// Response rewriting settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct ResponseRewriter {
    rewrite_from: Vec<String>,
    pretty_indent: usize,
    verbose: bool,
}

impl Default for ResponseRewriter {
    fn default() -> Self {
        Self::new(Vec::new(), 4, false)
    }
}

impl ResponseRewriter {
    /// `rewrite_from` lists upstream URLs always replaced in addition to the
    /// ones supplied per call.
    pub fn new(rewrite_from: Vec<String>, pretty_indent: usize, verbose: bool) -> Self {
        Self {
            rewrite_from,
            pretty_indent,
            verbose,
        }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Replaces each URL in `urls` (then each configured URL not already
    /// listed) with `host_path`, sequentially.
    ///
    /// Trailing slashes are stripped from both the URLs and `host_path`.
    pub fn mask_urls_in_text(&self, text: &str, host_path: &str, urls: &[String]) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut targets: Vec<&str> = urls.iter().map(String::as_str).collect();
        for url in &self.rewrite_from {
            if !targets.contains(&url.as_str()) {
                targets.push(url);
            }
        }

        let replacement = host_path.strip_suffix('/').unwrap_or(host_path);
        let mut out = text.to_string();
        for target in targets {
            let target = target.strip_suffix('/').unwrap_or(target);
            if target.is_empty() {
                continue;
            }
            out = out.replace(target, replacement);
        }
        out
    }

    /// Masks upstream URLs, then parses JSON bodies.
    ///
    /// XML is never parsed. A JSON body that fails to parse is an error for
    /// the whole request.
    pub fn post_process(
        &self,
        format: OutputFormat,
        host_path: &str,
        raw: &str,
        urls: &[String],
    ) -> Result<Bundle, RewriteError> {
        let masked = self.mask_urls_in_text(raw, host_path, urls);
        match format {
            OutputFormat::Xml => Ok(Bundle::Xml(masked)),
            OutputFormat::Json => Ok(Bundle::Json(serde_json::from_str(&masked)?)),
        }
    }

    pub fn build_output_envelope(
        &self,
        ctx: &RequestContext,
        request_method: &str,
        bundle: Bundle,
    ) -> OutputEnvelope {
        let diagnostics = self.verbose.then(|| Diagnostics {
            request_method: request_method.to_string(),
            interaction_type: ctx.interaction,
            parameters: encode_parameters(&ctx.raw_query),
            format: ctx.output_format,
            note: format!(
                "This is the {} Pass Thru ({}) ",
                ctx.resource_type,
                ctx.id.as_deref().unwrap_or_default()
            ),
        });

        OutputEnvelope {
            resource_type: ctx.resource_type.clone(),
            id: ctx.id.clone(),
            vid: ctx.version_id.clone(),
            diagnostics,
            bundle,
        }
    }

    /// Serializes with the configured indent; an indent of 0 renders compact JSON.
    pub fn render<T: Serialize>(&self, value: &T) -> Result<String, serde_json::Error> {
        if self.pretty_indent == 0 {
            return serde_json::to_string(value);
        }
        let indent = " ".repeat(self.pretty_indent);
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(indent.as_bytes());
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Caller-facing base that upstream URLs are replaced with.
///
/// Rebuilds `scheme://host/full/path` and, when `resource_type` is
/// non-empty, keeps only the part before its first occurrence.
pub fn derive_host_path(
    host: &str,
    is_secure: bool,
    full_path: &str,
    resource_type: &str,
) -> String {
    let scheme = if is_secure { "https://" } else { "http://" };
    let full_url = format!("{scheme}{host}{full_path}");
    if resource_type.is_empty() {
        return full_url;
    }
    match full_url.find(resource_type) {
        Some(idx) => full_url[..idx].to_string(),
        None => full_url,
    }
}

// OAuth values are dropped so tokens never echo back in diagnostics.
fn encode_parameters(raw: &ParamMap) -> String {
    let encoded = concat_params(strip_oauth_params(raw), Vec::<String>::new());
    encoded.trim_start_matches('?').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Principal;
    use serde_json::json;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mask_without_matches_is_unchanged() {
        let rewriter = ResponseRewriter::new(urls(&["http://internal:8080/"]), 4, false);
        let text = r#"{"resourceType":"Bundle","link":[{"url":"http://other/x"}]}"#;
        let masked = rewriter.mask_urls_in_text(
            text,
            "https://api.example/fhir/",
            &urls(&["http://fhir:8080/baseDstu2"]),
        );
        assert_eq!(masked, text);
    }

    #[test]
    fn test_mask_strips_trailing_slashes() {
        let rewriter = ResponseRewriter::default();
        let text = "see http://fhir:8080/baseDstu2/Patient/999";
        let masked = rewriter.mask_urls_in_text(
            text,
            "https://api.example/fhir/",
            &urls(&["http://fhir:8080/baseDstu2/"]),
        );
        assert_eq!(masked, "see https://api.example/fhir/Patient/999");
    }

    #[test]
    fn test_mask_appends_configured_urls_once() {
        let rewriter =
            ResponseRewriter::new(urls(&["http://a.internal", "http://b.internal"]), 4, false);
        let text = "http://a.internal/x http://b.internal/y";
        assert_eq!(
            rewriter.mask_urls_in_text(text, "https://proxy", &urls(&["http://a.internal"])),
            "https://proxy/x https://proxy/y"
        );
    }

    #[test]
    fn test_mask_is_sequential() {
        // The first replacement produces text the second rule matches.
        let rewriter = ResponseRewriter::default();
        let text = "http://old/Patient";
        let out = rewriter.mask_urls_in_text(
            text,
            "http://new",
            &urls(&["http://old", "http://new/Patient"]),
        );
        assert_eq!(out, "http://new");
    }

    #[test]
    fn test_derive_host_path() {
        assert_eq!(
            derive_host_path("localhost:8000", false, "/fhir/Patient/42?_format=json", "Patient"),
            "http://localhost:8000/fhir/"
        );
        assert_eq!(
            derive_host_path("api.example", true, "/v1/fhir/metadata", ""),
            "https://api.example/v1/fhir/metadata"
        );
        assert_eq!(
            derive_host_path("api.example", true, "/v1/fhir/Coverage", "Patient"),
            "https://api.example/v1/fhir/Coverage"
        );
    }

    #[test]
    fn test_post_process_json_preserves_key_order() {
        let rewriter = ResponseRewriter::default();
        let raw = r#"{"zeta":1,"alpha":{"url":"http://fhir:8080/baseDstu2/Patient/1"},"mid":true}"#;
        let bundle = rewriter
            .post_process(
                OutputFormat::Json,
                "http://proxy/fhir/",
                raw,
                &urls(&["http://fhir:8080/baseDstu2/"]),
            )
            .unwrap();
        let Bundle::Json(value) = bundle else {
            panic!("expected JSON bundle");
        };
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(value["alpha"]["url"], "http://proxy/fhir/Patient/1");
    }

    #[test]
    fn test_post_process_xml_is_not_parsed() {
        let rewriter = ResponseRewriter::default();
        let raw = r#"<Patient><link value="http://fhir:8080/base/Patient/1"/><unclosed>"#;
        let bundle = rewriter
            .post_process(OutputFormat::Xml, "http://proxy", raw, &urls(&["http://fhir:8080/base"]))
            .unwrap();
        assert_eq!(
            bundle,
            Bundle::Xml(r#"<Patient><link value="http://proxy/Patient/1"/><unclosed>"#.into())
        );
    }

    #[test]
    fn test_post_process_malformed_json_fails() {
        let rewriter = ResponseRewriter::default();
        let err = rewriter
            .post_process(OutputFormat::Json, "http://proxy", "<html>oops</html>", &[])
            .unwrap_err();
        assert!(matches!(err, RewriteError::MalformedBody(_)));
    }

    fn context(verbose_query: &[(&str, &str)]) -> RequestContext {
        RequestContext::new(
            "Patient",
            Some("42".into()),
            None,
            verbose_query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Principal::new("alice"),
        )
    }

    #[test]
    fn test_envelope_without_diagnostics() {
        let rewriter = ResponseRewriter::default();
        let envelope = rewriter.build_output_envelope(
            &context(&[]),
            "GET",
            Bundle::Json(json!({"resourceType": "Patient"})),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "resource_type": "Patient",
                "id": "42",
                "bundle": {"resourceType": "Patient"}
            })
        );
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["resource_type", "id", "bundle"]);
    }

    #[test]
    fn test_envelope_with_diagnostics() {
        let rewriter = ResponseRewriter::new(Vec::new(), 2, true);
        let envelope = rewriter.build_output_envelope(
            &context(&[("access_token", "secret"), ("_format", "json")]),
            "GET",
            Bundle::Json(json!({})),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["request_method"], "GET");
        assert_eq!(value["interaction_type"], "read");
        assert_eq!(value["parameters"], "_format=json");
        assert_eq!(value["format"], "json");
        assert_eq!(value["note"], "This is the Patient Pass Thru (42) ");
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.first().map(String::as_str), Some("resource_type"));
        assert_eq!(keys.last().map(String::as_str), Some("bundle"));
    }

    #[test]
    fn test_render_uses_configured_indent() {
        let value = json!({"a": 1});
        assert_eq!(
            ResponseRewriter::new(Vec::new(), 2, false).render(&value).unwrap(),
            "{\n  \"a\": 1\n}"
        );
        assert_eq!(
            ResponseRewriter::new(Vec::new(), 0, false).render(&value).unwrap(),
            "{\"a\":1}"
        );
    }
}
