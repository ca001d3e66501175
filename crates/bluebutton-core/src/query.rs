//! Outbound query string construction.
//!
//! The inbound query goes through a fixed sequence before it is sent
//! upstream:
//!
//! ```text
//! strip OAuth params -> block (policy) -> add (policy) -> concat/encode -> _format
//! ```
//!
//! Blocking runs before adding so injected parameters can never be removed by
//! the block list, and `_format` handling runs last so it is never blocked or
//! duplicated. None of these steps fail: missing or malformed input degrades
//! to an empty result.

use indexmap::IndexMap;
use url::form_urlencoded;

use crate::model::ResourcePolicy;

/// Ordered parameter mapping. Re-inserting a key keeps its original position
/// and replaces the value.
pub type ParamMap = IndexMap<String, String>;

/// Parameters that belong to the OAuth handshake and never reach the upstream server.
pub const OAUTH_PARAMS: [&str; 4] = ["access_token", "state", "response_type", "client_id"];

/// Placeholder in `search_add` templates replaced by the caller's upstream id.
pub const PATIENT_PLACEHOLDER: &str = "%PATIENT%";

const FORMAT_PARAM: &str = "_format";

/// A parameter source: either a key/value mapping or a list of `k=v` / `k` strings.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParams {
    Mapping(ParamMap),
    PairList(Vec<String>),
}

impl QueryParams {
    /// Normalizes either shape into an ordered mapping.
    ///
    /// List items are split on the first `=`; items without one map to an
    /// empty value. Later duplicates override earlier ones.
    pub fn into_map(self) -> ParamMap {
        match self {
            Self::Mapping(map) => map,
            Self::PairList(items) => items
                .into_iter()
                .map(|item| match item.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (item, String::new()),
                })
                .collect(),
        }
    }
}

impl From<ParamMap> for QueryParams {
    fn from(map: ParamMap) -> Self {
        Self::Mapping(map)
    }
}

impl From<Vec<String>> for QueryParams {
    fn from(items: Vec<String>) -> Self {
        Self::PairList(items)
    }
}

/// Parses a raw (possibly `?`-prefixed) query string into an ordered mapping.
///
/// Repeated keys keep their first position and their last value.
pub fn parse_query(raw: &str) -> ParamMap {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Removes the reserved OAuth parameters, regardless of any policy.
pub fn strip_oauth_params(raw: &ParamMap) -> ParamMap {
    raw.iter()
        .filter(|(k, _)| !OAUTH_PARAMS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Removes every parameter named in the policy's block list.
///
/// Without a policy, or with `override_search` disabled, the input is
/// returned unchanged. Key matching is exact and case-sensitive.
pub fn block_params(raw: &ParamMap, policy: Option<&ResourcePolicy>) -> ParamMap {
    match policy {
        Some(policy) if policy.override_search => raw
            .iter()
            .filter(|(k, _)| !policy.search_block.iter().any(|b| b == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => raw.clone(),
    }
}

/// Expands the policy's `search_add` templates.
///
/// A template mentioning the policy's own resource name (lower-cased) is
/// skipped, which keeps `patient=%PATIENT%` out of searches on `Patient`
/// itself.
pub fn add_params(policy: Option<&ResourcePolicy>, patient_key: Option<&str>) -> Vec<String> {
    let Some(policy) = policy.filter(|p| p.override_search) else {
        return Vec::new();
    };

    let own_name = policy.resource_name.to_lowercase();
    let key = patient_key.unwrap_or_default();

    policy
        .search_add
        .iter()
        .filter(|template| own_name.is_empty() || !template.contains(own_name.as_str()))
        .map(|template| {
            let mut item = template.replace(PATIENT_PLACEHOLDER, key);
            if item.contains(PATIENT_PLACEHOLDER) {
                item = item.replace(PATIENT_PLACEHOLDER, "");
            }
            item
        })
        .collect()
}

/// Merges two parameter sources into one `?`-prefixed, URL-encoded string.
///
/// `back` overrides `front` on key collisions. A leading pair with an empty
/// key is dropped so the result never starts with `?=`.
pub fn concat_params(front: impl Into<QueryParams>, back: impl Into<QueryParams>) -> String {
    let mut joined = front.into().into_map();
    for (k, v) in back.into().into_map() {
        joined.insert(k, v);
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in &joined {
        serializer.append_pair(k, v);
    }
    let encoded = serializer.finish();

    let encoded = if encoded.starts_with('=') {
        encoded
            .split_once('&')
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_default()
    } else {
        encoded
    };

    format!("?{encoded}")
}

/// Appends `_format=json` when the query has no `_format` key.
///
/// An existing `_format` is left alone whatever its value; only absence
/// triggers injection, so the function is idempotent.
pub fn add_format_if_missing(query: &str) -> String {
    if has_format_param(query) {
        return query.to_string();
    }

    let mut out = query.to_string();
    if out.is_empty() {
        out.push('?');
    } else if !out.ends_with('?') && !out.ends_with('&') {
        out.push('&');
    }
    out.push_str(FORMAT_PARAM);
    out.push_str("=json");
    out
}

fn has_format_param(query: &str) -> bool {
    let query = query.strip_prefix('?').unwrap_or(query);
    form_urlencoded::parse(query.as_bytes()).any(|(k, _)| k.eq_ignore_ascii_case(FORMAT_PARAM))
}

/// Builds the exact query string sent upstream.
pub fn build_outbound_query(
    raw: &ParamMap,
    policy: Option<&ResourcePolicy>,
    patient_key: Option<&str>,
) -> String {
    let stripped = strip_oauth_params(raw);
    let kept = block_params(&stripped, policy);
    let added = add_params(policy, patient_key);
    let joined = concat_params(kept, added);
    add_format_if_missing(&joined)
}

/// Adds a leading `?` to a non-empty parameter string that lacks one.
pub fn prepend_q(params: &str) -> String {
    if params.is_empty() || params.starts_with('?') {
        params.to_string()
    } else {
        format!("?{params}")
    }
}
