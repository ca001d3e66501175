//! Data model shared by the proxy pipeline.
//!
//! Everything here is either configuration-shaped (policies, router and
//! crosswalk entries, read-only to the proxy) or request-scoped
//! ([`RequestContext`], rebuilt for every inbound call).

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::CoreError;

/// Profile attributes of an authenticated caller, as reported by the
/// identity provider. Only the userinfo endpoint reads these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub joined_at: Option<OffsetDateTime>,
}

/// Authenticated caller identity.
///
/// `subject` is the stable key used for crosswalk lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    #[serde(default)]
    pub profile: UserProfile,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            profile: UserProfile::default(),
        }
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = profile;
        self
    }
}

/// Per-resource-type access and search policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePolicy {
    /// Resource type name the policy applies to (e.g. "Patient").
    pub resource_name: String,

    /// Interactions allowed on this resource type ("read", "vread", "search").
    #[serde(default)]
    pub supported_interactions: Vec<String>,

    /// Whether `search_block` / `search_add` are applied to outbound queries.
    #[serde(default)]
    pub override_search: bool,

    /// Parameter names stripped from the inbound query.
    #[serde(default)]
    pub search_block: Vec<String>,

    /// `key=value` templates appended to the outbound query. May contain `%PATIENT%`.
    #[serde(default)]
    pub search_add: Vec<String>,

    /// Whether path identifiers are replaced with the crosswalk id.
    #[serde(default)]
    pub override_url_id: bool,
}

impl ResourcePolicy {
    pub fn new(resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            supported_interactions: Vec::new(),
            override_search: false,
            search_block: Vec::new(),
            search_add: Vec::new(),
            override_url_id: false,
        }
    }

    /// Case-insensitive membership test against `supported_interactions`.
    pub fn supports(&self, interaction: &str) -> bool {
        let wanted = interaction.to_lowercase();
        self.supported_interactions
            .iter()
            .any(|i| i.to_lowercase() == wanted)
    }
}

/// Maps a caller to the upstream resource that represents them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrosswalkEntry {
    /// Principal subject this entry belongs to.
    pub subject: String,

    /// Resource id on the upstream server (e.g. the Patient id).
    pub upstream_id: String,

    /// Resource type the upstream id belongs to.
    #[serde(default = "default_shard_by")]
    pub shard_by: String,

    /// Upstream base holding this principal's records, when it differs from
    /// the router/global base.
    #[serde(default)]
    pub upstream_base: Option<String>,
}

fn default_shard_by() -> String {
    "Patient".into()
}

impl CrosswalkEntry {
    pub fn new(
        subject: impl Into<String>,
        upstream_id: impl Into<String>,
        shard_by: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            upstream_id: upstream_id.into(),
            shard_by: shard_by.into(),
            upstream_base: None,
        }
    }

    pub fn shards(&self, resource_type: &str) -> bool {
        self.shard_by.eq_ignore_ascii_case(resource_type)
    }
}

/// Upstream base override for a single resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterEntry {
    pub resource_type: String,
    pub base_path: String,
}

/// FHIR interaction requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    Read,
    Vread,
    Search,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Vread => "vread",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "vread" => Ok(Self::Vread),
            "search" => Ok(Self::Search),
            _ => Err(CoreError::unknown_interaction(s)),
        }
    }
}

/// Representation requested from the upstream server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Xml,
}

impl OutputFormat {
    /// Interprets a `_format` parameter value.
    ///
    /// Only XML spellings select [`OutputFormat::Xml`]; anything else,
    /// including unrecognized values, is processed as JSON.
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "xml" || v.ends_with("/xml") || v.ends_with("+xml") => Self::Xml,
            _ => Self::Json,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one inbound call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub resource_type: String,
    pub id: Option<String>,
    pub version_id: Option<String>,
    pub interaction: InteractionType,
    pub raw_query: IndexMap<String, String>,
    pub principal: Principal,
    pub output_format: OutputFormat,
}

impl RequestContext {
    /// Builds a context, deriving the interaction from which path parts are
    /// present and the output format from the `_format` parameter.
    pub fn new(
        resource_type: impl Into<String>,
        id: Option<String>,
        version_id: Option<String>,
        raw_query: IndexMap<String, String>,
        principal: Principal,
    ) -> Self {
        let interaction = match (&id, &version_id) {
            (Some(_), Some(_)) => InteractionType::Vread,
            (Some(_), None) => InteractionType::Read,
            _ => InteractionType::Search,
        };
        let format_param = raw_query
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("_format"))
            .map(|(_, v)| v.as_str());
        let output_format = OutputFormat::from_param(format_param);

        Self {
            resource_type: resource_type.into(),
            id,
            version_id,
            interaction,
            raw_query,
            principal,
            output_format,
        }
    }
}
