use bluebutton_core::{
    CrosswalkEntry, InteractionType, Principal, ResourcePolicy, RouterEntry, UserProfile,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Resource policies, one per resource type
    #[serde(default)]
    pub resources: Vec<ResourcePolicy>,
    /// Per-resource-type upstream base overrides
    #[serde(default)]
    pub routers: Vec<RouterEntry>,
    /// Identity crosswalk entries
    #[serde(default)]
    pub crosswalk: Vec<CrosswalkEntry>,
    /// Static bearer tokens (development and tests)
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.upstream.timeout_secs == 0 {
            return Err("upstream.timeout_secs must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        if self.output.pretty_indent > 16 {
            return Err("output.pretty_indent must be <= 16".into());
        }
        if let Some(code) = self
            .upstream
            .error_codes
            .iter()
            .find(|c| !(100..=599).contains(*c))
        {
            return Err(format!("upstream.error_codes contains invalid status {code}"));
        }
        let mut seen = HashSet::new();
        for policy in &self.resources {
            if policy.resource_name.is_empty() {
                return Err("resources.resource_name must not be empty".into());
            }
            if !seen.insert(policy.resource_name.as_str()) {
                return Err(format!(
                    "duplicate resource policy for '{}'",
                    policy.resource_name
                ));
            }
            for interaction in &policy.supported_interactions {
                interaction
                    .parse::<InteractionType>()
                    .map_err(|e| format!("resources.{}: {e}", policy.resource_name))?;
            }
        }
        for token in &self.tokens {
            if token.token.is_empty() || token.subject.is_empty() {
                return Err("tokens entries require both token and subject".into());
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// Upstream FHIR server settings.
///
/// The global base is `server + path + release`, e.g.
/// `http://fhir.internal:8080/` + `fhir-p/` + `baseDstu2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub release: String,
    /// Upstream URLs always replaced in response bodies
    #[serde(default)]
    pub rewrite_from: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upstream statuses reported as errors instead of forwarded
    #[serde(default = "default_error_codes")]
    pub error_codes: Vec<u16>,
    /// Redirect target for unreachable upstream; unset returns 502
    #[serde(default)]
    pub fail_redirect: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_error_codes() -> Vec<u16> {
    vec![301, 302, 400, 401, 403, 404, 410, 500, 501, 502, 503, 504]
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            path: String::new(),
            release: String::new(),
            rewrite_from: Vec::new(),
            timeout_secs: default_timeout_secs(),
            error_codes: default_error_codes(),
            fail_redirect: None,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_configured(&self) -> bool {
        !(self.server.is_empty() && self.path.is_empty() && self.release.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSON indent for rendered responses; 0 renders compact
    #[serde(default = "default_pretty_indent")]
    pub pretty_indent: usize,
    /// Adds request diagnostics to the output envelope
    #[serde(default)]
    pub verbose: bool,
}

fn default_pretty_indent() -> usize {
    4
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            pretty_indent: default_pretty_indent(),
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Bearer token issued to a principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub token: String,
    pub subject: String,
    #[serde(default)]
    pub profile: UserProfile,
}

impl TokenConfig {
    pub fn principal(&self) -> Principal {
        Principal::new(self.subject.clone()).with_profile(self.profile.clone())
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Loads `path` (or `bluebutton.toml` when absent), then applies
    /// `BLUEBUTTON__SECTION__KEY` environment overrides and validates.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("bluebutton.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // e.g. BLUEBUTTON__UPSTREAM__TIMEOUT_SECS=10
        builder = builder.add_source(
            Environment::with_prefix("BLUEBUTTON")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
