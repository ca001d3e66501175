use std::env;

use anyhow::Context;
use bluebutton_server::ServerBuilder;
use bluebutton_server::config::loader::load_config;

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From BLUEBUTTON_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (bluebutton.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (BLUEBUTTON_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Optional .env for local development
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    bluebutton_server::observability::init_tracing();

    if let Err(e) = run().await {
        eprintln!("{e:#}");
        std::process::exit(2);
    }
}

async fn run() -> anyhow::Result<()> {
    let (config_path, source) = resolve_config_path();

    let cfg = load_config(Some(&config_path))
        .map_err(anyhow::Error::msg)
        .context("Configuration error")?;

    tracing::info!(
        path = %config_path,
        source = %source,
        upstream = %cfg.upstream.server,
        "Configuration loaded"
    );

    bluebutton_server::observability::apply_logging_level(&cfg.logging.level);
    bluebutton_server::metrics::init_metrics();

    let server = ServerBuilder::new()
        .with_config(cfg)
        .build()
        .context("Server initialization failed")?;

    server.run().await.context("Server error")
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: BLUEBUTTON_CONFIG
/// 3. Default: bluebutton.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("BLUEBUTTON_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    ("bluebutton.toml".to_string(), ConfigSource::Default)
}
