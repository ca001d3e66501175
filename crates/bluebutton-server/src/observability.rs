// Tracing setup for the proxy. The level comes from `[logging].level` and can
// be swapped after config load through the reload handle.
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static LOG_RELOAD_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// HTTP client and server internals that log every frame at debug.
const CONNECTION_TARGETS: &[&str] = &["hyper", "hyper_util", "h2", "reqwest", "rustls"];

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    // RUST_LOG wins over the configured level.
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| proxy_filter(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Swaps the active filter for `level`.
///
/// Ignored when `RUST_LOG` is set, so operators can always force a filter.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| {
            *f = proxy_filter(level);
        });
    }
}

/// Filter for `level`. At debug and trace the connection crates stay at
/// warn so upstream URLs and pipeline steps remain readable.
fn proxy_filter(level: &str) -> EnvFilter {
    let level = level.trim().to_ascii_lowercase();
    let mut directives = level.clone();
    if matches!(level.as_str(), "debug" | "trace") {
        for target in CONNECTION_TARGETS {
            directives.push_str(&format!(",{target}=warn"));
        }
    }
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"))
}
