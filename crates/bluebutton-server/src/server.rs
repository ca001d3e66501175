use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use bluebutton_core::{
    CrosswalkStore, IdentityProvider, InMemoryCrosswalkStore, InMemoryIdentityProvider,
    InMemoryPolicyStore, InMemoryRouterStore, PolicyStore, ResponseRewriter, RouterStore,
    StoreError,
};
use thiserror::Error;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::proxy::{Dispatcher, handler as proxy_handler};
use crate::{config::AppConfig, handlers, middleware as app_middleware};

/// Failures while assembling [`AppState`].
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to seed stores: {0}")]
    Store(#[from] StoreError),

    #[error("failed to build upstream HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Shared per-process state. Every field is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub policies: Arc<dyn PolicyStore>,
    pub crosswalk: Arc<dyn CrosswalkStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub dispatcher: Dispatcher,
    pub rewriter: Arc<ResponseRewriter>,
}

impl AppState {
    /// Builds state backed by in-memory stores seeded from `cfg`.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, StartupError> {
        let policies = InMemoryPolicyStore::from_policies(cfg.resources.iter().cloned())?;
        let crosswalk = InMemoryCrosswalkStore::from_entries(cfg.crosswalk.iter().cloned());
        let routers: Arc<dyn RouterStore> =
            Arc::new(InMemoryRouterStore::from_entries(cfg.routers.iter().cloned()));
        let identity = InMemoryIdentityProvider::new();
        for token in &cfg.tokens {
            identity.insert(token.token.clone(), token.principal());
        }

        tracing::info!(
            policies = policies.len(),
            crosswalk_entries = cfg.crosswalk.len(),
            routers = cfg.routers.len(),
            tokens = cfg.tokens.len(),
            "Seeded in-memory stores"
        );

        Ok(Self {
            policies: Arc::new(policies),
            crosswalk: Arc::new(crosswalk),
            identity: Arc::new(identity),
            dispatcher: Dispatcher::new(cfg.upstream.clone(), routers)?,
            rewriter: Arc::new(ResponseRewriter::new(
                cfg.upstream.rewrite_from.clone(),
                cfg.output.pretty_indent,
                cfg.output.verbose,
            )),
        })
    }
}

pub struct BlueButtonServer {
    addr: SocketAddr,
    app: Router,
}

pub fn build_app(cfg: &AppConfig, state: AppState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::prometheus))
        .route("/metadata", get(handlers::metadata))
        .route("/connect/userinfo", get(handlers::userinfo))
        // Pass-through
        .route("/{resource_type}", get(proxy_handler::search))
        .route("/{resource_type}/{id}", get(proxy_handler::read))
        .route(
            "/{resource_type}/{id}/_history/{vid}",
            get(proxy_handler::vread),
        )
        // Outermost last: body limit, request id, trace, compression/cors, auth
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::authentication_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    state: Option<AppState>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            state: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Replaces the config-seeded stores, e.g. with database-backed ones.
    pub fn with_state(mut self, state: AppState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> Result<BlueButtonServer, StartupError> {
        let state = match self.state {
            Some(state) => state,
            None => AppState::from_config(&self.config)?,
        };
        let app = build_app(&self.config, state);

        Ok(BlueButtonServer {
            addr: self.addr,
            app,
        })
    }
}

impl BlueButtonServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
