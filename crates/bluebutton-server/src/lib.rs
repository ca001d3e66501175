pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod proxy;
pub mod server;

pub use observability::init_tracing;
pub use server::{AppState, BlueButtonServer, ServerBuilder, StartupError, build_app};
