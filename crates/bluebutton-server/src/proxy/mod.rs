//! FHIR pass-through: access control, query rewriting, upstream dispatch and
//! response masking.

pub mod dispatcher;
pub mod error;
pub mod handler;

pub use dispatcher::{DispatchError, Dispatcher, UpstreamResponse, build_resource_url};
pub use error::ProxyError;
