pub mod access;
pub mod crosswalk;
pub mod error;
pub mod model;
pub mod query;
pub mod rewrite;
pub mod store;

pub use access::{Decision, authorize};
pub use crosswalk::{masked_path_id, resolve_patient_key};
pub use error::{CoreError, StoreError};
pub use model::{
    CrosswalkEntry, InteractionType, OutputFormat, Principal, RequestContext, ResourcePolicy,
    RouterEntry, UserProfile,
};
pub use query::{QueryParams, build_outbound_query};
pub use rewrite::{
    Bundle, Diagnostics, OutputEnvelope, ResponseRewriter, RewriteError, derive_host_path,
};
pub use store::{
    CrosswalkStore, IdentityProvider, InMemoryCrosswalkStore, InMemoryIdentityProvider,
    InMemoryPolicyStore, InMemoryRouterStore, PolicyStore, RouterStore,
};
