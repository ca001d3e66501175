//! Lookup traits for the proxy's external collaborators.
//!
//! The proxy only ever reads through these traits. Writes (registering a
//! crosswalk entry, editing a policy) belong to whatever system owns the
//! data; the in-memory implementations below expose `insert` for seeding from
//! configuration and for tests.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::model::{CrosswalkEntry, Principal, ResourcePolicy, RouterEntry};

/// Resource policy lookup, keyed by exact resource type name.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Returns `None` for an unconfigured resource type.
    async fn get(&self, resource_type: &str) -> Result<Option<ResourcePolicy>, StoreError>;
}

/// Identity crosswalk lookup, keyed by principal subject.
#[async_trait]
pub trait CrosswalkStore: Send + Sync {
    async fn find_by_subject(&self, subject: &str) -> Result<Option<CrosswalkEntry>, StoreError>;
}

/// Per-resource-type upstream base overrides.
#[async_trait]
pub trait RouterStore: Send + Sync {
    async fn find(&self, resource_type: &str) -> Result<Option<RouterEntry>, StoreError>;
}

/// Resolves a bearer token to the principal it was issued to.
///
/// `Ok(None)` means the token is unknown; errors are reserved for provider
/// failures.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Option<Principal>, StoreError>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: DashMap<String, ResourcePolicy>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a list of policies, rejecting duplicate resource names.
    pub fn from_policies(
        policies: impl IntoIterator<Item = ResourcePolicy>,
    ) -> Result<Self, StoreError> {
        let store = Self::new();
        for policy in policies {
            if store.policies.contains_key(&policy.resource_name) {
                return Err(StoreError::duplicate(policy.resource_name));
            }
            store.insert(policy);
        }
        Ok(store)
    }

    pub fn insert(&self, policy: ResourcePolicy) -> Option<ResourcePolicy> {
        self.policies.insert(policy.resource_name.clone(), policy)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get(&self, resource_type: &str) -> Result<Option<ResourcePolicy>, StoreError> {
        Ok(self.policies.get(resource_type).map(|p| p.value().clone()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCrosswalkStore {
    entries: DashMap<String, CrosswalkEntry>,
}

impl InMemoryCrosswalkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CrosswalkEntry>) -> Self {
        let store = Self::new();
        for entry in entries {
            store.insert(entry);
        }
        store
    }

    pub fn insert(&self, entry: CrosswalkEntry) -> Option<CrosswalkEntry> {
        self.entries.insert(entry.subject.clone(), entry)
    }
}

#[async_trait]
impl CrosswalkStore for InMemoryCrosswalkStore {
    async fn find_by_subject(&self, subject: &str) -> Result<Option<CrosswalkEntry>, StoreError> {
        Ok(self.entries.get(subject).map(|e| e.value().clone()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRouterStore {
    routes: DashMap<String, RouterEntry>,
}

impl InMemoryRouterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = RouterEntry>) -> Self {
        let store = Self::new();
        for entry in entries {
            store.insert(entry);
        }
        store
    }

    pub fn insert(&self, entry: RouterEntry) -> Option<RouterEntry> {
        self.routes.insert(entry.resource_type.clone(), entry)
    }
}

#[async_trait]
impl RouterStore for InMemoryRouterStore {
    async fn find(&self, resource_type: &str) -> Result<Option<RouterEntry>, StoreError> {
        Ok(self.routes.get(resource_type).map(|r| r.value().clone()))
    }
}

/// Static token table, for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    tokens: DashMap<String, Principal>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, principal: Principal) -> Option<Principal> {
        self.tokens.insert(token.into(), principal)
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Option<Principal>, StoreError> {
        Ok(self.tokens.get(token).map(|p| p.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_policy_lookup_is_exact_match() {
        let store = InMemoryPolicyStore::new();
        store.insert(ResourcePolicy::new("Patient"));

        assert!(store.get("Patient").await.unwrap().is_some());
        assert!(store.get("patient").await.unwrap().is_none());
        assert!(store.get("Observation").await.unwrap().is_none());
    }

    #[test]
    fn test_from_policies_rejects_duplicates() {
        let err = InMemoryPolicyStore::from_policies(vec![
            ResourcePolicy::new("Patient"),
            ResourcePolicy::new("Patient"),
        ])
        .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(name) if name == "Patient"));
    }

    #[test]
    fn test_identity_provider_lookup() {
        let provider = InMemoryIdentityProvider::new();
        provider.insert("token-1", Principal::new("alice"));

        let found = tokio_test::block_on(provider.authenticate("token-1")).unwrap();
        assert_eq!(found.map(|p| p.subject), Some("alice".to_string()));
        assert!(tokio_test::block_on(provider.authenticate("nope")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_router_lookup() {
        let store = InMemoryRouterStore::from_entries(vec![RouterEntry {
            resource_type: "Coverage".into(),
            base_path: "http://coverage.example/fhir/".into(),
        }]);
        let entry = store.find("Coverage").await.unwrap().unwrap();
        assert_eq!(entry.base_path, "http://coverage.example/fhir/");
        assert!(store.find("Patient").await.unwrap().is_none());
    }
}
