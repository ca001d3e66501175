//! Identity crosswalk lookups and path id masking.

use crate::error::StoreError;
use crate::model::{CrosswalkEntry, Principal, ResourcePolicy};
use crate::store::CrosswalkStore;

/// Returns the upstream id registered for `principal`, if any.
pub async fn resolve_patient_key(
    store: &dyn CrosswalkStore,
    principal: &Principal,
) -> Result<Option<String>, StoreError> {
    Ok(store
        .find_by_subject(&principal.subject)
        .await?
        .map(|entry| entry.upstream_id))
}

/// Chooses the id used in the upstream path.
///
/// The crosswalk id replaces `original_id` only when the policy asks for URL
/// id masking and the principal's identity is sharded on `resource_type`.
/// With `slash` set, a trailing `/` is appended for path construction.
pub fn masked_path_id(
    resource_type: &str,
    crosswalk: Option<&CrosswalkEntry>,
    policy: Option<&ResourcePolicy>,
    original_id: &str,
    slash: bool,
) -> String {
    let mut id = match (policy, crosswalk) {
        (Some(policy), Some(entry)) if policy.override_url_id && entry.shards(resource_type) => {
            tracing::debug!(
                resource_type,
                original_id,
                "Replacing path id with crosswalk id"
            );
            entry.upstream_id.clone()
        }
        _ => original_id.to_string(),
    };

    if slash {
        id.push('/');
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCrosswalkStore;

    fn masking_policy(name: &str, override_url_id: bool) -> ResourcePolicy {
        let mut p = ResourcePolicy::new(name);
        p.override_url_id = override_url_id;
        p
    }

    #[test]
    fn test_masked_path_id_substitutes_for_sharded_type() {
        let entry = CrosswalkEntry::new("alice", "999", "Patient");
        let policy = masking_policy("Patient", true);
        assert_eq!(
            masked_path_id("Patient", Some(&entry), Some(&policy), "42", true),
            "999/"
        );
        assert_eq!(
            masked_path_id("patient", Some(&entry), Some(&policy), "42", false),
            "999"
        );
    }

    #[test]
    fn test_masked_path_id_keeps_original_otherwise() {
        let entry = CrosswalkEntry::new("alice", "999", "Patient");
        let masking = masking_policy("Observation", true);
        let plain = masking_policy("Patient", false);

        // Different shard.
        assert_eq!(
            masked_path_id("Observation", Some(&entry), Some(&masking), "42", true),
            "42/"
        );
        // Policy does not mask.
        assert_eq!(
            masked_path_id("Patient", Some(&entry), Some(&plain), "42", true),
            "42/"
        );
        // No crosswalk entry or no policy.
        assert_eq!(
            masked_path_id("Patient", None, Some(&masking_policy("Patient", true)), "42", true),
            "42/"
        );
        assert_eq!(masked_path_id("Patient", Some(&entry), None, "42", false), "42");
    }

    #[tokio::test]
    async fn test_resolve_patient_key() {
        let store = InMemoryCrosswalkStore::new();
        store.insert(CrosswalkEntry::new("alice", "999", "Patient"));

        let key = resolve_patient_key(&store, &Principal::new("alice")).await.unwrap();
        assert_eq!(key.as_deref(), Some("999"));

        let missing = resolve_patient_key(&store, &Principal::new("bob")).await.unwrap();
        assert!(missing.is_none());
    }
}
