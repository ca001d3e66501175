//! Resource interaction authorization.

use crate::model::ResourcePolicy;

/// Outcome of checking an interaction against the resource policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Resource type is configured but the interaction is not permitted (403).
    Forbidden(String),
    /// Resource type has no policy at all (404).
    NotFound(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Checks `interaction` on `resource_type` against an already looked-up policy.
///
/// `policy` is `None` when the resource type is unconfigured, which is
/// distinct from a policy with an empty interaction list.
pub fn authorize(
    policy: Option<&ResourcePolicy>,
    resource_type: &str,
    interaction: &str,
) -> Decision {
    let Some(policy) = policy else {
        return Decision::NotFound(format!(
            "{resource_type} is not a supported resource type on this server."
        ));
    };

    if !policy.supports(interaction) {
        return Decision::Forbidden(format!(
            "The interaction: {interaction} is not permitted on {resource_type} resources on this server."
        ));
    }

    Decision::Allowed
}
