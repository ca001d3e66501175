use thiserror::Error;

/// Errors raised by the external lookup collaborators (policy, crosswalk,
/// router and identity stores).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn duplicate(key: impl Into<String>) -> Self {
        Self::Duplicate(key.into())
    }
}

/// Errors raised while interpreting policy configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown interaction type: {0}")]
    UnknownInteraction(String),
}

impl CoreError {
    pub fn unknown_interaction(value: impl Into<String>) -> Self {
        Self::UnknownInteraction(value.into())
    }
}
