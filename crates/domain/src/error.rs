//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`BridgeError`] at the port boundary.

use std::time::Duration;

/// Boxed source error carried by infrastructure variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error shared by every port and service.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    #[error("relay session is not initialized")]
    NotInitialized,

    #[error("relay session is not connected")]
    NotConnected,

    #[error("relay request timed out after {0:?}")]
    Timeout(Duration),

    #[error("relay transport error")]
    Transport(#[source] BoxError),

    #[error("hub error")]
    Hub(#[source] BoxError),

    #[error("storage error")]
    Storage(#[source] BoxError),

    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),
}

/// Invariant violations detected while building or parsing domain values.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("identifier must not be empty")]
    EmptyId,

    #[error("name must not be empty")]
    EmptyName,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unsupported {kind} `{value}`")]
    Unsupported { kind: &'static str, value: String },
}

/// A lookup that found nothing.
#[derive(Debug, thiserror::Error)]
#[error("{entity} `{id}` not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}
