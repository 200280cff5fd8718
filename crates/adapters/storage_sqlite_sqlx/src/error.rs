//! Storage-specific error type wrapping sqlx errors.

use hubrelay_domain::error::BridgeError;

/// Errors originating from the `SQLite` storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A query or connection failed.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// A stored value is not valid JSON, or a value could not be encoded.
    #[error("invalid JSON for setting `{key}`")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Failed to run migrations.
    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<StorageError> for BridgeError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_wrap_into_storage_variant() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: BridgeError = StorageError::Json {
            key: "selectedThings".to_string(),
            source,
        }
        .into();
        assert!(matches!(err, BridgeError::Storage(_)));
    }
}
