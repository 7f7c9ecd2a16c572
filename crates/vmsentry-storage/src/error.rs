/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use vmsentry_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert_rule",
///     id: "rule-99".to_string(),
/// };
/// assert!(err.to_string().contains("alert_rule"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// JSON serialization or deserialization failure (notification config,
    /// snapshots, notification outcomes).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored enum column holds a value the domain type does not know.
    #[error("Storage: invalid value in column '{column}': {reason}")]
    InvalidColumn { column: &'static str, reason: String },

    /// A write was rejected because the record breaks a domain invariant.
    #[error("Storage: invalid {entity}: {reason}")]
    Invalid { entity: &'static str, reason: String },

    /// Filesystem error while preparing the database location.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
