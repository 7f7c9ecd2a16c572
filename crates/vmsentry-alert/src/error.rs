use vmsentry_common::types::{IncidentStatus, ScopeKind};

/// Errors surfaced by the alert engine.
///
/// Configuration errors (missing scope id, unknown entity) are reported to
/// the caller and logged by the scheduler; repository failures wrap the
/// backend error.
///
/// # Examples
///
/// ```rust
/// use vmsentry_alert::error::AlertError;
/// use vmsentry_common::types::ScopeKind;
///
/// let err = AlertError::MissingScopeId(ScopeKind::Group);
/// assert!(err.to_string().contains("group"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Alert: engine is already running")]
    AlreadyRunning,

    #[error("Alert: scope '{0}' requires a scope id")]
    MissingScopeId(ScopeKind),

    #[error("Alert: entity not found (id={0})")]
    EntityNotFound(String),

    #[error("Alert: incident not found (id={0})")]
    IncidentNotFound(String),

    #[error("Alert: incident {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: IncidentStatus,
        to: IncidentStatus,
    },

    #[error("Alert: evaluation interval must be at least one second")]
    InvalidInterval,

    #[error("Alert: repository error: {0:#}")]
    Repository(anyhow::Error),
}

/// Convenience `Result` alias for alert engine operations.
pub type Result<T> = std::result::Result<T, AlertError>;
