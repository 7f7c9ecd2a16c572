/// Errors that can occur within the notification subsystem.
///
/// Channel errors never escape the dispatcher: they are turned into failed
/// channel results.
///
/// # Examples
///
/// ```rust
/// use vmsentry_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("webhook url is empty".to_string());
/// assert!(err.to_string().contains("webhook url"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The rule lists the method but its section is absent or disabled.
    #[error("Notify: channel '{0}' is not enabled for this rule")]
    ChannelDisabled(String),

    /// An HTTP request to an external notification endpoint failed.
    #[error("Notify: HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// SMTP transport error when sending email.
    #[error("Notify: SMTP error: {0}")]
    SmtpError(String),

    /// JSON serialization failed.
    #[error("Notify: JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The external API returned a non-success response.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    ApiError {
        service: String,
        status: u16,
        body: String,
    },

    /// Computing the webhook signature failed.
    #[error("Notify: signing error: {0}")]
    Signing(String),

    /// The in-app push transport rejected the event.
    #[error("Notify: in-app publish failed: {0}")]
    Publish(String),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
