//! Error types for credential storage and token refresh

/// Errors from credential file operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for credential storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single refresh-token exchange.
///
/// Every variant counts the same toward the retry bound; the split exists for
/// logs and metrics. `Clone` because one refresh result is handed to every
/// caller that waited on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("token endpoint rejected the refresh request (400)")]
    InvalidRequest,

    #[error("refresh token rejected (401)")]
    Unauthorized,

    #[error("token endpoint server error (500)")]
    ServerError,

    #[error("token refresh failed: {0}")]
    Generic(String),
}

impl RefreshError {
    /// Short label for metrics and structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            RefreshError::InvalidRequest => "invalid_request",
            RefreshError::Unauthorized => "unauthorized",
            RefreshError::ServerError => "server_error",
            RefreshError::Generic(_) => "generic",
        }
    }
}
