//! Error types for credential storage and token refresh

/// Errors from the credential store and refresh transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid token response: {0}")]
    Decode(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
