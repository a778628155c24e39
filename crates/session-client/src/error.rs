//! Error types for authenticated requests

/// Errors surfaced by `AuthenticatedClient`.
///
/// `RefreshExpired` is the only kind that means the whole session is gone;
/// everything else concerns the one request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("refresh token expired: session expired, please log in again")]
    RefreshExpired,

    #[error("credential store error: {0}")]
    Credential(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether the session is dead and the user must log in again.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::RefreshExpired)
    }
}

impl From<session_auth::Error> for Error {
    fn from(err: session_auth::Error) -> Self {
        Error::Credential(err.to_string())
    }
}

/// Result alias for session client operations.
pub type Result<T> = std::result::Result<T, Error>;
