//! Client-side session lifecycle
//!
//! Keeps an HTTP client authenticated under concurrent load:
//! 1. `AuthenticatedClient::execute()` attaches the stored access token
//! 2. On 401, it asks `RefreshCoordinator::ensure_fresh_token()` for a refresh
//! 3. The coordinator runs at most one refresh at a time; every caller that
//!    arrives while it runs waits for, and receives, the same outcome
//! 4. On success the request is resent once with the new token
//! 5. On failure `SessionInvalidator` clears the stored pair and broadcasts
//!    `AuthFailureSignal`, and the request fails with `Error::RefreshExpired`

pub mod coordinator;
pub mod error;
pub mod invalidation;
pub mod metrics;
pub mod pipeline;

#[cfg(test)]
mod test_support;

pub use coordinator::{InvalidationPolicy, RefreshCoordinator};
pub use error::{Error, Result};
pub use invalidation::{AuthFailureSignal, SessionInvalidator};
pub use pipeline::{ApiRequest, ApiResponse, AuthenticatedClient};
