//! Credential storage and token refresh boundaries
//!
//! The two collaborators the session client depends on but does not own:
//! - `CredentialStore`: durable save/load/delete of the access and refresh
//!   tokens, keyed by `SecretName`
//! - `RefreshTransport`: the network call that exchanges a refresh token for
//!   a new `TokenPair`
//!
//! Both are traits so the coordinator can be driven by the file/HTTP
//! implementations here or by in-memory doubles in tests.

pub mod credentials;
pub mod error;
pub mod token;

pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore, SecretName};
pub use error::{Error, Result};
pub use token::{HttpRefreshTransport, RefreshTransport, TokenPair};
