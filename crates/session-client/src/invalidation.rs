//! Session invalidation on unrecoverable refresh failure
//!
//! Clears the stored token pair and broadcasts `AuthFailureSignal` to every
//! subscriber (e.g. the layer that navigates back to login). Deletion is
//! best-effort: failures are logged, never returned, and the signal is sent
//! regardless.

use std::sync::Arc;

use session_auth::{CredentialStore, SecretName};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Buffered signals per subscriber before a slow subscriber starts lagging.
const SIGNAL_CAPACITY: usize = 16;

/// Payload-free event: the session is gone and the user must log in again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthFailureSignal;

/// Clears credentials and notifies subscribers. Cheap to clone; clones share
/// the same store and broadcast channel.
#[derive(Clone)]
pub struct SessionInvalidator {
    store: Arc<dyn CredentialStore>,
    signal: broadcast::Sender<AuthFailureSignal>,
}

impl SessionInvalidator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let (signal, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self { store, signal }
    }

    /// Receive every `AuthFailureSignal` emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthFailureSignal> {
        self.signal.subscribe()
    }

    /// Delete both secrets and emit one `AuthFailureSignal`.
    ///
    /// Synchronous and infallible, so it can run from any context. Calling it
    /// on an already-cleared store just emits the signal again.
    pub fn invalidate(&self) {
        if let Err(e) = self.store.delete_all() {
            warn!(error = %e, "failed to clear credentials, deleting secrets individually");
            for name in SecretName::ALL {
                if let Err(e) = self.store.delete(name) {
                    warn!(
                        secret = %name,
                        error = %e,
                        "failed to delete secret during invalidation"
                    );
                }
            }
        }

        crate::metrics::record_invalidation();

        match self.signal.send(AuthFailureSignal) {
            Ok(subscribers) => info!(subscribers, "session invalidated"),
            Err(_) => info!("session invalidated, no subscribers listening"),
        }
    }
}
