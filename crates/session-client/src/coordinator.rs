//! Single-flight token refresh
//!
//! `RefreshState` (`in_flight` + `waiters`) lives behind a std `Mutex` that is
//! only ever held to flip the flag, push a waiter, or drain the waiter list,
//! never across an await or any I/O.
//!
//! Every caller registers a oneshot sender under the lock. The first caller to
//! find `in_flight == false` sets it and spawns the attempt; everyone else
//! just waits on their receiver. When the attempt finishes, the commit step
//! clears `in_flight` and drains the waiters in one critical section, then
//! sends the same outcome to each. A caller that arrives after the commit
//! starts a fresh attempt, so failures are never cached.
//!
//! The attempt runs on its own task: dropping a caller's future does not
//! cancel the refresh for anyone else. If the attempt task dies without
//! committing, `CommitGuard` commits `false` on drop so no waiter hangs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use session_auth::{CredentialStore, RefreshTransport, SecretName};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::invalidation::SessionInvalidator;

/// What a failed refresh does to the stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidationPolicy {
    /// Clear credentials and emit `AuthFailureSignal` on every failed attempt.
    #[default]
    Always,
    /// Report the failure to callers and leave the store untouched.
    Never,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<bool>>,
}

struct Shared {
    state: Mutex<RefreshState>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn RefreshTransport>,
    invalidator: SessionInvalidator,
    policy: InvalidationPolicy,
}

/// Process-wide refresh coordinator. Clones share the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn RefreshTransport>,
        invalidator: SessionInvalidator,
        policy: InvalidationPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RefreshState::default()),
                store,
                transport,
                invalidator,
                policy,
            }),
        }
    }

    /// Refresh the token pair, or join the refresh already running.
    ///
    /// Returns `true` once the new pair is persisted. Every call that
    /// overlaps the same attempt returns the same value. Must be called from
    /// within a tokio runtime.
    pub async fn ensure_fresh_token(&self) -> bool {
        let (tx, rx) = oneshot::channel();

        let start_attempt = {
            let mut state = self.shared.lock_state();
            state.waiters.push(tx);
            if state.in_flight {
                false
            } else {
                state.in_flight = true;
                true
            }
        };

        if start_attempt {
            debug!("starting token refresh");
            tokio::spawn(run_attempt(self.shared.clone()));
        } else {
            debug!("joining in-flight token refresh");
            crate::metrics::record_refresh_joined();
        }

        // A dropped sender means the commit never reached us; treat as failure.
        rx.await.unwrap_or(false)
    }

    /// Whether a refresh attempt is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.shared.lock_state().in_flight
    }

    /// Callers currently suspended on the in-flight attempt, including the
    /// one that started it.
    pub fn waiter_count(&self) -> usize {
        self.shared.lock_state().waiters.len()
    }

    pub fn invalidator(&self) -> &SessionInvalidator {
        &self.shared.invalidator
    }

    pub fn policy(&self) -> InvalidationPolicy {
        self.shared.policy
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear `in_flight`, drain the waiters, and hand each the outcome.
    fn commit(&self, success: bool) {
        let waiters = {
            let mut state = self.lock_state();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };

        crate::metrics::record_refresh_attempt(success);
        debug!(waiters = waiters.len(), success, "broadcasting refresh outcome");

        for waiter in waiters {
            // Receiver gone means that caller was cancelled; nothing to do.
            let _ = waiter.send(success);
        }
    }

    /// Load the refresh token, call the transport, persist the new pair.
    async fn refresh_once(&self) -> bool {
        let store = self.store.clone();
        let read = tokio::task::spawn_blocking(move || store.load(SecretName::RefreshToken));
        let loaded = match read.await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "refresh token read task failed");
                return self.fail().await;
            }
        };

        let refresh_token = match loaded {
            Ok(Some(token)) => token,
            Ok(None) => {
                warn!("no refresh token stored, cannot refresh");
                return self.fail().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to read refresh token");
                return self.fail().await;
            }
        };

        let pair = match self.transport.refresh(refresh_token.expose()).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                return self.fail().await;
            }
        };

        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.save_pair(&pair)).await {
            Ok(Ok(())) => {
                info!("token refresh succeeded");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to persist refreshed token pair");
                self.fail().await
            }
            Err(e) => {
                warn!(error = %e, "token pair persistence task failed");
                self.fail().await
            }
        }
    }

    /// Apply the invalidation policy for a failed attempt. Always `false`.
    async fn fail(&self) -> bool {
        if self.policy == InvalidationPolicy::Always {
            let invalidator = self.invalidator.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || invalidator.invalidate()).await {
                warn!(error = %e, "session invalidation task failed");
            }
        }
        false
    }
}

/// Commits `false` if dropped before `finish`, e.g. when the attempt task
/// panics or the runtime shuts down mid-attempt.
struct CommitGuard {
    shared: Arc<Shared>,
    committed: bool,
}

impl CommitGuard {
    fn finish(mut self, success: bool) {
        self.committed = true;
        self.shared.commit(success);
    }
}

impl Drop for CommitGuard {
    fn drop(&mut self) {
        if !self.committed {
            warn!("refresh attempt ended without an outcome, reporting failure");
            self.shared.commit(false);
        }
    }
}

async fn run_attempt(shared: Arc<Shared>) {
    let guard = CommitGuard {
        shared: shared.clone(),
        committed: false,
    };
    let success = shared.refresh_once().await;
    guard.finish(success);
}
