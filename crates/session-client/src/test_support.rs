//! Test doubles shared by the coordinator and pipeline tests

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::mpsc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::Secret;
use session_auth::{
    CredentialStore, MemoryCredentialStore, RefreshTransport, SecretName, TokenPair,
};
use tokio::sync::Semaphore;

use crate::RefreshCoordinator;

pub enum MockOutcome {
    Pair(&'static str, &'static str),
    Reject,
    Panic,
}

/// Refresh transport that counts calls and can be held open until the test
/// releases it.
pub struct MockTransport {
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
    outcome: MockOutcome,
}

impl MockTransport {
    fn with_outcome(outcome: MockOutcome) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            gate: None,
            outcome,
        }
    }

    pub fn returning(access: &'static str, refresh: &'static str) -> Self {
        Self::with_outcome(MockOutcome::Pair(access, refresh))
    }

    pub fn rejecting() -> Self {
        Self::with_outcome(MockOutcome::Reject)
    }

    pub fn panicking() -> Self {
        Self::with_outcome(MockOutcome::Panic)
    }

    /// Block every refresh until `open_gate` is called.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_tokens(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl RefreshTransport for MockTransport {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = session_auth::Result<TokenPair>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(refresh_token.to_owned());
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            match self.outcome {
                MockOutcome::Pair(access, refresh) => Ok(TokenPair::new(access, refresh)),
                MockOutcome::Reject => Err(session_auth::Error::InvalidCredentials(
                    "refresh token revoked".into(),
                )),
                MockOutcome::Panic => panic!("refresh transport blew up"),
            }
        })
    }
}

/// Store that can be read but rejects every write and delete.
pub struct FailingStore {
    inner: MemoryCredentialStore,
}

impl FailingStore {
    pub fn with_pair(access: &str, refresh: &str) -> Self {
        Self {
            inner: MemoryCredentialStore::with_pair(access, refresh),
        }
    }

    fn read_only() -> session_auth::Error {
        session_auth::Error::Io("keystore is read-only".into())
    }
}

impl CredentialStore for FailingStore {
    fn save(&self, _name: SecretName, _value: &str) -> session_auth::Result<()> {
        Err(Self::read_only())
    }

    fn load(&self, name: SecretName) -> session_auth::Result<Option<Secret<String>>> {
        self.inner.load(name)
    }

    fn delete(&self, _name: SecretName) -> session_auth::Result<()> {
        Err(Self::read_only())
    }

    fn delete_all(&self) -> session_auth::Result<()> {
        Err(Self::read_only())
    }

    fn save_pair(&self, _pair: &TokenPair) -> session_auth::Result<()> {
        Err(Self::read_only())
    }
}

/// Store whose refresh-token read blocks the calling thread until unlocked,
/// like a keystore waiting on an unlock prompt. Gives up after two seconds.
pub struct SlowStore {
    inner: MemoryCredentialStore,
    unlock: Mutex<mpsc::Receiver<()>>,
}

impl SlowStore {
    pub fn with_pair(access: &str, refresh: &str) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let store = Self {
            inner: MemoryCredentialStore::with_pair(access, refresh),
            unlock: Mutex::new(rx),
        };
        (store, tx)
    }
}

impl CredentialStore for SlowStore {
    fn save(&self, name: SecretName, value: &str) -> session_auth::Result<()> {
        self.inner.save(name, value)
    }

    fn load(&self, name: SecretName) -> session_auth::Result<Option<Secret<String>>> {
        if name == SecretName::RefreshToken {
            self.unlock
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(2))
                .map_err(|_| session_auth::Error::Io("keystore unlock timed out".into()))?;
        }
        self.inner.load(name)
    }

    fn delete(&self, name: SecretName) -> session_auth::Result<()> {
        self.inner.delete(name)
    }

    fn delete_all(&self) -> session_auth::Result<()> {
        self.inner.delete_all()
    }

    fn save_pair(&self, pair: &TokenPair) -> session_auth::Result<()> {
        self.inner.save_pair(pair)
    }
}

/// Wait until `n` callers are suspended on the in-flight refresh.
pub async fn wait_for_waiters(coordinator: &RefreshCoordinator, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while coordinator.waiter_count() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("callers never joined the in-flight refresh");
}

pub fn stored(store: &dyn CredentialStore, name: SecretName) -> Option<String> {
    store.load(name).unwrap().map(|s| s.expose().clone())
}
