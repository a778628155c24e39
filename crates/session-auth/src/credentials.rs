//! Credential storage for the session token pair
//!
//! The store holds exactly two secrets, the access token and the refresh
//! token. It is synchronous: backends are expected to be a keychain, an
//! encrypted keystore, or a small file, none of which need an async API.
//!
//! `FileCredentialStore` keeps the secrets in memory and writes through to a
//! JSON file on every change using atomic temp-file + rename, so a crash
//! mid-write never leaves a torn file. `save_pair` and `delete_all` are a
//! single write, which is what keeps the two secrets from ever being observed
//! half-updated.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use common::Secret;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::token::TokenPair;

/// Logical name of a stored secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretName {
    AccessToken,
    RefreshToken,
}

impl SecretName {
    /// Both names, in the order they are written.
    pub const ALL: [SecretName; 2] = [SecretName::AccessToken, SecretName::RefreshToken];

    /// Key used in the backing store.
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretName::AccessToken => "accessToken",
            SecretName::RefreshToken => "refreshToken",
        }
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key/value store for the access/refresh token pair.
///
/// Deleting an absent secret is not an error. Implementations that can write
/// both secrets in one operation should override `save_pair`.
pub trait CredentialStore: Send + Sync {
    fn save(&self, name: SecretName, value: &str) -> Result<()>;

    fn load(&self, name: SecretName) -> Result<Option<Secret<String>>>;

    fn delete(&self, name: SecretName) -> Result<()>;

    fn delete_all(&self) -> Result<()>;

    /// Persist both tokens of a pair.
    fn save_pair(&self, pair: &TokenPair) -> Result<()> {
        self.save(SecretName::AccessToken, pair.access_token.expose())?;
        self.save(SecretName::RefreshToken, pair.refresh_token.expose())
    }

    /// Load both tokens, or `None` if either is missing.
    fn load_pair(&self) -> Result<Option<TokenPair>> {
        let access = self.load(SecretName::AccessToken)?;
        let refresh = self.load(SecretName::RefreshToken)?;
        Ok(access.zip(refresh).map(|(access_token, refresh_token)| TokenPair {
            access_token,
            refresh_token,
        }))
    }
}

/// File-backed credential store.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
}

impl FileCredentialStore {
    /// Open the credential file at `path`.
    ///
    /// If the file doesn't exist it is created as `{}` (logged-out cold start).
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let secrets: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), secrets = secrets.len(), "loaded credentials");
            secrets
        } else {
            info!(path = %path.display(), "credential file not found, starting logged out");
            let state = HashMap::new();
            write_atomic(&path, &state)?;
            state
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` to a copy of the state, persist it, then commit it in
    /// memory. A failed write leaves both memory and disk untouched.
    fn update(&self, change: impl FnOnce(&mut HashMap<String, String>) -> bool) -> Result<()> {
        let mut state = self.lock();
        let mut next = state.clone();
        if !change(&mut next) {
            return Ok(());
        }
        write_atomic(&self.path, &next)?;
        *state = next;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, name: SecretName, value: &str) -> Result<()> {
        self.update(|secrets| {
            secrets.insert(name.as_str().to_owned(), value.to_owned());
            true
        })?;
        debug!(secret = %name, "saved secret");
        Ok(())
    }

    fn load(&self, name: SecretName) -> Result<Option<Secret<String>>> {
        Ok(self.lock().get(name.as_str()).cloned().map(Secret::new))
    }

    fn delete(&self, name: SecretName) -> Result<()> {
        self.update(|secrets| secrets.remove(name.as_str()).is_some())?;
        debug!(secret = %name, "deleted secret");
        Ok(())
    }

    fn delete_all(&self) -> Result<()> {
        self.update(|secrets| {
            let had_any = !secrets.is_empty();
            secrets.clear();
            had_any
        })?;
        debug!("deleted all secrets");
        Ok(())
    }

    fn save_pair(&self, pair: &TokenPair) -> Result<()> {
        self.update(|secrets| {
            secrets.insert(
                SecretName::AccessToken.as_str().to_owned(),
                pair.access_token.expose().clone(),
            );
            secrets.insert(
                SecretName::RefreshToken.as_str().to_owned(),
                pair.refresh_token.expose().clone(),
            );
            true
        })?;
        debug!("saved token pair");
        Ok(())
    }

    fn load_pair(&self) -> Result<Option<TokenPair>> {
        let state = self.lock();
        let access = state.get(SecretName::AccessToken.as_str());
        let refresh = state.get(SecretName::RefreshToken.as_str());
        Ok(access.zip(refresh).map(|(access, refresh)| TokenPair {
            access_token: Secret::new(access.clone()),
            refresh_token: Secret::new(refresh.clone()),
        }))
    }
}

/// Write secrets to a file atomically.
///
/// Writes to a uniquely named temporary file in the same directory, then
/// renames it over the target. Sets file permissions to 0600 (owner
/// read/write only).
fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::Io(format!("creating temp credential file: {e}")))?;

    tmp.write_all(json.as_bytes())
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tmp.as_file()
            .set_permissions(perms)
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tmp.persist(path)
        .map_err(|e| Error::Io(format!("renaming temp credential file: {}", e.error)))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

/// In-process credential store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<SecretName, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a token pair.
    pub fn with_pair(access: &str, refresh: &str) -> Self {
        let store = Self::new();
        {
            let mut secrets = store.lock();
            secrets.insert(SecretName::AccessToken, access.to_owned());
            secrets.insert(SecretName::RefreshToken, refresh.to_owned());
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SecretName, String>> {
        self.secrets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, name: SecretName, value: &str) -> Result<()> {
        self.lock().insert(name, value.to_owned());
        Ok(())
    }

    fn load(&self, name: SecretName) -> Result<Option<Secret<String>>> {
        Ok(self.lock().get(&name).cloned().map(Secret::new))
    }

    fn delete(&self, name: SecretName) -> Result<()> {
        self.lock().remove(&name);
        Ok(())
    }

    fn delete_all(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }

    fn save_pair(&self, pair: &TokenPair) -> Result<()> {
        let mut secrets = self.lock();
        secrets.insert(SecretName::AccessToken, pair.access_token.expose().clone());
        secrets.insert(SecretName::RefreshToken, pair.refresh_token.expose().clone());
        Ok(())
    }

    fn load_pair(&self) -> Result<Option<TokenPair>> {
        let secrets = self.lock();
        let access = secrets.get(&SecretName::AccessToken);
        let refresh = secrets.get(&SecretName::RefreshToken);
        Ok(access.zip(refresh).map(|(access, refresh)| TokenPair::new(access, refresh)))
    }
}
