//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `--config` / `CONFIG_PATH` are resolved by clap before `resolve_path`.
//! Tokens never live in the TOML; they are kept in the credential file
//! named by `credentials.path` (or `SESSION_CREDENTIALS_PATH`).

use serde::Deserialize;
use session_client::InvalidationPolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub refresh: RefreshConfig,
    pub credentials: CredentialsConfig,
}

/// Business API the authenticated client talks to
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

/// Refresh endpoint and failure behavior
#[derive(Debug, Deserialize)]
pub struct RefreshConfig {
    pub endpoint: String,
    #[serde(default = "default_refresh_timeout")]
    pub timeout_secs: u64,
    /// Clear credentials and signal logout when a refresh fails
    #[serde(default = "default_logout_on_failure")]
    pub logout_on_failure: bool,
}

/// Where the token pair is stored
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    pub path: PathBuf,
}

fn default_api_timeout() -> u64 {
    30
}

fn default_refresh_timeout() -> u64 {
    15
}

fn default_logout_on_failure() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        validate_url("api.base_url", &config.api.base_url)?;
        validate_url("refresh.endpoint", &config.refresh.endpoint)?;

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }

        if config.refresh.timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh.timeout_secs must be greater than 0".into(),
            ));
        }

        if let Ok(path) = std::env::var("SESSION_CREDENTIALS_PATH") {
            config.credentials.path = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Resolve config file path. `cli_path` already carries `CONFIG_PATH`
    /// when the flag was omitted.
    pub fn resolve_path(cli_path: Option<PathBuf>) -> PathBuf {
        cli_path.unwrap_or_else(|| PathBuf::from("session-cli.toml"))
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh.timeout_secs)
    }

    pub fn invalidation_policy(&self) -> InvalidationPolicy {
        if self.refresh.logout_on_failure {
            InvalidationPolicy::Always
        } else {
            InvalidationPolicy::Never
        }
    }
}

fn validate_url(field: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[api]
base_url = "https://api.example.com"

[refresh]
endpoint = "https://api.example.com/auth/refresh"

[credentials]
path = "/var/lib/session-cli/credentials.json"
"#
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session-cli.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn load_applies_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("SESSION_CREDENTIALS_PATH") };
        let (_dir, path) = write_config(valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api.base_url, "https://api.example.com");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.refresh.timeout_secs, 15);
        assert!(config.refresh.logout_on_failure);
        assert_eq!(config.invalidation_policy(), InvalidationPolicy::Always);
        assert_eq!(
            config.credentials.path,
            PathBuf::from("/var/lib/session-cli/credentials.json")
        );
    }

    #[test]
    fn logout_on_failure_false_selects_never_policy() {
        let toml = valid_toml().replace(
            "[credentials]",
            "logout_on_failure = false\n\n[credentials]",
        );
        let (_dir, path) = write_config(&toml);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.invalidation_policy(), InvalidationPolicy::Never);
    }

    #[test]
    fn load_missing_file_fails() {
        let result = Config::load(Path::new("/nonexistent/path/session-cli.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn load_invalid_toml_fails() {
        let (_dir, path) = write_config("not valid {{{{ toml");
        assert!(matches!(Config::load(&path), Err(common::Error::Toml(_))));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let toml = valid_toml().replace("https://api.example.com\"", "ftp://api.example.com\"");
        let (_dir, path) = write_config(&toml);

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("api.base_url"), "got: {err}");
    }

    #[test]
    fn rejects_non_http_refresh_endpoint() {
        let toml = valid_toml().replace(
            "https://api.example.com/auth/refresh",
            "api.example.com/auth/refresh",
        );
        let (_dir, path) = write_config(&toml);

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("refresh.endpoint"), "got: {err}");
    }

    #[test]
    fn rejects_zero_timeouts() {
        let toml = valid_toml().replace(
            "base_url = \"https://api.example.com\"",
            "base_url = \"https://api.example.com\"\ntimeout_secs = 0",
        );
        let (_dir, path) = write_config(&toml);
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("api.timeout_secs"), "got: {err}");

        let toml = valid_toml().replace("[credentials]", "timeout_secs = 0\n\n[credentials]");
        let (_dir, path) = write_config(&toml);
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("refresh.timeout_secs"), "got: {err}");
    }

    #[test]
    fn credentials_path_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (_dir, path) = write_config(valid_toml());

        unsafe { set_env("SESSION_CREDENTIALS_PATH", "/tmp/override.json") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env("SESSION_CREDENTIALS_PATH") };

        assert_eq!(config.credentials.path, PathBuf::from("/tmp/override.json"));
    }

    #[test]
    fn resolve_path_prefers_given_path() {
        let path = Config::resolve_path(Some(PathBuf::from("/custom/path.toml")));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn resolve_path_default() {
        assert_eq!(Config::resolve_path(None), PathBuf::from("session-cli.toml"));
    }
}
