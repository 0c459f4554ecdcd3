//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The password is loaded from the AUTH_PASSWORD env var or password_file,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use serde::Deserialize;
use session_auth::{
    DEFAULT_LOGIN_PATH, DEFAULT_REFRESH_PATH, DEFAULT_REFRESH_TIMEOUT_SECS, DEFAULT_STORAGE_FILE,
    DEFAULT_STORAGE_KEY, EXPIRED_CREDENTIAL_STATUS,
};
use std::path::{Path, PathBuf};
use transport::HeaderInjection;
use transport::http::join_url;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// Remote API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    /// Overridden by API_BASE_URL
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Session endpoint and refresh settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    /// Path to a file containing the password (alternative to AUTH_PASSWORD env var)
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    #[serde(default = "default_expired_status")]
    pub expired_status: u16,
    /// Background refresh interval; disabled when unset
    #[serde(default)]
    pub proactive_refresh_secs: Option<u64>,
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
}

/// Credential persistence settings
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    #[serde(default = "default_storage_key")]
    pub key: String,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_login_path() -> String {
    DEFAULT_LOGIN_PATH.into()
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.into()
}

fn default_refresh_timeout() -> u64 {
    DEFAULT_REFRESH_TIMEOUT_SECS
}

fn default_expired_status() -> u16 {
    EXPIRED_CREDENTIAL_STATUS
}

fn default_refresh_threshold() -> u64 {
    60
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_FILE)
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.into()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            password_file: None,
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
            refresh_timeout_secs: default_refresh_timeout(),
            expired_status: default_expired_status(),
            proactive_refresh_secs: None,
            refresh_threshold_secs: default_refresh_threshold(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            key: default_storage_key(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Password resolution order:
    /// 1. AUTH_PASSWORD env var
    /// 2. password_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("API_BASE_URL") {
            config.api.base_url = url;
        }

        config.validate()?;

        // Resolve password: env var takes precedence over file
        if let Ok(password) = std::env::var("AUTH_PASSWORD") {
            config.auth.password = Some(Secret::new(password));
        } else if let Some(ref password_file) = config.auth.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            let password = password.trim().to_owned();
            if !password.is_empty() {
                config.auth.password = Some(Secret::new(password));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.api.base_url.is_empty() {
            return Err(common::Error::Config(
                "api.base_url is required (or set API_BASE_URL)".into(),
            ));
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.auth.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0".into(),
            ));
        }

        if !(400..500).contains(&self.auth.expired_status) {
            return Err(common::Error::Config(format!(
                "expired_status must be a 4xx status, got: {}",
                self.auth.expired_status
            )));
        }

        if self.auth.proactive_refresh_secs == Some(0) {
            return Err(common::Error::Config(
                "proactive_refresh_secs must be greater than 0 when set".into(),
            ));
        }

        if self.storage.key.is_empty() {
            return Err(common::Error::Config("storage.key must not be empty".into()));
        }

        Ok(())
    }

    pub fn login_url(&self) -> String {
        join_url(&self.api.base_url, &self.auth.login_path)
    }

    pub fn refresh_url(&self) -> String {
        join_url(&self.api.base_url, &self.auth.refresh_path)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("session-cli.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    /// Clear every variable `Config::load` reads.
    fn clear_env() {
        unsafe {
            remove_env("API_BASE_URL");
            remove_env("AUTH_PASSWORD");
        }
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("session-cli.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn valid_toml() -> &'static str {
        r#"
[api]
base_url = "https://erp.example.com/api"

[auth]
username = "alice"

[[headers]]
name = "x-client"
value = "dashboard"
"#
    }

    #[test]
    fn test_load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api.base_url, "https://erp.example.com/api");
        assert_eq!(config.api.request_timeout_secs, 30);
        assert_eq!(config.auth.username.as_deref(), Some("alice"));
        assert_eq!(config.auth.refresh_timeout_secs, 10);
        assert_eq!(config.auth.expired_status, 401);
        assert_eq!(config.auth.refresh_threshold_secs, 60);
        assert!(config.auth.proactive_refresh_secs.is_none());
        assert!(config.auth.password.is_none());
        assert_eq!(config.storage.path, PathBuf::from("session.json"));
        assert_eq!(config.storage.key, "session");
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers[0].name, "x-client");
    }

    #[test]
    fn test_endpoint_urls_join_base() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.login_url(), "https://erp.example.com/api/auth/login");
        assert_eq!(
            config.refresh_url(),
            "https://erp.example.com/api/auth/refresh"
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        let result = Config::load(&path);
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_base_url_from_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { set_env("API_BASE_URL", "http://localhost:9000") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:9000");
        clear_env();
    }

    #[test]
    fn test_base_url_required() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[auth]\nusername = \"alice\"\n");

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("base_url is required"), "got: {err}");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[api]\nbase_url = \"erp.example.com\"\n");

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(
            err.contains("base_url must start with http"),
            "error message should explain the issue, got: {err}"
        );
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();

        let path = write_config(
            &dir,
            "[api]\nbase_url = \"https://x.test\"\nrequest_timeout_secs = 0\n",
        );
        assert!(Config::load(&path).is_err(), "request_timeout_secs = 0 must be rejected");

        let path = write_config(
            &dir,
            "[api]\nbase_url = \"https://x.test\"\n[auth]\nrefresh_timeout_secs = 0\n",
        );
        assert!(Config::load(&path).is_err(), "refresh_timeout_secs = 0 must be rejected");

        let path = write_config(
            &dir,
            "[api]\nbase_url = \"https://x.test\"\n[auth]\nproactive_refresh_secs = 0\n",
        );
        assert!(Config::load(&path).is_err(), "proactive_refresh_secs = 0 must be rejected");
    }

    #[test]
    fn test_expired_status_must_be_client_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();

        let path = write_config(
            &dir,
            "[api]\nbase_url = \"https://x.test\"\n[auth]\nexpired_status = 500\n",
        );
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("expired_status"), "got: {err}");

        let path = write_config(
            &dir,
            "[api]\nbase_url = \"https://x.test\"\n[auth]\nexpired_status = 419\n",
        );
        assert_eq!(Config::load(&path).unwrap().auth.expired_status, 419);
    }

    #[test]
    fn test_password_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { set_env("AUTH_PASSWORD", "hunter2") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.auth.password.as_ref().unwrap().expose(), "hunter2");
        clear_env();
    }

    #[test]
    fn test_password_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let password_path = dir.path().join("password");
        std::fs::write(&password_path, "from-file\n").unwrap();

        let toml_content = format!(
            "[api]\nbase_url = \"https://x.test\"\n[auth]\npassword_file = \"{}\"\n",
            password_path.display()
        );
        let path = write_config(&dir, &toml_content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.auth.password.as_ref().unwrap().expose(), "from-file");
    }

    #[test]
    fn test_password_env_overrides_missing_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[api]\nbase_url = \"https://x.test\"\n[auth]\npassword_file = \"/nonexistent/password\"\n",
        );

        unsafe { set_env("AUTH_PASSWORD", "env-wins") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.auth.password.as_ref().unwrap().expose(), "env-wins");
        clear_env();
    }

    #[test]
    fn test_missing_password_file_is_an_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[api]\nbase_url = \"https://x.test\"\n[auth]\npassword_file = \"/nonexistent/password\"\n",
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("session-cli.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
