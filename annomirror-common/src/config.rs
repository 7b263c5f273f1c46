//! Configuration loading
//!
//! Config file resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. `ANNOMIRROR_CONFIG` environment variable
//! 3. User config file (`~/.config/annomirror/config.toml` on Linux)
//! 4. Compiled defaults (fallback)
//!
//! Secrets may additionally be supplied through environment variables so they
//! never have to live in the TOML file.

use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "ANNOMIRROR_CONFIG";

const WEBHOOK_SECRET_ENV_VAR: &str = "ANNOMIRROR_WEBHOOK_SECRET";
const REMOTE_PASSWORD_ENV_VAR: &str = "ANNOMIRROR_REMOTE_PASSWORD";
const REMOTE_TOKEN_ENV_VAR: &str = "ANNOMIRROR_REMOTE_TOKEN";
const DATABASE_ENV_VAR: &str = "ANNOMIRROR_DATABASE";

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub webhook: WebhookConfig,
    pub server: ServerConfig,
}

/// `[database]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_folder().join("mirror.db"),
        }
    }
}

/// `[remote]` section: the annotation platform being mirrored
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// REST API root, e.g. `https://annotate.example.org/api`
    pub api_url: String,
    /// Web UI root used to build `remote_url` links
    pub web_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Pre-issued API token; skips the login call when set
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub page_size: u32,
    /// Fetch per-job annotations to fill in the counters
    pub count_annotations: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/api".to_string(),
            web_url: "http://localhost:8080".to_string(),
            username: None,
            password: None,
            token: None,
            timeout_secs: 60,
            page_size: 100,
            count_annotations: true,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("api_url", &self.api_url)
            .field("web_url", &self.web_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("page_size", &self.page_size)
            .field("count_annotations", &self.count_annotations)
            .finish()
    }
}

/// `[webhook]` section
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared HMAC secret configured on the remote webhook
    pub secret: Option<String>,
    pub max_body_bytes: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl WebhookConfig {
    /// The webhook endpoint never runs unsigned
    pub fn require_secret(&self) -> Result<&str> {
        match self.secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(secret),
            _ => Err(Error::Config(format!(
                "webhook.secret is not set (config file or {})",
                WEBHOOK_SECRET_ENV_VAR
            ))),
        }
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5730".to_string(),
        }
    }
}

impl MirrorConfig {
    /// Resolve, parse and validate the configuration
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path, std::env::var(CONFIG_ENV_VAR).ok())? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Overlay secrets and the database path from the environment
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(WEBHOOK_SECRET_ENV_VAR) {
            self.webhook.secret = Some(secret);
        }
        if let Some(password) = lookup(REMOTE_PASSWORD_ENV_VAR) {
            self.remote.password = Some(password);
        }
        if let Some(token) = lookup(REMOTE_TOKEN_ENV_VAR) {
            self.remote.token = Some(token);
        }
        if let Some(path) = lookup(DATABASE_ENV_VAR) {
            self.database.path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.timeout_secs == 0 {
            return Err(Error::Config("remote.timeout_secs must be > 0".to_string()));
        }
        if self.remote.page_size == 0 {
            return Err(Error::Config("remote.page_size must be > 0".to_string()));
        }
        if self.webhook.max_body_bytes == 0 {
            return Err(Error::Config("webhook.max_body_bytes must be > 0".to_string()));
        }
        if !self.remote.api_url.starts_with("http://") && !self.remote.api_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "remote.api_url must be an http(s) URL, got '{}'",
                self.remote.api_url
            )));
        }
        Ok(())
    }
}

/// Pick the config file to read, if any
///
/// An explicit path (CLI or environment) must exist. The per-user file is
/// optional and silently skipped when absent.
pub fn resolve_config_path(
    cli_path: Option<&Path>,
    env_path: Option<String>,
) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    // Priority 2: Environment variable
    let explicit = cli_path
        .map(Path::to_path_buf)
        .or_else(|| env_path.map(PathBuf::from));

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    // Priority 3: User config file
    if let Some(path) = dirs::config_dir().map(|d| d.join("annomirror").join("config.toml")) {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    // Priority 4: Compiled defaults
    Ok(None)
}

/// OS-dependent default data folder
fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("annomirror"))
        .unwrap_or_else(|| PathBuf::from("./annomirror_data"))
}
