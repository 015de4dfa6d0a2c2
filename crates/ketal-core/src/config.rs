use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::auth::DEFAULT_REDIRECT_URI;

/// Custom scheme the sign-out session waits on.
pub const DEFAULT_SIGN_OUT_CALLBACK_SCHEME: &str = "app.ketal.ios";
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SCOPES: &[&str; 2] = &["openid", "urn:matrix:org.matrix.msc2967.client:api:*"];

/// Locates the configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    pub fn new() -> Result<Self, ConfigError> {
        let dirs =
            ProjectDirs::from("app", "ketal", "ketal").ok_or(ConfigError::MissingProjectDirs)?;
        Ok(Self {
            root: dirs.config_dir().to_path_buf(),
        })
    }

    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }
}

/// Settings shared by the sign-in and sign-out flows.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub user_agent: String,
    pub default_redirect_uri: String,
    pub sign_out_callback_scheme: String,
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
    pub discovery_timeout_secs: Option<u64>,
    pub sign_out_timeout_secs: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            default_redirect_uri: DEFAULT_REDIRECT_URI.to_owned(),
            sign_out_callback_scheme: DEFAULT_SIGN_OUT_CALLBACK_SCHEME.to_owned(),
            client_id: None,
            scopes: DEFAULT_SCOPES.iter().map(|scope| scope.to_string()).collect(),
            discovery_timeout_secs: Some(DEFAULT_DISCOVERY_TIMEOUT_SECS),
            sign_out_timeout_secs: None,
        }
    }
}

impl AppConfig {
    /// Load `config.json` if present, then apply environment overrides.
    pub fn load(locator: &ConfigLocator) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(&locator.config_file())?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(client_id) = non_empty_var("KETAL_CLIENT_ID") {
            self.client_id = Some(client_id);
        }

        if let Some(user_agent) = non_empty_var("KETAL_USER_AGENT") {
            self.user_agent = user_agent;
        }

        if let Some(redirect) = non_empty_var("KETAL_REDIRECT_URI") {
            Url::parse(&redirect).map_err(|err| ConfigError::InvalidValue {
                key: "KETAL_REDIRECT_URI",
                reason: err.to_string(),
            })?;
            self.default_redirect_uri = redirect;
        }

        if let Some(scopes) = non_empty_var("KETAL_SCOPES") {
            self.scopes = scopes.split_whitespace().map(str::to_owned).collect();
        }

        Ok(())
    }

    /// User agent reduced to printable ASCII so it is always a valid header value.
    pub fn ascii_user_agent(&self) -> String {
        self.user_agent
            .chars()
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect()
    }

    pub fn discovery_timeout(&self) -> Option<Duration> {
        self.discovery_timeout_secs.map(Duration::from_secs)
    }

    pub fn sign_out_timeout(&self) -> Option<Duration> {
        self.sign_out_timeout_secs.map(Duration::from_secs)
    }
}

fn default_user_agent() -> String {
    format!(
        "ketal/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        env::consts::OS,
        env::consts::ARCH
    )
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Errors raised while locating or reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for ketal")]
    MissingProjectDirs,
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}
