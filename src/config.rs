//! Runtime configuration from the environment (and an optional `.env`).

use std::path::{Path, PathBuf};
use url::Url;

/// Release feed used for auto-update unless overridden.
pub const DEFAULT_UPDATE_REPO: &str = "Ben-445/auto-crm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Overrides the persisted API base URL when set.
    pub api_base_url_override: Option<String>,
    /// Keep a local PNG copy of every capture. Off unless explicitly enabled.
    pub save_screenshots_local: bool,
    /// Packaged builds auto-update; dev runs never do.
    pub packaged: bool,
    /// `owner/repo` of the GitHub release feed.
    pub update_repo: String,
    pub client_os: String,
    pub client_version: String,
    /// The `.env` file that was applied, if any. Logged once logging is up.
    pub env_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url_override: None,
            save_screenshots_local: false,
            packaged: !cfg!(debug_assertions),
            update_repo: DEFAULT_UPDATE_REPO.to_string(),
            client_os: std::env::consts::OS.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            env_file: None,
        }
    }
}

impl AppConfig {
    /// Loads `.env` (if present) and reads the process environment.
    ///
    /// Runs before the logger exists, so nothing is logged here.
    pub fn from_env() -> Self {
        let env_file = dotenvy::dotenv().ok();
        Self {
            env_file,
            ..Self::from_lookup(|key| std::env::var(key).ok())
        }
    }

    /// Like [`Self::from_env`], with an explicit `.env` file.
    pub fn from_env_file(path: &Path) -> Self {
        let env_file = dotenvy::from_path(path).ok().map(|()| path.to_path_buf());
        Self {
            env_file,
            ..Self::from_lookup(|key| std::env::var(key).ok())
        }
    }

    /// Builds config from any key lookup; used directly by tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str| lookup(key).is_some_and(|v| v.trim() == "1");

        Self {
            api_base_url_override: lookup("SEND_TO_CRM_API_URL")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            save_screenshots_local: flag("SAVE_SCREENSHOTS_LOCAL"),
            packaged: defaults.packaged && !flag("SEND_TO_CRM_DEV"),
            update_repo: lookup("SEND_TO_CRM_UPDATE_REPO")
                .map(|v| v.trim().to_string())
                .filter(|v| v.contains('/'))
                .unwrap_or(defaults.update_repo),
            ..defaults
        }
    }

    /// The API base URL to use: environment override first, then settings.
    pub fn resolve_api_base_url(&self, from_settings: &str) -> Result<String, ConfigError> {
        let candidate = self
            .api_base_url_override
            .as_deref()
            .unwrap_or(from_settings)
            .trim();
        validate_api_base_url(candidate)?;
        Ok(candidate.trim_end_matches('/').to_string())
    }
}

/// Accepts HTTPS, or plain HTTP only for loopback development servers.
pub fn validate_api_base_url(candidate: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(candidate)
        .map_err(|e| ConfigError::InvalidApiBaseUrl(format!("{}: {}", candidate, e)))?;

    let loopback = matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1"));
    match parsed.scheme() {
        "https" => Ok(()),
        "http" if loopback => Ok(()),
        scheme => Err(ConfigError::InvalidApiBaseUrl(format!(
            "{} uses {} (https required)",
            candidate, scheme
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid API base URL: {0}")]
    InvalidApiBaseUrl(String),
}
