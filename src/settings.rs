//! Persisted user settings — token, API URL, shortcut, login item, update schedule.
//!
//! Settings are loaded once at startup and written through explicit setters.
//! The JSON store lives in the platform config directory:
//!   macOS:   ~/Library/Application Support/send-to-crm/settings.json
//!   Linux:   ~/.config/send-to-crm/settings.json
//!   Windows: %APPDATA%/send-to-crm/settings.json

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default ingest API, used until the user or environment overrides it.
pub const DEFAULT_API_BASE_URL: &str = "https://api.sendtocrm.app/functions/v1";

/// Default global shortcut for the current platform.
pub fn default_shortcut() -> &'static str {
    if cfg!(target_os = "macos") {
        "Command+Shift+S"
    } else {
        "Control+Shift+S"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub auth_token: String,
    pub api_base_url: String,
    pub shortcut: String,
    pub start_on_login: bool,
    pub start_on_login_user_set: bool,
    pub last_update_check_at: Option<DateTime<Utc>>,
    pub update_snoozed_until: Option<DateTime<Utc>>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            shortcut: default_shortcut().to_string(),
            start_on_login: true,
            start_on_login_user_set: false,
            last_update_check_at: None,
            update_snoozed_until: None,
        }
    }
}

impl AppSettings {
    /// Applies first-run defaults the user hasn't explicitly overridden.
    fn normalize(&mut self) {
        if !self.start_on_login_user_set {
            self.start_on_login = true;
        }
        if self.shortcut.trim().is_empty() {
            self.shortcut = default_shortcut().to_string();
        }
        if self.api_base_url.trim().is_empty() {
            self.api_base_url = DEFAULT_API_BASE_URL.to_string();
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to write settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Shortcut must not be empty")]
    EmptyShortcut,
}

/// Durable key-value store for [`AppSettings`].
///
/// Only the app loop writes to it, so no locking is involved.
pub trait SettingsStore {
    fn settings(&self) -> &AppSettings;

    /// Mutates settings and persists the result.
    fn update(&mut self, apply: &mut dyn FnMut(&mut AppSettings)) -> Result<(), SettingsError>;

    /// Trimmed token, `None` when unpaired.
    fn auth_token(&self) -> Option<&str> {
        let token = self.settings().auth_token.trim();
        (!token.is_empty()).then_some(token)
    }

    fn set_auth_token(&mut self, token: &str) -> Result<(), SettingsError> {
        let token = token.trim().to_string();
        self.update(&mut |s| s.auth_token = token.clone())
    }

    /// Forces re-pairing.
    fn clear_auth_token(&mut self) -> Result<(), SettingsError> {
        self.update(&mut |s| s.auth_token.clear())
    }

    fn set_shortcut(&mut self, shortcut: &str) -> Result<(), SettingsError> {
        let shortcut = shortcut.trim().to_string();
        if shortcut.is_empty() {
            return Err(SettingsError::EmptyShortcut);
        }
        self.update(&mut |s| s.shortcut = shortcut.clone())
    }

    fn reset_shortcut(&mut self) -> Result<(), SettingsError> {
        self.update(&mut |s| s.shortcut = default_shortcut().to_string())
    }

    /// Records an explicit user choice; first-run defaults stop applying.
    fn set_start_on_login(&mut self, enabled: bool) -> Result<(), SettingsError> {
        self.update(&mut |s| {
            s.start_on_login = enabled;
            s.start_on_login_user_set = true;
        })
    }

    fn record_update_schedule(
        &mut self,
        last_check_at: Option<DateTime<Utc>>,
        snoozed_until: Option<DateTime<Utc>>,
    ) -> Result<(), SettingsError> {
        self.update(&mut |s| {
            s.last_update_check_at = last_check_at;
            s.update_snoozed_until = snoozed_until;
        })
    }
}

/// Default settings file location.
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("send-to-crm")
        .join("settings.json")
}

/// Settings persisted as pretty JSON.
pub struct JsonSettingsStore {
    path: PathBuf,
    settings: AppSettings,
}

impl JsonSettingsStore {
    /// Loads settings from `path`, falling back to defaults.
    ///
    /// A missing file is normal on first run; a malformed one is logged and
    /// replaced on the next write.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut settings = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("[SETTINGS] Ignoring malformed {}: {}", path.display(), e);
                AppSettings::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
            Err(e) => {
                log::warn!("[SETTINGS] Cannot read {}: {}", path.display(), e);
                AppSettings::default()
            }
        };
        settings.normalize();

        log::info!("[SETTINGS] Loaded from {}", path.display());
        Self { path, settings }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Memory only changes once the new settings are on disk.
    fn update(&mut self, apply: &mut dyn FnMut(&mut AppSettings)) -> Result<(), SettingsError> {
        let mut next = self.settings.clone();
        apply(&mut next);
        self.save(&next)?;
        self.settings = next;
        Ok(())
    }
}

/// In-memory store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: AppSettings,
}

impl MemorySettingsStore {
    pub fn new(settings: AppSettings) -> Self {
        Self { settings }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn settings(&self) -> &AppSettings {
        &self.settings
    }

    fn update(&mut self, apply: &mut dyn FnMut(&mut AppSettings)) -> Result<(), SettingsError> {
        apply(&mut self.settings);
        Ok(())
    }
}
