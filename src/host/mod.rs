//! Seams to the platform: selection overlay, prompt surfaces, notifications
//! and the OS screen-recording permission.
//!
//! The core never talks to windows or the OS directly. The binary plugs in
//! [`ConsoleHost`]; tests plug in recorders.

mod console;

pub use console::{parse_command, ConsoleCommand, ConsoleHost};

use crate::capture::CaptureBounds;
use crate::update::UpdatePromptView;
use crate::upload::QuotaInfo;
use async_trait::async_trait;

/// OS screen-recording grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

pub trait ScreenPermission: Send + Sync {
    fn status(&self) -> PermissionStatus;

    /// Asks the OS to show its permission dialog. Returns the status afterwards.
    fn prompt(&self) -> PermissionStatus;
}

/// For platforms without a capture permission model.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeGranted;

impl ScreenPermission for AssumeGranted {
    fn status(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    fn prompt(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }
}

/// Best-effort user notifications. Implementations swallow their own failures.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Writes notifications to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        log::info!("[NOTIFY] {}: {}", title, body);
    }
}

/// The prompt windows the app can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Pairing,
    Quota,
    Update,
}

/// What a prompt surface renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptState {
    /// `reason` is shown above the token field, e.g. after a revoked token.
    Pairing { reason: Option<String> },
    Quota(QuotaInfo),
    Update(UpdatePromptView),
}

impl PromptState {
    pub fn kind(&self) -> PromptKind {
        match self {
            PromptState::Pairing { .. } => PromptKind::Pairing,
            PromptState::Quota(_) => PromptKind::Quota,
            PromptState::Update(_) => PromptKind::Update,
        }
    }
}

/// Window host.
#[async_trait]
pub trait UiHost: Send + Sync {
    /// Shows the drag-select overlay on the primary display.
    /// `None` when the user cancels.
    async fn show_selection_overlay(&self) -> Option<CaptureBounds>;

    /// Shows `state` in its surface, or refreshes it if already visible.
    fn show_prompt_surface(&self, state: &PromptState);

    fn close_prompt_surface(&self, kind: PromptKind);

    /// Opens a URL or local path with the OS default handler.
    fn open_external(&self, target: &str) {
        log::info!("[APP] Open {}", target);
    }
}
