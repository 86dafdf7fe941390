//! Auto-update lifecycle — check scheduling, snooze, and the install countdown.
//!
//! [`UpdateLifecycleController`] is a synchronous state machine. It never does
//! I/O itself: the app loop feeds it source events and timer ticks, and it
//! reports back through an [`UpdateHost`] (prompt push, notifications,
//! persistence, install). All transitions happen on the app loop, so there is
//! exactly one writer.

pub mod deadline;
mod source;

pub use source::{
    is_newer_version, pick_asset, releases_page_url, GithubReleaseSource, Installer,
    LaunchInstaller, ReleaseAsset, UpdateRelease, UpdateSource,
};

use crate::clock::Clock;
use crate::session::SessionGate;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Where the update subsystem currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UpdateState {
    Idle,
    Checking,
    Available { version: String },
    Downloading { version: String, percent: u8 },
    Downloaded { version: String },
    Snoozed { version: String, until: DateTime<Utc> },
    CountingDown { version: String, ends_at: DateTime<Utc> },
    Deferred { version: String },
    Installing { version: String },
}

impl UpdateState {
    /// Version of the update this state is about, if any.
    pub fn version(&self) -> Option<&str> {
        match self {
            UpdateState::Idle | UpdateState::Checking => None,
            UpdateState::Available { version }
            | UpdateState::Downloading { version, .. }
            | UpdateState::Downloaded { version }
            | UpdateState::Snoozed { version, .. }
            | UpdateState::CountingDown { version, .. }
            | UpdateState::Deferred { version }
            | UpdateState::Installing { version } => Some(version),
        }
    }

    /// States where a downloaded update is waiting on the user.
    fn holds_download(&self) -> bool {
        matches!(
            self,
            UpdateState::Downloaded { .. }
                | UpdateState::CountingDown { .. }
                | UpdateState::Snoozed { .. }
                | UpdateState::Deferred { .. }
        )
    }
}

/// Timing knobs for the lifecycle.
#[derive(Debug, Clone)]
pub struct UpdatePolicy {
    /// Disabled entirely for unpackaged/dev runs.
    pub enabled: bool,
    pub min_check_gap: Duration,
    pub install_delay: Duration,
    pub background_interval: std::time::Duration,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_check_gap: Duration::minutes(30),
            install_delay: Duration::minutes(5),
            background_interval: std::time::Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// What asked for an update check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckTrigger {
    Startup,
    Background,
    /// Queued by the controller when a snooze runs out.
    SnoozeExpired,
    /// "Check now" from the user: ignores both snooze and the min gap.
    Manual,
}

impl CheckTrigger {
    fn ignores_gap(self) -> bool {
        matches!(self, CheckTrigger::Manual | CheckTrigger::SnoozeExpired)
    }

    fn ignores_snooze(self) -> bool {
        matches!(self, CheckTrigger::Manual)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateError {
    #[error("Update check failed: {0}")]
    CheckFailed(String),

    #[error("Update download failed: {0}")]
    DownloadFailed(String),

    #[error("Update install failed: {0}")]
    InstallFailed(String),
}

/// Everything a prompt surface or tray needs to render the update state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePromptView {
    pub state: UpdateState,
    pub headline: String,
    pub remaining_seconds: Option<i64>,
    pub can_snooze: bool,
    pub restart_enabled: bool,
    pub restart_label: String,
}

/// Effects the controller asks of its surroundings.
pub trait UpdateHost {
    /// Pushes the current state to any listening prompt surface.
    fn push_state(&mut self, view: &UpdatePromptView);

    /// Best-effort user notification.
    fn notify(&mut self, title: &str, body: &str);

    /// Installs the downloaded `version` and restarts the app.
    fn install_and_restart(&mut self, version: &str);

    /// Persists the schedule timestamps to settings.
    fn persist_schedule(
        &mut self,
        last_check_at: Option<DateTime<Utc>>,
        snoozed_until: Option<DateTime<Utc>>,
    );
}

pub struct UpdateLifecycleController {
    state: UpdateState,
    policy: UpdatePolicy,
    clock: Box<dyn Clock>,
    last_check_at: Option<DateTime<Utc>>,
    snoozed_until: Option<DateTime<Utc>>,
    queued_check: Option<CheckTrigger>,
}

impl UpdateLifecycleController {
    /// Creates an idle controller, restoring the persisted schedule.
    pub fn new(
        policy: UpdatePolicy,
        clock: Box<dyn Clock>,
        last_check_at: Option<DateTime<Utc>>,
        snoozed_until: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            state: UpdateState::Idle,
            policy,
            clock,
            last_check_at,
            snoozed_until,
            queued_check: None,
        }
    }

    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    pub fn policy(&self) -> &UpdatePolicy {
        &self.policy
    }

    pub fn last_check_at(&self) -> Option<DateTime<Utc>> {
        self.last_check_at
    }

    pub fn snoozed_until(&self) -> Option<DateTime<Utc>> {
        self.snoozed_until
    }

    /// `true` while the one-second tick has work to do.
    pub fn needs_tick(&self) -> bool {
        matches!(
            self.state,
            UpdateState::CountingDown { .. } | UpdateState::Snoozed { .. }
        )
    }

    /// Returns (and clears) a check the controller queued for itself.
    pub fn take_queued_check(&mut self) -> Option<CheckTrigger> {
        self.queued_check.take()
    }

    /// Whether a check with `trigger` would start right now.
    pub fn can_check(&self, trigger: CheckTrigger) -> bool {
        if !self.policy.enabled {
            return false;
        }
        let now = self.clock.now();
        match self.state {
            UpdateState::Idle => {
                trigger.ignores_gap()
                    || deadline::check_gap_elapsed(self.last_check_at, now, self.policy.min_check_gap)
            }
            UpdateState::Snoozed { .. } => trigger.ignores_snooze(),
            _ => false,
        }
    }

    /// Enters `Checking` if allowed. The caller then runs the source check.
    pub fn begin_check(&mut self, trigger: CheckTrigger, host: &mut dyn UpdateHost) -> bool {
        if !self.can_check(trigger) {
            log::info!(
                "[UPDATE] Skipping {:?} check in state {:?}",
                trigger,
                self.state
            );
            return false;
        }

        log::info!("[UPDATE] Checking for updates ({:?})", trigger);
        self.last_check_at = Some(self.clock.now());
        self.state = UpdateState::Checking;
        host.persist_schedule(self.last_check_at, self.snoozed_until);
        self.push(host);
        true
    }

    /// The check found `version`; downloading starts immediately.
    pub fn on_update_available(&mut self, version: &str, host: &mut dyn UpdateHost) {
        if self.state != UpdateState::Checking {
            log::warn!("[UPDATE] Ignoring stale 'available' in {:?}", self.state);
            return;
        }

        log::info!("[UPDATE] Update available: {}", version);
        self.state = UpdateState::Available {
            version: version.to_string(),
        };
        self.push(host);
        host.notify("Update available", &format!("Downloading version {}", version));

        self.state = UpdateState::Downloading {
            version: version.to_string(),
            percent: 0,
        };
        self.push(host);
    }

    pub fn on_update_not_available(&mut self, host: &mut dyn UpdateHost) {
        if self.state == UpdateState::Checking {
            log::info!("[UPDATE] No updates available");
            self.state = UpdateState::Idle;
            self.push(host);
        }
    }

    /// Updates the download percentage without changing state.
    pub fn on_download_progress(&mut self, progress: u8, host: &mut dyn UpdateHost) {
        if let UpdateState::Downloading { percent, .. } = &mut self.state {
            *percent = progress.min(100);
            self.push(host);
        }
    }

    /// Download finished: start the install countdown, unless a snooze from a
    /// previous cycle is still running.
    pub fn on_update_downloaded(&mut self, version: &str, host: &mut dyn UpdateHost) {
        if !matches!(
            self.state,
            UpdateState::Checking | UpdateState::Available { .. } | UpdateState::Downloading { .. }
        ) {
            log::warn!("[UPDATE] Ignoring stale 'downloaded' in {:?}", self.state);
            return;
        }

        log::info!("[UPDATE] Update downloaded; ready to install {}", version);
        let version = version.to_string();
        self.state = UpdateState::Downloaded {
            version: version.clone(),
        };
        host.notify(
            "Update ready",
            &format!("Version {} is ready. Restart to apply.", version),
        );

        let now = self.clock.now();
        match self.snoozed_until {
            Some(until) if !deadline::has_elapsed(until, now) => {
                self.state = UpdateState::Snoozed { version, until };
            }
            _ => {
                self.snoozed_until = None;
                host.persist_schedule(self.last_check_at, None);
                self.state = UpdateState::CountingDown {
                    version,
                    ends_at: now + self.policy.install_delay,
                };
            }
        }
        self.push(host);
    }

    /// Postpones the restart by `minutes`, cancelling any running countdown.
    pub fn snooze(&mut self, minutes: u32, host: &mut dyn UpdateHost) -> bool {
        if !self.state.holds_download() {
            return false;
        }
        let Some(version) = self.state.version().map(str::to_string) else {
            return false;
        };

        let until = self.clock.now() + Duration::minutes(i64::from(minutes));
        log::info!("[UPDATE] Restart snoozed for {} minutes", minutes);

        self.snoozed_until = Some(until);
        self.state = UpdateState::Snoozed { version, until };
        host.persist_schedule(self.last_check_at, self.snoozed_until);
        self.push(host);
        true
    }

    /// Stops the countdown; the update stays ready for a manual restart.
    pub fn cancel_countdown(&mut self, host: &mut dyn UpdateHost) -> bool {
        let UpdateState::CountingDown { version, .. } = &self.state else {
            return false;
        };
        let version = version.clone();

        log::info!("[UPDATE] Restart countdown cancelled");
        self.state = UpdateState::Downloaded { version };
        self.push(host);
        true
    }

    /// "Restart now" from the tray or prompt. Refused while a capture is open;
    /// only an expiring countdown may defer.
    pub fn restart_now(&mut self, gate: &SessionGate, host: &mut dyn UpdateHost) -> bool {
        if !matches!(
            self.state,
            UpdateState::Downloaded { .. }
                | UpdateState::CountingDown { .. }
                | UpdateState::Snoozed { .. }
        ) {
            return false;
        }
        if gate.is_open() {
            log::info!("[UPDATE] Restart requested during a capture — ignoring");
            return false;
        }
        let Some(version) = self.state.version().map(str::to_string) else {
            return false;
        };
        self.install(version, host);
        true
    }

    /// One-second tick: recomputes the countdown and handles expiry.
    pub fn tick(&mut self, gate: &SessionGate, host: &mut dyn UpdateHost) {
        let now = self.clock.now();
        match &self.state {
            UpdateState::CountingDown { ends_at, .. } => {
                if deadline::remaining_seconds(*ends_at, now) > 0 {
                    self.push(host);
                } else {
                    self.install_or_defer(gate, host);
                }
            }
            UpdateState::Snoozed { until, .. } if deadline::has_elapsed(*until, now) => {
                log::info!("[UPDATE] Snooze expired — re-checking");
                self.snoozed_until = None;
                self.state = UpdateState::Idle;
                self.queued_check = Some(CheckTrigger::SnoozeExpired);
                host.persist_schedule(self.last_check_at, None);
                self.push(host);
            }
            _ => {}
        }
    }

    /// The capture session closed: a deferred install runs now.
    pub fn on_session_closed(&mut self, host: &mut dyn UpdateHost) -> bool {
        match &self.state {
            UpdateState::Deferred { version } => {
                let version = version.clone();
                log::info!("[UPDATE] Capture finished — installing deferred update");
                self.install(version, host);
                true
            }
            _ => false,
        }
    }

    /// A check or download failed. Recoverable: back to `Idle`.
    pub fn on_error(&mut self, error: &UpdateError, host: &mut dyn UpdateHost) {
        log::error!("[UPDATE] Auto-update error: {}", error);
        self.state = UpdateState::Idle;
        host.notify("Update error", &format!("Update failed: {}", error));
        self.push(host);
    }

    /// Renders the current state for the prompt and tray.
    pub fn prompt_view(&self) -> UpdatePromptView {
        let now = self.clock.now();
        let version = self.state.version();

        let (headline, remaining_seconds) = match &self.state {
            UpdateState::Idle => ("Send to CRM is up to date".to_string(), None),
            UpdateState::Checking => ("Checking for updates…".to_string(), None),
            UpdateState::Available { version } => (format!("Update {} available", version), None),
            UpdateState::Downloading { version, percent } => {
                (format!("Downloading {} ({}%)", version, percent), None)
            }
            UpdateState::Downloaded { version } => (
                format!("Version {} is ready. Restart to apply.", version),
                None,
            ),
            UpdateState::Snoozed { until, .. } => (
                format!("Restart postponed until {}", until.format("%H:%M UTC")),
                None,
            ),
            UpdateState::CountingDown { ends_at, .. } => {
                let remaining = deadline::remaining_seconds(*ends_at, now).max(0);
                (
                    format!(
                        "Restarting to update in {}",
                        deadline::format_countdown(remaining)
                    ),
                    Some(remaining),
                )
            }
            UpdateState::Deferred { .. } => (
                "Will restart once your capture is finished".to_string(),
                None,
            ),
            UpdateState::Installing { version } => (format!("Installing {}…", version), None),
        };

        let restart_label = match version {
            Some(v) => format!("Restart to update ({})", v),
            None => "Restart to apply update".to_string(),
        };

        UpdatePromptView {
            state: self.state.clone(),
            headline,
            remaining_seconds,
            can_snooze: self.state.holds_download(),
            restart_enabled: matches!(
                self.state,
                UpdateState::Downloaded { .. }
                    | UpdateState::CountingDown { .. }
                    | UpdateState::Snoozed { .. }
            ),
            restart_label,
        }
    }

    fn install_or_defer(&mut self, gate: &SessionGate, host: &mut dyn UpdateHost) {
        let Some(version) = self.state.version().map(str::to_string) else {
            return;
        };

        if gate.is_open() {
            log::info!("[UPDATE] Capture in progress — deferring restart");
            self.state = UpdateState::Deferred { version };
            host.notify(
                "Restart postponed",
                "Send to CRM will restart to update once your capture is finished.",
            );
            self.push(host);
        } else {
            self.install(version, host);
        }
    }

    fn install(&mut self, version: String, host: &mut dyn UpdateHost) {
        if matches!(self.state, UpdateState::Installing { .. }) {
            return;
        }

        self.state = UpdateState::Installing {
            version: version.clone(),
        };
        self.snoozed_until = None;
        host.persist_schedule(self.last_check_at, None);
        self.push(host);
        host.install_and_restart(&version);
    }

    fn push(&self, host: &mut dyn UpdateHost) {
        host.push_state(&self.prompt_view());
    }
}
