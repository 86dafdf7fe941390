//! App runtime — the single event loop that owns every piece of mutable state.
//!
//! Hotkeys, console commands and finished background work all arrive as
//! [`AppEvent`]s. Network and capture work runs in spawned tasks that report
//! back through the same channel, so the update controller, session gate,
//! delivery coordinator and settings only ever change on this loop.

use crate::capture::{
    persist_if_enabled, screenshots_dir, CaptureError, CaptureResult, CaptureSession,
    DisplayGeometry, RegionCapturer, ScreenSource,
};
use crate::logging::log_file_path;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::delivery::DeliveryCoordinator;
use crate::host::{
    Notifier, PermissionStatus, PromptKind, PromptState, ScreenPermission, UiHost,
};
use crate::session::SessionGate;
use crate::settings::{SettingsError, SettingsStore};
use crate::update::{
    releases_page_url, CheckTrigger, Installer, UpdateError, UpdateHost,
    UpdateLifecycleController, UpdatePolicy, UpdatePromptView, UpdateRelease, UpdateSource,
    UpdateState,
};
use crate::upload::{HttpTransport, UploadClient, UploadOutcome, VerifyOutcome};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

const COUNTDOWN_TICK: std::time::Duration = std::time::Duration::from_secs(1);

/// Everything that can happen to the app.
#[derive(Debug)]
pub enum AppEvent {
    /// Global shortcut or tray "capture".
    CaptureRequested,
    /// The selection overlay closed and the crop (if any) finished.
    CaptureFinished(Result<CaptureResult, CaptureError>),
    UploadFinished(UploadOutcome),

    UpdateAvailable(UpdateRelease),
    UpdateNotAvailable,
    DownloadProgress(u8),
    UpdateDownloaded { version: String, installer: PathBuf },
    UpdateFailed(UpdateError),

    CheckForUpdates,
    SnoozeUpdate(u32),
    RestartNow,
    CancelRestart,

    /// A token pasted into the pairing prompt.
    Pair(String),
    PairingVerified { token: String, outcome: VerifyOutcome },
    QuotaPromptClosed,

    /// New capture shortcut, e.g. `Alt+Shift+S`.
    SetShortcut(String),
    ResetShortcut,
    SetStartOnLogin(bool),
    /// Tray "Open logs".
    OpenLogs,
    /// Tray "Open downloads page".
    OpenDownloads,
    Shutdown,
}

pub type EventSender = mpsc::UnboundedSender<AppEvent>;

pub fn event_channel() -> (EventSender, mpsc::UnboundedReceiver<AppEvent>) {
    mpsc::unbounded_channel()
}

/// External collaborators the app is wired with.
pub struct AppDeps {
    pub config: AppConfig,
    pub settings: Box<dyn SettingsStore>,
    pub clock: Box<dyn Clock>,
    pub ui: Arc<dyn UiHost>,
    pub notifier: Arc<dyn Notifier>,
    pub permission: Arc<dyn ScreenPermission>,
    pub screens: Arc<dyn ScreenSource>,
    pub transport: Arc<dyn HttpTransport>,
    pub update_source: Arc<dyn UpdateSource>,
    pub installer: Arc<dyn Installer>,
}

pub struct App {
    config: AppConfig,
    settings: Box<dyn SettingsStore>,
    updates: UpdateLifecycleController,
    gate: SessionGate,
    delivery: DeliveryCoordinator,
    capturer: Arc<RegionCapturer>,
    ui: Arc<dyn UiHost>,
    notifier: Arc<dyn Notifier>,
    permission: Arc<dyn ScreenPermission>,
    update_source: Arc<dyn UpdateSource>,
    installer: Arc<dyn Installer>,
    installer_path: Option<PathBuf>,
    events: EventSender,
    uploads_in_flight: usize,
    restarting: bool,
    shutdown: bool,
}

impl App {
    pub fn new(deps: AppDeps, events: EventSender) -> Self {
        let policy = UpdatePolicy {
            enabled: deps.config.packaged,
            ..UpdatePolicy::default()
        };
        let stored = deps.settings.settings();
        let updates = UpdateLifecycleController::new(
            policy,
            deps.clock,
            stored.last_update_check_at,
            stored.update_snoozed_until,
        );

        let uploader = UploadClient::new(
            deps.transport,
            deps.config.client_os.clone(),
            deps.config.client_version.clone(),
        );

        Self {
            capturer: Arc::new(RegionCapturer::new(deps.screens, deps.permission.clone())),
            delivery: DeliveryCoordinator::new(uploader, deps.ui.clone(), deps.notifier.clone()),
            config: deps.config,
            settings: deps.settings,
            updates,
            gate: SessionGate::new(),
            ui: deps.ui,
            notifier: deps.notifier,
            permission: deps.permission,
            update_source: deps.update_source,
            installer: deps.installer,
            installer_path: None,
            events,
            uploads_in_flight: 0,
            restarting: false,
            shutdown: false,
        }
    }

    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }

    pub fn update_state(&self) -> &UpdateState {
        self.updates.state()
    }

    /// `true` once an update install was launched and the app should exit.
    pub fn restarting(&self) -> bool {
        self.restarting
    }

    /// Runs until shutdown, or until an update install has been launched and
    /// every in-flight upload has reported its outcome.
    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<AppEvent>) {
        log::info!("[APP] Send to CRM {} ready", self.config.client_version);

        if self.settings.auth_token().is_none() {
            self.ui
                .show_prompt_surface(&PromptState::Pairing { reason: None });
        }

        self.request_check(CheckTrigger::Startup);

        let mut countdown: Option<Interval> = None;
        let mut background = self.updates.policy().enabled.then(|| {
            let every = self.updates.policy().background_interval;
            interval_at(Instant::now() + every, every)
        });

        loop {
            if let Some(trigger) = self.updates.take_queued_check() {
                self.request_check(trigger);
            }
            self.sync_countdown(&mut countdown);

            if self.shutdown || (self.restarting && self.uploads_in_flight == 0) {
                break;
            }

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = next_tick(&mut countdown) => self.tick(),
                _ = next_tick(&mut background) => {
                    self.request_check(CheckTrigger::Background);
                }
            }
        }

        log::info!("[APP] Event loop finished");
    }

    pub fn handle(&mut self, event: AppEvent) {
        match event {
            AppEvent::CaptureRequested => self.start_capture(),
            AppEvent::CaptureFinished(result) => self.finish_capture(result),
            AppEvent::UploadFinished(outcome) => {
                self.uploads_in_flight = self.uploads_in_flight.saturating_sub(1);
                self.delivery.handle_outcome(&outcome, self.settings.as_mut());
            }

            AppEvent::UpdateAvailable(release) => {
                self.drive(|updates, _, host| updates.on_update_available(&release.version, host));
            }
            AppEvent::UpdateNotAvailable => {
                self.drive(|updates, _, host| updates.on_update_not_available(host));
            }
            AppEvent::DownloadProgress(percent) => {
                self.drive(|updates, _, host| updates.on_download_progress(percent, host));
            }
            AppEvent::UpdateDownloaded { version, installer } => {
                self.installer_path = Some(installer);
                self.drive(|updates, _, host| updates.on_update_downloaded(&version, host));
            }
            AppEvent::UpdateFailed(error) => {
                self.drive(|updates, _, host| updates.on_error(&error, host));
            }

            AppEvent::CheckForUpdates => {
                if !self.request_check(CheckTrigger::Manual) {
                    self.notifier.notify(
                        "No update check",
                        "An update is already in progress or updates are disabled.",
                    );
                }
            }
            AppEvent::SnoozeUpdate(minutes) => {
                self.drive(|updates, _, host| updates.snooze(minutes, host));
            }
            AppEvent::RestartNow => {
                let restarted = self.drive(|updates, gate, host| updates.restart_now(gate, host));
                if !restarted {
                    log::info!("[APP] Restart not available in {:?}", self.updates.state());
                }
            }
            AppEvent::CancelRestart => {
                self.drive(|updates, _, host| updates.cancel_countdown(host));
            }

            AppEvent::Pair(token) => self.start_pairing(token),
            AppEvent::PairingVerified { token, outcome } => self.finish_pairing(token, outcome),
            AppEvent::QuotaPromptClosed => self.delivery.quota_prompt_closed(),

            AppEvent::SetShortcut(shortcut) => {
                let result = self.settings.set_shortcut(&shortcut);
                self.report_setting("Shortcut", result);
            }
            AppEvent::ResetShortcut => {
                let result = self.settings.reset_shortcut();
                self.report_setting("Shortcut", result);
            }
            AppEvent::SetStartOnLogin(enabled) => {
                let result = self.settings.set_start_on_login(enabled);
                self.report_setting("Start on login", result);
            }
            AppEvent::OpenLogs => {
                self.ui
                    .open_external(&log_file_path().to_string_lossy());
            }
            AppEvent::OpenDownloads => {
                self.ui
                    .open_external(&releases_page_url(&self.config.update_repo));
            }
            AppEvent::Shutdown => {
                log::info!("[APP] Shutdown requested");
                self.shutdown = true;
            }
        }
    }

    fn start_capture(&mut self) {
        if self.restarting {
            log::info!("[CAPTURE] Ignoring capture request — restarting to update");
            return;
        }
        if self.gate.is_open() {
            log::info!("[CAPTURE] Selection already in progress");
            return;
        }

        if self.permission.status() == PermissionStatus::Denied
            && self.permission.prompt() == PermissionStatus::Denied
        {
            log::warn!("[CAPTURE] Screen recording permission denied");
            self.notifier.notify(
                "Permission needed",
                "Allow screen recording for Send to CRM in your system settings, then try again.",
            );
            return;
        }

        let display: DisplayGeometry = match self.capturer.primary_display() {
            Ok(display) => display,
            Err(e) => {
                log::error!("[CAPTURE] {}", e);
                self.notifier
                    .notify("Capture failed", "Couldn't read the screen. Please try again.");
                return;
            }
        };

        self.gate.open();
        let (session, completer) = CaptureSession::new();

        let ui = self.ui.clone();
        let capturer = self.capturer.clone();
        tokio::spawn(async move {
            let result = match ui.show_selection_overlay().await {
                None => Err(CaptureError::Abandoned),
                Some(selection) => tokio::task::spawn_blocking(move || {
                    capturer.capture(&display.bounds, selection, display.scale_factor)
                })
                .await
                .unwrap_or_else(|e| Err(CaptureError::Backend(e.to_string()))),
            };
            completer.complete(result);
        });

        let events = self.events.clone();
        let finished = self.delivery.receive(session);
        tokio::spawn(async move {
            let _ = events.send(AppEvent::CaptureFinished(finished.await));
        });
    }

    fn finish_capture(&mut self, result: Result<CaptureResult, CaptureError>) {
        // May launch a deferred update install before we get to the upload.
        self.drive(|updates, gate, host| gate.close(updates, host));

        let capture = match result {
            Ok(capture) => capture,
            Err(CaptureError::Abandoned) => {
                log::info!("[CAPTURE] Selection cancelled");
                return;
            }
            Err(CaptureError::PermissionDenied) => {
                log::warn!("[CAPTURE] Screen recording permission denied");
                self.notifier.notify(
                    "Permission needed",
                    "Allow screen recording for Send to CRM in your system settings, then try again.",
                );
                return;
            }
            Err(e) => {
                log::error!("[CAPTURE] Capture failed: {}", e);
                self.notifier
                    .notify("Capture failed", "Couldn't capture that region. Please try again.");
                return;
            }
        };

        persist_if_enabled(
            self.config.save_screenshots_local,
            &screenshots_dir(),
            &capture.png_bytes,
            capture.captured_at.timestamp_millis(),
        );

        let api_base_url = match self
            .config
            .resolve_api_base_url(&self.settings.settings().api_base_url)
        {
            Ok(url) => url,
            Err(e) => {
                let outcome = UploadOutcome::misconfigured(&e);
                self.delivery.handle_outcome(&outcome, self.settings.as_mut());
                return;
            }
        };

        let token = self.settings.auth_token().map(str::to_string);
        let upload = self.delivery.upload_task(capture, token, api_base_url);
        let events = self.events.clone();
        self.uploads_in_flight += 1;
        tokio::spawn(async move {
            let _ = events.send(AppEvent::UploadFinished(upload.await));
        });
    }

    fn report_setting(&self, name: &str, result: Result<(), SettingsError>) {
        match result {
            Ok(()) => log::info!("[SETTINGS] {} updated", name),
            Err(e) => {
                log::error!("[SETTINGS] {} not saved: {}", name, e);
                self.notifier
                    .notify("Setting not saved", &format!("{}: {}", name, e));
            }
        }
    }

    fn start_pairing(&mut self, token: String) {
        let api_base_url = match self
            .config
            .resolve_api_base_url(&self.settings.settings().api_base_url)
        {
            Ok(url) => url,
            Err(e) => {
                log::error!("[APP] {}", e);
                self.ui.show_prompt_surface(&PromptState::Pairing {
                    reason: Some(e.to_string()),
                });
                return;
            }
        };

        let uploader = self.delivery.uploader().clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = uploader.verify(&token, &api_base_url).await;
            let _ = events.send(AppEvent::PairingVerified { token, outcome });
        });
    }

    fn finish_pairing(&mut self, token: String, outcome: VerifyOutcome) {
        if let Some(reason) = outcome.reason() {
            log::warn!("[APP] Pairing failed: {}", reason);
            self.ui.show_prompt_surface(&PromptState::Pairing {
                reason: Some(format!("Pairing failed ({})", reason)),
            });
            return;
        }

        match self.settings.set_auth_token(&token) {
            Ok(()) => {
                log::info!("[APP] Paired");
                self.ui.close_prompt_surface(PromptKind::Pairing);
                self.notifier
                    .notify("Paired", "Captures will now be sent to your CRM.");
            }
            Err(e) => {
                log::error!("[SETTINGS] Failed to store token: {}", e);
                self.ui.show_prompt_surface(&PromptState::Pairing {
                    reason: Some("Couldn't save the token. Please try again.".to_string()),
                });
            }
        }
    }

    /// One countdown tick; the run loop calls this every second while needed.
    pub fn tick(&mut self) {
        self.drive(|updates, gate, host| updates.tick(gate, host));
    }

    /// Starts a check (and the download that follows) if the controller allows it.
    fn request_check(&mut self, trigger: CheckTrigger) -> bool {
        if !self.drive(|updates, _, host| updates.begin_check(trigger, host)) {
            return false;
        }

        let source = self.update_source.clone();
        let events = self.events.clone();
        let current = self.config.client_version.clone();
        tokio::spawn(async move {
            let release = match source.check(&current).await {
                Ok(Some(release)) => release,
                Ok(None) => {
                    let _ = events.send(AppEvent::UpdateNotAvailable);
                    return;
                }
                Err(e) => {
                    let _ = events.send(AppEvent::UpdateFailed(e));
                    return;
                }
            };

            let _ = events.send(AppEvent::UpdateAvailable(release.clone()));

            let progress_events = events.clone();
            let progress = move |percent: u8| {
                let _ = progress_events.send(AppEvent::DownloadProgress(percent));
            };
            let event = match source.download(&release, &progress).await {
                Ok(installer) => AppEvent::UpdateDownloaded {
                    version: release.version.clone(),
                    installer,
                },
                Err(e) => AppEvent::UpdateFailed(e),
            };
            let _ = events.send(event);
        });
        true
    }

    /// The countdown interval only exists while the controller needs ticks.
    fn sync_countdown(&self, countdown: &mut Option<Interval>) {
        match (self.updates.needs_tick(), countdown.is_some()) {
            (true, false) => {
                let mut interval = interval_at(Instant::now() + COUNTDOWN_TICK, COUNTDOWN_TICK);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                *countdown = Some(interval);
            }
            (false, true) => *countdown = None,
            _ => {}
        }
    }

    /// Runs `f` against the controller with a host wired to this app, then
    /// applies the install result, if `f` triggered one.
    fn drive<R>(
        &mut self,
        f: impl FnOnce(&mut UpdateLifecycleController, &mut SessionGate, &mut dyn UpdateHost) -> R,
    ) -> R {
        let mut host = LoopHost {
            ui: self.ui.as_ref(),
            notifier: self.notifier.as_ref(),
            settings: self.settings.as_mut(),
            installer: self.installer.as_ref(),
            installer_path: self.installer_path.as_deref(),
            install_result: None,
        };
        let result = f(&mut self.updates, &mut self.gate, &mut host);
        let install_result = host.install_result.take();

        match install_result {
            Some(Ok(())) => {
                log::info!("[UPDATE] Installer launched — exiting once uploads finish");
                self.restarting = true;
            }
            Some(Err(e)) => {
                let mut host = LoopHost {
                    ui: self.ui.as_ref(),
                    notifier: self.notifier.as_ref(),
                    settings: self.settings.as_mut(),
                    installer: self.installer.as_ref(),
                    installer_path: self.installer_path.as_deref(),
                    install_result: None,
                };
                self.updates.on_error(&e, &mut host);
            }
            None => {}
        }
        result
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// [`UpdateHost`] backed by the app's collaborators.
struct LoopHost<'a> {
    ui: &'a dyn UiHost,
    notifier: &'a dyn Notifier,
    settings: &'a mut dyn SettingsStore,
    installer: &'a dyn Installer,
    installer_path: Option<&'a Path>,
    install_result: Option<Result<(), UpdateError>>,
}

impl UpdateHost for LoopHost<'_> {
    fn push_state(&mut self, view: &UpdatePromptView) {
        match view.state {
            UpdateState::Idle => self.ui.close_prompt_surface(PromptKind::Update),
            UpdateState::Checking
            | UpdateState::Available { .. }
            | UpdateState::Downloading { .. } => {
                log::debug!("[UPDATE] {}", view.headline);
            }
            _ => self
                .ui
                .show_prompt_surface(&PromptState::Update(view.clone())),
        }
    }

    fn notify(&mut self, title: &str, body: &str) {
        self.notifier.notify(title, body);
    }

    fn install_and_restart(&mut self, version: &str) {
        let result = match self.installer_path {
            Some(path) => {
                log::info!("[UPDATE] Installing {} from {}", version, path.display());
                self.installer.launch(path)
            }
            None => Err(UpdateError::InstallFailed(format!(
                "no downloaded installer for {}",
                version
            ))),
        };
        self.install_result = Some(result);
    }

    fn persist_schedule(
        &mut self,
        last_check_at: Option<DateTime<Utc>>,
        snoozed_until: Option<DateTime<Utc>>,
    ) {
        if let Err(e) = self.settings.record_update_schedule(last_check_at, snoozed_until) {
            log::error!("[SETTINGS] Failed to persist update schedule: {}", e);
        }
    }
}
