//! Send to CRM — background screen-snip utility.
//!
//! Press the shortcut, drag a region, and the PNG lands in your CRM. Wires
//! together:
//! - Region capture (capture/)
//! - Capture upload with typed outcomes (upload/) and their effects (delivery.rs)
//! - Auto-update lifecycle with snooze and install countdown (update/)
//! - The capture session gate that holds restarts back (session.rs)
//! - The app event loop (app.rs)

pub mod app;
pub mod capture;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod host;
pub mod instance;
pub mod logging;
pub mod redact;
pub mod session;
pub mod settings;
pub mod update;
pub mod upload;

use app::{App, AppDeps, AppEvent};
use host::{AssumeGranted, ConsoleCommand, ConsoleHost};
use instance::{InstanceError, InstanceLock};
use settings::JsonSettingsStore;
use std::sync::Arc;
use update::{GithubReleaseSource, LaunchInstaller};
use upload::ReqwestTransport;

/// Entry point for the `send-to-crm` binary.
pub fn run() {
    let config = config::AppConfig::from_env();
    logging::init(config.packaged);
    if let Some(path) = &config.env_file {
        log::info!("[APP] Loaded environment from {}", path.display());
    }

    let _instance = match InstanceLock::acquire(&instance::lock_path()) {
        Ok(lock) => lock,
        Err(InstanceError::AlreadyRunning) => {
            log::info!("[APP] Another instance is running — exiting");
            std::process::exit(0);
        }
        Err(e) => {
            log::error!("[APP] {}", e);
            std::process::exit(1);
        }
    };

    let transport = match ReqwestTransport::new() {
        Ok(transport) => transport,
        Err(e) => {
            log::error!("[APP] Cannot create HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("[APP] Cannot start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let console = Arc::new(ConsoleHost::new());
    let deps = AppDeps {
        settings: Box::new(JsonSettingsStore::load(settings::settings_path())),
        clock: Box::new(clock::SystemClock),
        ui: console.clone(),
        notifier: console.clone(),
        permission: Arc::new(AssumeGranted),
        screens: capture::default_screen_source(),
        transport: Arc::new(transport),
        update_source: Arc::new(GithubReleaseSource::new(config.update_repo.clone())),
        installer: Arc::new(LaunchInstaller),
        config,
    };

    let restarting = runtime.block_on(async move {
        let (events, receiver) = app::event_channel();

        let forward = events.clone();
        let reader = console.clone();
        tokio::spawn(async move {
            reader
                .read_commands(move |command| {
                    if let Some(event) = console_event(command) {
                        let _ = forward.send(event);
                    }
                })
                .await;
        });

        let mut app = App::new(deps, events);
        app.run(receiver).await;
        app.restarting()
    });

    if restarting {
        log::info!("[APP] Exiting for update");
    }
    // Stdin reads block a runtime thread; don't wait for it on the way out.
    runtime.shutdown_background();
}

fn console_event(command: ConsoleCommand) -> Option<AppEvent> {
    let event = match command {
        ConsoleCommand::Capture => AppEvent::CaptureRequested,
        ConsoleCommand::Pair(token) => AppEvent::Pair(token),
        ConsoleCommand::CheckUpdates => AppEvent::CheckForUpdates,
        ConsoleCommand::Snooze(minutes) => AppEvent::SnoozeUpdate(minutes),
        ConsoleCommand::Restart => AppEvent::RestartNow,
        ConsoleCommand::Later => AppEvent::CancelRestart,
        ConsoleCommand::CloseQuota => AppEvent::QuotaPromptClosed,
        ConsoleCommand::Shortcut(keys) => AppEvent::SetShortcut(keys),
        ConsoleCommand::ResetShortcut => AppEvent::ResetShortcut,
        ConsoleCommand::StartOnLogin(enabled) => AppEvent::SetStartOnLogin(enabled),
        ConsoleCommand::OpenLogs => AppEvent::OpenLogs,
        ConsoleCommand::OpenDownloads => AppEvent::OpenDownloads,
        ConsoleCommand::Quit => AppEvent::Shutdown,
        // Handled by the console host itself.
        ConsoleCommand::Select(_) | ConsoleCommand::Cancel | ConsoleCommand::Help => return None,
    };
    Some(event)
}
