//! End-to-end tests of the app event loop with every collaborator faked.
//!
//! Events produced by spawned work are either consumed by `App::run` or
//! pumped by hand, so tests can step through a scenario deterministically.
//! Timer tests run `App::run` on paused tokio time with a clock that follows it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use image::{DynamicImage, RgbaImage};
use send_to_crm_lib::app::{event_channel, App, AppDeps, AppEvent};
use send_to_crm_lib::capture::{
    CaptureBounds, CaptureError, DisplayGeometry, ScreenSource, ScreenThumbnail,
};
use send_to_crm_lib::clock::{Clock, ManualClock};
use send_to_crm_lib::config::{AppConfig, DEFAULT_UPDATE_REPO};
use send_to_crm_lib::host::{AssumeGranted, Notifier, PromptKind, PromptState, UiHost};
use send_to_crm_lib::logging::log_file_path;
use send_to_crm_lib::settings::{default_shortcut, AppSettings, MemorySettingsStore};
use send_to_crm_lib::update::{
    releases_page_url, Installer, ReleaseAsset, UpdateError, UpdateRelease, UpdateSource,
    UpdateState,
};
use send_to_crm_lib::upload::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

const SELECTION: CaptureBounds = CaptureBounds {
    x: 10,
    y: 10,
    width: 40,
    height: 30,
};

#[derive(Default)]
struct Desk {
    release_overlay: Notify,
    notes: Mutex<Vec<String>>,
    prompts: Mutex<Vec<PromptState>>,
    closed: Mutex<Vec<PromptKind>>,
    opened: Mutex<Vec<String>>,
}

impl Desk {
    fn noted(&self, title: &str) -> bool {
        self.notes.lock().unwrap().iter().any(|n| n == title)
    }

    fn counting_down(&self) -> bool {
        self.prompts.lock().unwrap().iter().any(|p| {
            matches!(p, PromptState::Update(view) if matches!(view.state, UpdateState::CountingDown { .. }))
        })
    }
}

#[async_trait]
impl UiHost for Desk {
    async fn show_selection_overlay(&self) -> Option<CaptureBounds> {
        self.release_overlay.notified().await;
        Some(SELECTION)
    }
    fn show_prompt_surface(&self, state: &PromptState) {
        self.prompts.lock().unwrap().push(state.clone());
    }
    fn close_prompt_surface(&self, kind: PromptKind) {
        self.closed.lock().unwrap().push(kind);
    }
    fn open_external(&self, target: &str) {
        self.opened.lock().unwrap().push(target.to_string());
    }
}

impl Notifier for Desk {
    fn notify(&self, title: &str, _body: &str) {
        self.notes.lock().unwrap().push(title.to_string());
    }
}

struct Screens;

impl ScreenSource for Screens {
    fn primary_display(&self) -> Result<DisplayGeometry, CaptureError> {
        Ok(DisplayGeometry {
            bounds: CaptureBounds {
                x: 0,
                y: 0,
                width: 160,
                height: 100,
            },
            scale_factor: 2.0,
        })
    }

    fn screens(&self, size: (u32, u32)) -> Result<Vec<ScreenThumbnail>, CaptureError> {
        Ok(vec![ScreenThumbnail {
            name: "Entire screen".into(),
            is_primary: true,
            image: DynamicImage::ImageRgba8(RgbaImage::new(size.0, size.1)),
        }])
    }
}

#[derive(Default)]
struct Api {
    requests: Mutex<Vec<HttpRequest>>,
}

#[async_trait]
impl HttpTransport for Api {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        Ok(HttpResponse {
            status: 200,
            body: r#"{"ok":true}"#.into(),
        })
    }
}

/// Offers a release from the `first_offer`-th check (zero-based) on.
struct Releases {
    first_offer: usize,
    checks: AtomicUsize,
}

impl Releases {
    fn offering_from(first_offer: usize) -> Self {
        Self {
            first_offer,
            checks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl UpdateSource for Releases {
    async fn check(&self, _current: &str) -> Result<Option<UpdateRelease>, UpdateError> {
        if self.checks.fetch_add(1, Ordering::SeqCst) < self.first_offer {
            return Ok(None);
        }
        Ok(Some(UpdateRelease {
            version: "9.9.9".into(),
            asset: ReleaseAsset {
                name: "Send-to-CRM-9.9.9.AppImage".into(),
                url: "https://example.test/Send-to-CRM-9.9.9.AppImage".into(),
                size: 1,
            },
        }))
    }

    async fn download(
        &self,
        release: &UpdateRelease,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<PathBuf, UpdateError> {
        progress(100);
        Ok(PathBuf::from("/tmp").join(&release.asset.name))
    }
}

#[derive(Default)]
struct Launches {
    paths: Mutex<Vec<PathBuf>>,
}

impl Installer for Launches {
    fn launch(&self, installer: &Path) -> Result<(), UpdateError> {
        self.paths.lock().unwrap().push(installer.to_path_buf());
        Ok(())
    }
}

/// Wall clock that follows tokio's (possibly paused) time.
struct TokioClock {
    origin: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    fn new() -> Self {
        Self {
            origin: Utc::now(),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.origin + Duration::from_std(self.start.elapsed()).unwrap()
    }
}

struct Rig {
    desk: Arc<Desk>,
    api: Arc<Api>,
    releases: Arc<Releases>,
    launches: Arc<Launches>,
    clock: ManualClock,
    app: App,
    events: mpsc::UnboundedSender<AppEvent>,
    receiver: mpsc::UnboundedReceiver<AppEvent>,
}

impl Rig {
    fn new(packaged: bool, token: &str) -> Self {
        Self::with_settings(
            packaged,
            AppSettings {
                auth_token: token.into(),
                ..AppSettings::default()
            },
        )
    }

    fn with_settings(packaged: bool, settings: AppSettings) -> Self {
        let clock = ManualClock::new(Utc::now());
        Self::build(packaged, settings, Box::new(clock.clone()), clock, Releases::offering_from(0))
    }

    /// A packaged app whose controller reads tokio time.
    fn on_tokio_time(releases: Releases) -> Self {
        let settings = AppSettings {
            auth_token: "tok".into(),
            ..AppSettings::default()
        };
        let unused = ManualClock::new(Utc::now());
        Self::build(true, settings, Box::new(TokioClock::new()), unused, releases)
    }

    fn build(
        packaged: bool,
        settings: AppSettings,
        app_clock: Box<dyn Clock>,
        clock: ManualClock,
        releases: Releases,
    ) -> Self {
        let desk = Arc::new(Desk::default());
        let api = Arc::new(Api::default());
        let releases = Arc::new(releases);
        let launches = Arc::new(Launches::default());
        let (events, receiver) = event_channel();

        let deps = AppDeps {
            config: AppConfig {
                packaged,
                ..AppConfig::default()
            },
            settings: Box::new(MemorySettingsStore::new(settings)),
            clock: app_clock,
            ui: desk.clone(),
            notifier: desk.clone(),
            permission: Arc::new(AssumeGranted),
            screens: Arc::new(Screens),
            transport: api.clone(),
            update_source: releases.clone(),
            installer: launches.clone(),
        };

        Self {
            desk,
            api,
            releases,
            launches,
            clock,
            app: App::new(deps, events.clone()),
            events,
            receiver,
        }
    }

    /// Feeds spawned-task events back into the app until `done` holds.
    async fn pump_until(&mut self, done: impl Fn(&AppEvent) -> bool) {
        loop {
            let event = tokio::time::timeout(std::time::Duration::from_secs(5), self.receiver.recv())
                .await
                .expect("timed out waiting for an app event")
                .expect("event channel closed");
            let stop = done(&event);
            self.app.handle(event);
            if stop {
                return;
            }
        }
    }
}

// ── Capture ─────────────────────────────────────────────────────────

#[tokio::test]
async fn capture_is_uploaded_and_confirmed() {
    let Rig {
        desk,
        api,
        mut app,
        events,
        receiver,
        ..
    } = Rig::new(false, "tok");

    desk.release_overlay.notify_one();
    events.send(AppEvent::CaptureRequested).unwrap();

    let watcher = async {
        while !desk.noted("Capture sent") {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        events.send(AppEvent::Shutdown).unwrap();
    };

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        tokio::join!(app.run(receiver), watcher)
    })
    .await
    .expect("app did not finish");

    let requests = api.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].url.ends_with("/screenshot-capture"));
    assert_eq!(app.update_state(), &UpdateState::Idle);
}

#[tokio::test]
async fn unpaired_capture_shows_pairing_without_uploading() {
    let mut rig = Rig::new(false, "");
    rig.desk.release_overlay.notify_one();

    rig.app.handle(AppEvent::CaptureRequested);
    rig.pump_until(|e| matches!(e, AppEvent::CaptureFinished(_))).await;
    rig.pump_until(|e| matches!(e, AppEvent::UploadFinished(_))).await;

    assert!(rig.api.requests.lock().unwrap().is_empty());
    assert!(rig.desk.notes.lock().unwrap().is_empty());
    assert_eq!(
        rig.desk.prompts.lock().unwrap().last(),
        Some(&PromptState::Pairing { reason: None })
    );
}

#[tokio::test]
async fn bad_api_url_fails_without_touching_the_network() {
    let mut rig = Rig::with_settings(
        false,
        AppSettings {
            auth_token: "tok".into(),
            api_base_url: "http://crm.example.com/api".into(),
            ..AppSettings::default()
        },
    );
    rig.desk.release_overlay.notify_one();

    rig.app.handle(AppEvent::CaptureRequested);
    rig.pump_until(|e| matches!(e, AppEvent::CaptureFinished(Ok(_)))).await;

    assert!(rig.api.requests.lock().unwrap().is_empty());
    assert!(rig.desk.noted("Capture not sent"));
}

// ── Pairing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn verified_token_is_stored() {
    let mut rig = Rig::new(false, "");

    rig.app.handle(AppEvent::Pair("  fresh-token ".into()));
    rig.pump_until(|e| matches!(e, AppEvent::PairingVerified { .. })).await;

    assert_eq!(rig.app.settings().auth_token(), Some("fresh-token"));
    assert_eq!(*rig.desk.closed.lock().unwrap(), vec![PromptKind::Pairing]);
    assert!(rig.desk.noted("Paired"));
}

// ── Update during a capture ─────────────────────────────────────────

#[tokio::test]
async fn expiring_countdown_waits_for_the_open_capture() {
    let mut rig = Rig::new(true, "tok");

    rig.app.handle(AppEvent::CheckForUpdates);
    rig.pump_until(|e| matches!(e, AppEvent::UpdateDownloaded { .. })).await;
    assert!(matches!(rig.app.update_state(), UpdateState::CountingDown { .. }));

    // The overlay stays up until released below.
    rig.app.handle(AppEvent::CaptureRequested);
    rig.clock.advance(Duration::minutes(5));
    rig.app.tick();

    assert!(matches!(rig.app.update_state(), UpdateState::Deferred { .. }));
    assert!(rig.launches.paths.lock().unwrap().is_empty());

    rig.desk.release_overlay.notify_one();
    rig.pump_until(|e| matches!(e, AppEvent::CaptureFinished(_))).await;

    // Closing the session launched the installer right away.
    assert_eq!(
        *rig.launches.paths.lock().unwrap(),
        vec![PathBuf::from("/tmp/Send-to-CRM-9.9.9.AppImage")]
    );
    assert!(rig.app.restarting());

    // The capture taken in that session is still delivered.
    rig.pump_until(|e| matches!(e, AppEvent::UploadFinished(_))).await;
    assert_eq!(rig.api.requests.lock().unwrap().len(), 1);
    assert!(rig.desk.noted("Capture sent"));
}

// ── Settings and tray actions ───────────────────────────────────────

#[tokio::test]
async fn settings_events_are_persisted() {
    let mut rig = Rig::new(false, "tok");

    rig.app.handle(AppEvent::SetShortcut(" Alt+Shift+S ".into()));
    assert_eq!(rig.app.settings().settings().shortcut, "Alt+Shift+S");

    rig.app.handle(AppEvent::SetShortcut("  ".into()));
    assert_eq!(rig.app.settings().settings().shortcut, "Alt+Shift+S");
    assert!(rig.desk.noted("Setting not saved"));

    rig.app.handle(AppEvent::ResetShortcut);
    assert_eq!(rig.app.settings().settings().shortcut, default_shortcut());

    rig.app.handle(AppEvent::SetStartOnLogin(false));
    let settings = rig.app.settings().settings();
    assert!(!settings.start_on_login);
    assert!(settings.start_on_login_user_set);
}

#[tokio::test]
async fn tray_links_open_logs_and_downloads() {
    let mut rig = Rig::new(false, "tok");

    rig.app.handle(AppEvent::OpenLogs);
    rig.app.handle(AppEvent::OpenDownloads);

    assert_eq!(
        *rig.desk.opened.lock().unwrap(),
        vec![
            log_file_path().to_string_lossy().into_owned(),
            releases_page_url(DEFAULT_UPDATE_REPO),
        ]
    );
}

// ── Timers ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn run_loop_counts_down_and_installs() {
    let Rig {
        launches,
        mut app,
        receiver,
        ..
    } = Rig::on_tokio_time(Releases::offering_from(0));
    let start = tokio::time::Instant::now();

    // Exits by itself once the installer has launched.
    tokio::time::timeout(std::time::Duration::from_secs(600), app.run(receiver))
        .await
        .expect("countdown never fired");

    let waited = start.elapsed().as_secs();
    assert!((300..=302).contains(&waited), "installed after {}s", waited);
    assert_eq!(launches.paths.lock().unwrap().len(), 1);
    assert!(app.restarting());
}

#[tokio::test(start_paused = true)]
async fn background_check_runs_daily_and_feeds_the_countdown() {
    let Rig {
        releases,
        launches,
        mut app,
        receiver,
        ..
    } = Rig::on_tokio_time(Releases::offering_from(1));
    let start = tokio::time::Instant::now();

    tokio::time::timeout(std::time::Duration::from_secs(25 * 3600), app.run(receiver))
        .await
        .expect("background check never fired");

    // Startup found nothing; the 24 h check found the release, then the
    // countdown ran its five minutes.
    let waited = start.elapsed().as_secs();
    assert!(
        (24 * 3600 + 300..=24 * 3600 + 302).contains(&waited),
        "installed after {}s",
        waited
    );
    assert_eq!(releases.checks.load(Ordering::SeqCst), 2);
    assert_eq!(launches.paths.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_countdown_stops_ticking() {
    let Rig {
        desk,
        launches,
        mut app,
        events,
        receiver,
        ..
    } = Rig::on_tokio_time(Releases::offering_from(0));

    let user = async {
        while !desk.counting_down() {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        events.send(AppEvent::CancelRestart).unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        events.send(AppEvent::Shutdown).unwrap();
    };

    tokio::time::timeout(std::time::Duration::from_secs(3600), async {
        tokio::join!(app.run(receiver), user)
    })
    .await
    .expect("app did not finish");

    assert!(launches.paths.lock().unwrap().is_empty());
    assert!(matches!(app.update_state(), UpdateState::Downloaded { .. }));
}
