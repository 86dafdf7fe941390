//! Line-oriented host for headless runs.
//!
//! Reads commands from stdin and prints prompts and notifications to stdout.
//! The selection overlay becomes a `select X Y W H` line (or `cancel`).

use super::{Notifier, PromptKind, PromptState, UiHost};
use crate::capture::CaptureBounds;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

pub const HELP: &str = "\
commands:
  capture              start a capture (same as the global shortcut)
  select X Y W H       finish the selection (logical pixels)
  cancel               dismiss the selection overlay
  pair TOKEN           verify and store a pairing token
  check                check for updates now
  snooze MINUTES       postpone the update restart
  restart              restart to apply a downloaded update
  later                stop the restart countdown
  close-quota          dismiss the quota prompt
  shortcut KEYS        change the capture shortcut (e.g. Alt+Shift+S)
  shortcut reset       restore the default shortcut
  login on|off         start with the system login
  logs                 open the log file
  downloads            open the downloads page
  quit                 exit";

/// A parsed stdin line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Capture,
    Select(CaptureBounds),
    Cancel,
    Pair(String),
    CheckUpdates,
    Snooze(u32),
    Restart,
    Later,
    CloseQuota,
    Shortcut(String),
    ResetShortcut,
    StartOnLogin(bool),
    OpenLogs,
    OpenDownloads,
    Quit,
    Help,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    let number = |s: &str| {
        s.parse::<u32>()
            .map_err(|_| format!("'{}' is not a non-negative integer", s))
    };

    match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("capture", []) => Ok(ConsoleCommand::Capture),
        ("select", [x, y, w, h]) => Ok(ConsoleCommand::Select(CaptureBounds {
            x: number(x)?,
            y: number(y)?,
            width: number(w)?,
            height: number(h)?,
        })),
        ("cancel", []) => Ok(ConsoleCommand::Cancel),
        ("pair", [token]) => Ok(ConsoleCommand::Pair(token.to_string())),
        ("check", []) => Ok(ConsoleCommand::CheckUpdates),
        ("snooze", [minutes]) => number(minutes).map(ConsoleCommand::Snooze),
        ("restart", []) => Ok(ConsoleCommand::Restart),
        ("later", []) => Ok(ConsoleCommand::Later),
        ("close-quota", []) => Ok(ConsoleCommand::CloseQuota),
        ("shortcut", ["reset"]) => Ok(ConsoleCommand::ResetShortcut),
        ("shortcut", [keys]) => Ok(ConsoleCommand::Shortcut(keys.to_string())),
        ("login", [flag]) => match flag.to_ascii_lowercase().as_str() {
            "on" => Ok(ConsoleCommand::StartOnLogin(true)),
            "off" => Ok(ConsoleCommand::StartOnLogin(false)),
            _ => Err(format!("'{}' is not on or off", flag)),
        },
        ("logs", []) => Ok(ConsoleCommand::OpenLogs),
        ("downloads", []) => Ok(ConsoleCommand::OpenDownloads),
        ("quit" | "exit", []) => Ok(ConsoleCommand::Quit),
        ("help" | "?", _) => Ok(ConsoleCommand::Help),
        (other, _) => Err(format!("unknown or malformed command '{}'", other)),
    }
}

#[derive(Default)]
pub struct ConsoleHost {
    pending_selection: Mutex<Option<oneshot::Sender<Option<CaptureBounds>>>>,
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves an open selection overlay. Returns `false` if none is open.
    pub fn resolve_selection(&self, selection: Option<CaptureBounds>) -> bool {
        let pending = self
            .pending_selection
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        match pending {
            Some(tx) => tx.send(selection).is_ok(),
            None => false,
        }
    }

    /// Reads stdin until EOF. Selection lines are handled here; everything
    /// else goes to `forward`.
    pub async fn read_commands(&self, forward: impl Fn(ConsoleCommand)) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[APP] stdin read failed: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match parse_command(&line) {
                Ok(ConsoleCommand::Select(bounds)) => {
                    if !self.resolve_selection(Some(bounds)) {
                        println!("no selection in progress; type 'capture' first");
                    }
                }
                Ok(ConsoleCommand::Cancel) => {
                    if !self.resolve_selection(None) {
                        println!("no selection in progress");
                    }
                }
                Ok(ConsoleCommand::Help) => println!("{}", HELP),
                Ok(command) => forward(command),
                Err(e) => println!("{} (type 'help')", e),
            }
        }
        forward(ConsoleCommand::Quit);
    }
}

#[async_trait]
impl UiHost for ConsoleHost {
    async fn show_selection_overlay(&self) -> Option<CaptureBounds> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut slot) = self.pending_selection.lock() {
            // A stale overlay counts as cancelled.
            *slot = Some(tx);
        }
        println!("select a region: 'select X Y W H' or 'cancel'");
        rx.await.unwrap_or(None)
    }

    fn show_prompt_surface(&self, state: &PromptState) {
        match state {
            PromptState::Pairing { reason } => {
                println!("[pairing] paste your token with 'pair TOKEN'");
                if let Some(reason) = reason {
                    println!("[pairing] {}", reason);
                }
            }
            PromptState::Quota(info) => {
                let usage = match (info.current_count, info.quota_limit) {
                    (Some(count), Some(limit)) => format!(" ({}/{})", count, limit),
                    _ => String::new(),
                };
                println!("[quota] {}{}", info.user_message, usage);
                match &info.action.url {
                    Some(url) => println!("[quota] {}: {}", info.action.label, url),
                    None => println!("[quota] {}", info.action.label),
                }
            }
            PromptState::Update(view) => {
                // The countdown refreshes every second; only echo milestones.
                let milestone = view
                    .remaining_seconds
                    .map_or(true, |s| s % 30 == 0 || s <= 10);
                if milestone {
                    println!("[update] {}", view.headline);
                }
            }
        }
    }

    fn close_prompt_surface(&self, kind: PromptKind) {
        log::debug!("[APP] Closed {:?} prompt", kind);
    }

    fn open_external(&self, target: &str) {
        println!("open: {}", target);
    }
}

impl Notifier for ConsoleHost {
    fn notify(&self, title: &str, body: &str) {
        println!("* {}: {}", title, body);
    }
}
