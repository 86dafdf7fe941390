//! Logger setup.
//!
//! `env_logger` to stderr, filter `info` unless `RUST_LOG` says otherwise.
//! Packaged runs also append to a log file users can be pointed at.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

/// Where packaged runs write their log:
///   macOS:   ~/Library/Application Support/send-to-crm/logs/main.log
///   Linux:   ~/.local/share/send-to-crm/logs/main.log
///   Windows: %LOCALAPPDATA%/send-to-crm/logs/main.log
pub fn log_file_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("send-to-crm")
        .join("logs")
        .join("main.log")
}

/// Initialises the global logger. Safe to call more than once.
pub fn init(packaged: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if packaged {
        match open_log_file() {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
            }
            Err(e) => eprintln!("send-to-crm: file logging disabled: {}", e),
        }
    }

    if builder.try_init().is_ok() && packaged {
        log::info!("[APP] Logging to {}", log_file_path().display());
    }
}

fn open_log_file() -> io::Result<File> {
    let path = log_file_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Writes each record to stderr and the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Losing the console copy must not lose the file copy.
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}
