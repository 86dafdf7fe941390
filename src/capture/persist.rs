//! Opt-in local copies of captured screenshots.
//!
//! Disabled unless `SAVE_SCREENSHOTS_LOCAL=1`. Files go to the user's
//! pictures directory, never next to the executable.

use std::path::{Path, PathBuf};

/// Directory local copies are written to.
pub fn screenshots_dir() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Send to CRM")
}

/// Writes `png_bytes` to `dir` when `enabled`, returning the file path.
///
/// Failures are logged and swallowed: a missing local copy never fails a capture.
pub fn persist_if_enabled(
    enabled: bool,
    dir: &Path,
    png_bytes: &[u8],
    captured_at_ms: i64,
) -> Option<PathBuf> {
    if !enabled {
        return None;
    }

    let path = dir.join(format!("screenshot_{}.png", captured_at_ms));
    let written = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, png_bytes));

    match written {
        Ok(()) => {
            log::info!("[CAPTURE] Saved local copy to {}", path.display());
            Some(path)
        }
        Err(e) => {
            log::warn!("[CAPTURE] Failed to save local copy: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(persist_if_enabled(false, dir.path(), b"png", 1).is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn enabled_writes_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Send to CRM");
        let path = persist_if_enabled(true, &nested, b"png", 1_700_000_000_000).unwrap();
        assert!(path.ends_with("screenshot_1700000000000.png"));
        assert_eq!(std::fs::read(path).unwrap(), b"png");
    }

    #[test]
    fn screenshots_dir_is_branded() {
        assert!(screenshots_dir().ends_with("Send to CRM"));
    }
}
