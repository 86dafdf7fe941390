//! Release feed and installer — the I/O side of auto-update.
//!
//! Releases come from GitHub's "latest release" endpoint. Installers are
//! downloaded to the platform cache directory:
//!   macOS:   ~/Library/Caches/send-to-crm/updates/
//!   Linux:   ~/.cache/send-to-crm/updates/
//!   Windows: %LOCALAPPDATA%/send-to-crm/updates/

use super::UpdateError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CHECK_TIMEOUT: Duration = Duration::from_secs(20);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(12);
/// Longest wait for response headers or for the next body chunk.
pub const DOWNLOAD_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// A newer release and the installer asset for this platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRelease {
    pub version: String,
    pub asset: ReleaseAsset,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

/// Where updates come from.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Returns a release newer than `current_version`, if any.
    async fn check(&self, current_version: &str) -> Result<Option<UpdateRelease>, UpdateError>;

    /// Downloads the release installer, reporting percent progress.
    async fn download(
        &self,
        release: &UpdateRelease,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<PathBuf, UpdateError>;
}

/// Runs a downloaded installer.
pub trait Installer: Send + Sync {
    fn launch(&self, installer: &Path) -> Result<(), UpdateError>;
}

/// Public downloads page for a release feed.
pub fn releases_page_url(repo: &str) -> String {
    format!("https://github.com/{}/releases/latest", repo)
}

/// Compares dotted numeric versions; a leading `v` and any `-suffix` are ignored.
pub fn is_newer_version(candidate: &str, current: &str) -> bool {
    fn parts(version: &str) -> Vec<u64> {
        version
            .trim()
            .trim_start_matches(['v', 'V'])
            .split(['-', '+'])
            .next()
            .unwrap_or("")
            .split('.')
            .map(|p| p.parse().unwrap_or(0))
            .collect()
    }

    let (a, b) = (parts(candidate), parts(current));
    let len = a.len().max(b.len());
    for i in 0..len {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        if x != y {
            return x > y;
        }
    }
    false
}

/// Installer file extensions for the current platform, in preference order.
fn platform_extensions() -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        &[".exe", ".msi"]
    } else if cfg!(target_os = "macos") {
        &[".dmg", ".zip"]
    } else {
        &[".AppImage", ".deb"]
    }
}

/// Picks the installer asset for this platform.
pub fn pick_asset(assets: &[ReleaseAsset]) -> Option<&ReleaseAsset> {
    platform_extensions().iter().find_map(|ext| {
        assets
            .iter()
            .find(|a| a.name.ends_with(ext) && !a.name.ends_with(".blockmap"))
    })
}

/// GitHub releases feed.
pub struct GithubReleaseSource {
    client: reqwest::Client,
    repo: String,
    download_dir: PathBuf,
    stall_timeout: Duration,
}

impl GithubReleaseSource {
    pub fn new(repo: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("send-to-crm/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("[UPDATE] Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self {
            client,
            repo: repo.into(),
            download_dir: updates_dir(),
            stall_timeout: DOWNLOAD_STALL_TIMEOUT,
        }
    }

    /// GETs `url`, resuming from byte `from` when non-zero.
    async fn request(&self, url: &str, from: u64) -> Result<reqwest::Response, UpdateError> {
        let mut req = self.client.get(url);
        if from > 0 {
            req = req.header(reqwest::header::RANGE, format!("bytes={}-", from));
        }

        tokio::time::timeout(self.stall_timeout, req.send())
            .await
            .map_err(|_| {
                UpdateError::DownloadFailed(format!(
                    "No response within {}s",
                    self.stall_timeout.as_secs_f32()
                ))
            })?
            .map_err(|e| UpdateError::DownloadFailed(format!("Download request failed: {}", e)))
    }
}

/// Directory downloaded installers are kept in.
pub fn updates_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("send-to-crm")
        .join("updates")
}

#[async_trait]
impl UpdateSource for GithubReleaseSource {
    async fn check(&self, current_version: &str) -> Result<Option<UpdateRelease>, UpdateError> {
        let url = format!("https://api.github.com/repos/{}/releases/latest", self.repo);
        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .timeout(CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| UpdateError::CheckFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(UpdateError::CheckFailed(format!("HTTP {}", resp.status())));
        }

        let latest: LatestRelease = resp
            .json()
            .await
            .map_err(|e| UpdateError::CheckFailed(format!("Malformed release: {}", e)))?;

        if latest.draft || latest.prerelease || !is_newer_version(&latest.tag_name, current_version)
        {
            return Ok(None);
        }

        let asset = pick_asset(&latest.assets).cloned().ok_or_else(|| {
            UpdateError::CheckFailed(format!(
                "Release {} has no installer for {}",
                latest.tag_name,
                std::env::consts::OS
            ))
        })?;

        Ok(Some(UpdateRelease {
            version: latest.tag_name.trim_start_matches(['v', 'V']).to_string(),
            asset,
        }))
    }

    /// Supports resumption: if a partial file exists, sends a Range header.
    /// A finished file from an earlier cycle is reused as-is.
    ///
    /// A 416 answer to a resume means the partial file is already complete
    /// (it is kept) or unusable (it is discarded and fetched again once).
    /// Waiting longer than the stall timeout for any chunk fails the download.
    async fn download(
        &self,
        release: &UpdateRelease,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<PathBuf, UpdateError> {
        use std::io::Write;

        let failed = |msg: String| UpdateError::DownloadFailed(msg);

        std::fs::create_dir_all(&self.download_dir)
            .map_err(|e| failed(format!("Failed to create updates dir: {}", e)))?;

        let dest = self.download_dir.join(&release.asset.name);
        let partial = self
            .download_dir
            .join(format!("{}.partial", release.asset.name));

        if dest.metadata().map(|m| m.len() > 0).unwrap_or(false) {
            log::info!("[UPDATE] Reusing downloaded installer {}", dest.display());
            progress(100);
            return Ok(dest);
        }

        let mut existing_bytes = partial.metadata().map(|m| m.len()).unwrap_or(0);
        log::info!(
            "[UPDATE] Downloading {} ({} bytes, resuming from {})",
            release.asset.name,
            release.asset.size,
            existing_bytes
        );

        let mut resp = self.request(&release.asset.url, existing_bytes).await?;

        if resp.status() == reqwest::StatusCode::RANGE_NOT_SATISFIABLE && existing_bytes > 0 {
            if release.asset.size == 0 || existing_bytes == release.asset.size {
                log::info!("[UPDATE] Partial download was already complete");
                std::fs::rename(&partial, &dest)
                    .map_err(|e| failed(format!("Failed to finalize download: {}", e)))?;
                progress(100);
                return Ok(dest);
            }

            log::warn!(
                "[UPDATE] Discarding unusable partial download ({} of {} bytes)",
                existing_bytes,
                release.asset.size
            );
            std::fs::remove_file(&partial)
                .map_err(|e| failed(format!("Failed to remove partial file: {}", e)))?;
            existing_bytes = 0;
            resp = self.request(&release.asset.url, 0).await?;
        }

        let resumed = resp.status() == reqwest::StatusCode::PARTIAL_CONTENT;
        if !resp.status().is_success() {
            return Err(failed(format!("HTTP {}", resp.status())));
        }

        let mut downloaded = if resumed { existing_bytes } else { 0 };
        let total = if resumed {
            release.asset.size
        } else {
            resp.content_length().unwrap_or(release.asset.size)
        };

        let mut file = if resumed {
            std::fs::OpenOptions::new()
                .append(true)
                .open(&partial)
                .map_err(|e| failed(format!("Failed to open partial file: {}", e)))?
        } else {
            std::fs::File::create(&partial)
                .map_err(|e| failed(format!("Failed to create file: {}", e)))?
        };

        let mut last_percent = None;
        loop {
            let chunk = tokio::time::timeout(self.stall_timeout, resp.chunk())
                .await
                .map_err(|_| {
                    failed(format!(
                        "Download stalled for {}s at {} bytes",
                        self.stall_timeout.as_secs_f32(),
                        downloaded
                    ))
                })?
                .map_err(|e| failed(format!("Download stream error: {}", e)))?;
            let Some(chunk) = chunk else {
                break;
            };

            file.write_all(&chunk)
                .map_err(|e| failed(format!("Failed to write chunk: {}", e)))?;
            downloaded += chunk.len() as u64;

            if total > 0 {
                let percent = ((downloaded as f64 / total as f64) * 100.0).min(100.0) as u8;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    progress(percent);
                }
            }
        }

        std::fs::rename(&partial, &dest)
            .map_err(|e| failed(format!("Failed to finalize download: {}", e)))?;

        log::info!("[UPDATE] Download complete: {}", dest.display());
        Ok(dest)
    }
}

/// Hands the installer to the OS. The app exits right after.
pub struct LaunchInstaller;

impl Installer for LaunchInstaller {
    fn launch(&self, installer: &Path) -> Result<(), UpdateError> {
        let spawn = |mut cmd: std::process::Command| {
            cmd.spawn()
                .map(|_| ())
                .map_err(|e| UpdateError::InstallFailed(e.to_string()))
        };

        if cfg!(target_os = "macos") {
            let mut cmd = std::process::Command::new("open");
            cmd.arg(installer);
            return spawn(cmd);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(installer, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| UpdateError::InstallFailed(e.to_string()))?;
        }

        spawn(std::process::Command::new(installer))
    }
}
