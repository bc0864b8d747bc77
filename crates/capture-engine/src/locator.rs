//! Encoder binary resolution and on-demand install.
//!
//! Lookup order: configured path, previously installed copy, the command
//! search path (`-version` probe), then download-and-extract from the
//! configured archive URL.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use rdtile_common::config::{config_file_path, tools_dir, RecordingSettings};
use rdtile_common::error::{RdtileError, RdtileResult};
use tokio::io::AsyncWriteExt;

use crate::process::encoder_command;

/// Upper bound for the `-version` probe.
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[cfg(windows)]
pub const ENCODER_EXECUTABLE: &str = "ffmpeg.exe";
#[cfg(not(windows))]
pub const ENCODER_EXECUTABLE: &str = "ffmpeg";

/// Where a resolved encoder came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderSource {
    Configured,
    Installed,
    SearchPath,
    Downloaded,
}

/// Stage of an encoder install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Downloading,
    Extracting,
    Complete,
}

/// Progress report for an encoder install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallProgress {
    pub stage: InstallStage,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

impl InstallProgress {
    /// Download completion in percent, when the size is known.
    pub fn percent(&self) -> Option<u8> {
        self.total_bytes
            .filter(|total| *total > 0)
            .map(|total| ((self.downloaded_bytes.min(total) * 100) / total) as u8)
    }
}

/// Progress callback for encoder installs.
pub type InstallProgressCallback = Box<dyn Fn(InstallProgress) + Send + Sync>;

/// Finds (and if needed installs) the ffmpeg executable.
#[derive(Debug, Clone)]
pub struct EncoderLocator {
    configured: Option<PathBuf>,
    install_dir: PathBuf,
    search_program: PathBuf,
    download_url: Option<String>,
    config_path: PathBuf,
}

impl EncoderLocator {
    pub fn from_settings(settings: &RecordingSettings) -> Self {
        Self {
            configured: settings.encoder_path.clone(),
            install_dir: tools_dir().join("ffmpeg"),
            search_program: PathBuf::from(ENCODER_EXECUTABLE),
            download_url: settings.encoder_download_url.clone(),
            config_path: config_file_path(),
        }
    }

    /// Directory holding the installed copy.
    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self
    }

    /// Program name probed on the command search path.
    pub fn with_search_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.search_program = program.into();
        self
    }

    pub fn with_download_url(mut self, url: Option<String>) -> Self {
        self.download_url = url;
        self
    }

    /// Path of the locally installed copy, whether or not it exists.
    pub fn installed_path(&self) -> PathBuf {
        self.install_dir.join(ENCODER_EXECUTABLE)
    }

    /// Find an encoder without downloading anything.
    pub async fn locate(&self) -> Option<(PathBuf, EncoderSource)> {
        if let Some(configured) = &self.configured {
            if configured.is_file() {
                return Some((configured.clone(), EncoderSource::Configured));
            }
            tracing::warn!(path = %configured.display(), "Configured encoder does not exist");
        }

        let installed = self.installed_path();
        if installed.is_file() {
            return Some((installed, EncoderSource::Installed));
        }

        if probe_version(&self.search_program).await {
            return Some((self.search_program.clone(), EncoderSource::SearchPath));
        }

        None
    }

    /// Find an encoder, installing one when nothing is available.
    pub async fn resolve(
        &self,
        progress: Option<&InstallProgressCallback>,
    ) -> RdtileResult<(PathBuf, EncoderSource)> {
        if let Some((path, source)) = self.locate().await {
            tracing::info!(path = %path.display(), ?source, "Encoder resolved");
            return Ok((path, source));
        }

        match self.install(progress).await {
            Ok(path) => {
                tracing::info!(path = %path.display(), "Encoder installed");
                Ok((path, EncoderSource::Downloaded))
            }
            Err(e) => Err(RdtileError::encoder(format!(
                "No ffmpeg encoder available ({e}). Install ffmpeg on your PATH or set \
                 \"recording.encoder_path\" in {}",
                self.config_path.display()
            ))),
        }
    }

    /// Download the configured archive and extract the encoder from it.
    pub async fn install(&self, progress: Option<&InstallProgressCallback>) -> RdtileResult<PathBuf> {
        let url = self
            .download_url
            .as_deref()
            .ok_or_else(|| RdtileError::encoder("no encoder download URL is configured"))?;

        tokio::fs::create_dir_all(&self.install_dir).await?;
        let archive = self.install_dir.join("ffmpeg-download.zip.part");
        let report = |stage: InstallStage, downloaded_bytes: u64, total_bytes: Option<u64>| {
            if let Some(cb) = progress {
                cb(InstallProgress {
                    stage,
                    downloaded_bytes,
                    total_bytes,
                });
            }
        };

        tracing::info!(%url, dir = %self.install_dir.display(), "Downloading encoder");
        let downloaded = download(url, &archive, &report).await;
        let downloaded = match downloaded {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&archive).await;
                return Err(e);
            }
        };

        report(InstallStage::Extracting, downloaded, Some(downloaded));
        let target = self.installed_path();
        let extracted = {
            let archive = archive.clone();
            let target = target.clone();
            tokio::task::spawn_blocking(move || extract_encoder(&archive, &target))
                .await
                .map_err(|e| RdtileError::encoder(format!("Extraction task failed: {e}")))?
        };
        let _ = tokio::fs::remove_file(&archive).await;
        extracted?;

        report(InstallStage::Complete, downloaded, Some(downloaded));
        Ok(target)
    }
}

async fn download(
    url: &str,
    destination: &Path,
    report: &(dyn Fn(InstallStage, u64, Option<u64>) + Sync),
) -> RdtileResult<u64> {
    let mut response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| RdtileError::encoder(format!("Download failed: {e}")))?;
    let total = response.content_length();

    let mut file = tokio::fs::File::create(destination).await?;
    let mut downloaded = 0u64;
    report(InstallStage::Downloading, 0, total);

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| RdtileError::encoder(format!("Download interrupted: {e}")))?
    {
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        report(InstallStage::Downloading, downloaded, total);
    }
    file.flush().await?;

    tracing::debug!(bytes = downloaded, "Encoder archive downloaded");
    Ok(downloaded)
}

/// Copy the encoder executable out of a zip archive to `target`.
///
/// The executable may sit at any depth inside the archive.
pub fn extract_encoder(archive: &Path, target: &Path) -> RdtileResult<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| RdtileError::encoder(format!("Downloaded archive is unreadable: {e}")))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| RdtileError::encoder(format!("Corrupt archive entry: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let is_encoder = Path::new(entry.name())
            .file_name()
            .is_some_and(|name| name == ENCODER_EXECUTABLE);
        if !is_encoder {
            continue;
        }

        let partial = target.with_extension("part");
        {
            let mut out = File::create(&partial)?;
            std::io::copy(&mut entry, &mut out)?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755))?;
        }
        std::fs::rename(&partial, target)?;
        return Ok(());
    }

    Err(RdtileError::encoder(format!(
        "Archive does not contain {ENCODER_EXECUTABLE}"
    )))
}

/// True when `program -version` exits with status zero within the probe timeout.
pub async fn probe_version(program: &Path) -> bool {
    let mut command = encoder_command(program);
    command.arg("-version").stderr(Stdio::null());
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!(program = %program.display(), error = %e, "Encoder not on search path");
            return false;
        }
    };

    match tokio::time::timeout(VERSION_PROBE_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(_)) => false,
        Err(_) => {
            tracing::warn!(program = %program.display(), "Encoder version probe timed out");
            let _ = child.kill().await;
            false
        }
    }
}
