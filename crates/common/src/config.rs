//! Application configuration.
//!
//! The recording core never reads this file itself: callers load an
//! [`AppConfig`] once and hand the [`RecordingSettings`] snapshot to the
//! workflow and engines.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::RdtileResult;

/// Archive the encoder installer falls back to when no ffmpeg is found.
#[cfg(target_os = "windows")]
pub const DEFAULT_ENCODER_DOWNLOAD_URL: Option<&str> =
    Some("https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip");

/// Archive the encoder installer falls back to when no ffmpeg is found.
#[cfg(not(target_os = "windows"))]
pub const DEFAULT_ENCODER_DOWNLOAD_URL: Option<&str> = None;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Recording settings.
    pub recording: RecordingSettings,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Read-only recording settings injected into the recording workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Capture frame rate.
    pub fps: u32,

    /// Folder finished recordings are written to.
    pub output_folder: PathBuf,

    /// Explicit encoder executable. Takes precedence over every other lookup.
    pub encoder_path: Option<PathBuf>,

    /// Prefer the frame-pump engine when a window capturer is available.
    pub prefer_frame_pump: bool,

    /// Draw the mouse cursor into the capture.
    pub include_cursor: bool,

    /// Zip archive used to install an encoder on demand.
    pub encoder_download_url: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "rdtile_capture_engine=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            output_folder: default_output_folder(),
            encoder_path: None,
            prefer_frame_pump: true,
            include_cursor: true,
            encoder_download_url: DEFAULT_ENCODER_DOWNLOAD_URL.map(str::to_string),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to an explicit path, creating parent directories.
    pub fn save_to(&self, config_path: &std::path::Path) -> RdtileResult<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, json)?;
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"));
    base.join("rdtile").join("config.json")
}

/// Directory holding tools installed on demand (the encoder).
pub fn tools_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local").join("share"));
    base.join("rdtile").join("tools")
}

/// Default folder for finished recordings.
fn default_output_folder() -> PathBuf {
    home_dir().join("Videos").join("rdtile")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}
