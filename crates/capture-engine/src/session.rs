//! Recording session descriptions shared by both engines.

use std::path::PathBuf;

use rdtile_common::config::RecordingSettings;
use rdtile_platform_core::{Rect, WindowHandle};
use serde::{Deserialize, Serialize};

/// Encoding parameters that stay fixed for one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingProfile {
    /// Target frames per second.
    pub fps: u32,

    /// Whether the cursor is drawn into screen-grab captures.
    pub include_cursor: bool,
}

impl RecordingProfile {
    pub fn from_settings(settings: &RecordingSettings) -> Self {
        Self {
            fps: settings.fps.max(1),
            include_cursor: settings.include_cursor,
        }
    }
}

impl Default for RecordingProfile {
    fn default() -> Self {
        Self {
            fps: 30,
            include_cursor: true,
        }
    }
}

/// Everything an engine needs to begin a recording.
#[derive(Debug, Clone)]
pub struct EngineStartRequest {
    /// Window being recorded. Required by the frame-pump engine only.
    pub window: WindowHandle,

    /// Requested capture region in screen coordinates.
    pub capture_bounds: Rect,

    /// Outer bounds of the target window in screen coordinates.
    pub window_bounds: Rect,

    /// Bounds of the whole virtual desktop.
    pub desktop_bounds: Rect,

    pub profile: RecordingProfile,

    /// Folder the final file and intermediates are written to.
    pub output_folder: PathBuf,

    /// Resolved encoder executable.
    pub encoder_path: PathBuf,
}

/// What happened to the caller's masks during finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MaskingOutcome {
    /// No masks were supplied.
    NotRequested,

    /// Masks were supplied but none overlapped the recorded frame.
    Skipped,

    /// The masked re-encode replaced the recording.
    Applied { regions: usize },

    /// The masked re-encode failed; the unmasked recording was kept.
    Degraded { reason: String },
}

impl MaskingOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, MaskingOutcome::Degraded { .. })
    }
}

/// A recording that reached disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedRecording {
    /// Final video file.
    pub path: PathBuf,

    pub masking: MaskingOutcome,

    /// Later segments that could not be joined onto `path`. They are left
    /// on disk next to it, in recording order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unjoined_segments: Vec<PathBuf>,
}

impl FinishedRecording {
    pub fn new(path: PathBuf, masking: MaskingOutcome) -> Self {
        Self {
            path,
            masking,
            unjoined_segments: Vec::new(),
        }
    }

    /// Whether part of the recording lives outside `path`.
    pub fn is_partial(&self) -> bool {
        !self.unjoined_segments.is_empty()
    }
}

/// Runtime statistics from a frame pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Frames written to the encoder.
    pub frames_written: u64,

    /// Captures that failed and were skipped.
    pub frames_dropped: u64,
}

impl PumpStats {
    /// Drop rate as a percentage.
    pub fn drop_rate(&self) -> f64 {
        let total = self.frames_written + self.frames_dropped;
        if total == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / total as f64 * 100.0
    }
}
