//! Segment recording engine.
//!
//! Grabs a fixed screen rectangle straight to disk. Every pause stops the
//! encoder and every resume starts a new one, so a recording is a list of
//! segment files that finalization joins with a stream-copy concat.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rdtile_common::clock::SessionId;
use rdtile_common::error::{RdtileError, RdtileResult};
use rdtile_platform_core::{MaskRect, Rect};
use tokio::sync::Mutex;

use crate::encoder_args::{concat_args, concat_manifest, segment_capture_args, CaptureSource};
use crate::engine::RecordingEngine;
use crate::masking::{publish_recording, MaskFrame};
use crate::process::{
    encoder_command, remove_file_logged, run_to_completion, EncoderProcess, GracefulStop,
    StderrTail, IMMEDIATE_EXIT_PROBE,
};
use crate::session::{EngineStartRequest, FinishedRecording, RecordingProfile};

/// Grace period for an encoder to finish a segment after the quit key.
pub const SEGMENT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for the stream-copy concatenation.
pub const CONCAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Screen-grab recorder producing one file per pause/resume cycle.
pub struct SegmentRecorder {
    source: CaptureSource,
    concat_timeout: Duration,
    state: Mutex<SegmentState>,
    running: AtomicBool,
}

#[derive(Default)]
struct SegmentState {
    session: Option<SegmentSession>,
    active: Option<EncoderProcess>,
    tail: StderrTail,
    last_failure: Option<String>,
}

struct SegmentSession {
    id: SessionId,
    encoder: PathBuf,
    output_folder: PathBuf,
    /// Clipped, even-sized region actually grabbed (screen coordinates).
    capture: Rect,
    frame: MaskFrame,
    profile: RecordingProfile,
    segments: Vec<PathBuf>,
    next_index: u32,
}

impl SegmentSession {
    fn artifact(&self, suffix: &str, extension: &str) -> PathBuf {
        self.output_folder
            .join(self.id.file_name(suffix, extension))
    }
}

impl Default for SegmentRecorder {
    fn default() -> Self {
        Self::new(CaptureSource::platform_default())
    }
}

impl SegmentRecorder {
    pub fn new(source: CaptureSource) -> Self {
        Self {
            source,
            concat_timeout: CONCAT_TIMEOUT,
            state: Mutex::new(SegmentState::default()),
            running: AtomicBool::new(false),
        }
    }

    /// Override the bound on the concat pass.
    pub fn with_concat_timeout(mut self, timeout: Duration) -> Self {
        self.concat_timeout = timeout;
        self
    }

    /// Start a recording of `requested` and begin its first segment.
    ///
    /// `requested` is clipped to `desktop` and rounded down to an even
    /// size; masks passed to [`finalize_recording`](Self::finalize_recording)
    /// stay relative to `requested`.
    pub async fn start(
        &self,
        requested: Rect,
        desktop: Rect,
        profile: RecordingProfile,
        output_folder: &Path,
        encoder: &Path,
    ) -> RdtileResult<()> {
        if requested.is_empty() {
            return Err(RdtileError::capture(format!(
                "Capture region must have a positive size, got {}x{}",
                requested.width, requested.height
            )));
        }
        if profile.fps == 0 {
            return Err(RdtileError::capture("Frame rate must be positive"));
        }

        let mut state = self.state.lock().await;
        if state.session.is_some() {
            return Err(RdtileError::capture("A segment recording is already running"));
        }

        let capture = requested
            .intersect(&desktop)
            .map(|clipped| clipped.with_even_size())
            .filter(|clipped| !clipped.is_empty())
            .ok_or_else(|| {
                RdtileError::capture(format!(
                    "Capture region {requested:?} lies outside the desktop {desktop:?}"
                ))
            })?;

        tokio::fs::create_dir_all(output_folder).await.map_err(|e| {
            RdtileError::capture(format!(
                "Cannot create output folder {}: {e}",
                output_folder.display()
            ))
        })?;

        let id = SessionId::generate();
        tracing::info!(
            session = %id,
            ?requested,
            ?capture,
            fps = profile.fps,
            "Starting segment recording"
        );

        state.session = Some(SegmentSession {
            id,
            encoder: encoder.to_path_buf(),
            output_folder: output_folder.to_path_buf(),
            capture,
            frame: MaskFrame::new(requested, capture),
            profile,
            segments: Vec::new(),
            next_index: 1,
        });
        state.last_failure = None;

        if !self.start_segment_locked(&mut state).await {
            let reason = state
                .last_failure
                .take()
                .unwrap_or_else(|| state.tail.render());
            state.session = None;
            return Err(RdtileError::capture(format!(
                "Encoder failed to start recording: {reason}"
            )));
        }

        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Start the encoder for the next segment. Returns `false` on failure.
    pub async fn start_new_segment(&self) -> bool {
        let mut state = self.state.lock().await;
        self.start_segment_locked(&mut state).await
    }

    /// Gracefully stop the active segment's encoder. Never fails.
    pub async fn stop_current_segment(&self) {
        let mut state = self.state.lock().await;
        Self::stop_segment_locked(&mut state).await;
    }

    /// Stop recording and publish the final file.
    pub async fn finalize_recording(&self, masks: &[MaskRect]) -> RdtileResult<FinishedRecording> {
        let mut state = self.state.lock().await;
        Self::stop_segment_locked(&mut state).await;
        let session = state.session.take();
        let result = match session {
            Some(session) => {
                Self::finalize_session(session, &state.tail, masks, self.concat_timeout).await
            }
            None => Err(RdtileError::capture("No segment recording to finalize")),
        };
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Kill the encoder and delete every tracked segment.
    pub async fn abort_recording(&self) {
        let mut state = self.state.lock().await;
        if let Some(process) = state.active.take() {
            process.shutdown(GracefulStop::Kill, Duration::ZERO).await;
        }
        if let Some(session) = state.session.take() {
            tracing::info!(
                session = %session.id,
                segments = session.segments.len(),
                "Discarding segment recording"
            );
            for segment in &session.segments {
                remove_file_logged(segment).await;
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Segment files tracked for the current recording, in order.
    pub async fn segments(&self) -> Vec<PathBuf> {
        let state = self.state.lock().await;
        state
            .session
            .as_ref()
            .map(|s| s.segments.clone())
            .unwrap_or_default()
    }

    async fn start_segment_locked(&self, state: &mut SegmentState) -> bool {
        let Some(session) = state.session.as_mut() else {
            tracing::warn!("No segment recording to extend");
            return false;
        };
        if state.active.is_some() {
            tracing::warn!(session = %session.id, "A segment is already being recorded");
            return false;
        }

        let index = session.next_index;
        session.next_index += 1;
        let path = session.artifact(&format!("_seg{index:03}"), "mp4");

        let mut command = encoder_command(&session.encoder);
        command
            .args(segment_capture_args(
                &self.source,
                session.capture,
                session.profile.fps,
                session.profile.include_cursor,
                &path,
            ))
            .stdin(Stdio::piped());
        session.segments.push(path.clone());

        let failure = match EncoderProcess::spawn("segment", command, state.tail.clone()) {
            Err(e) => e.to_string(),
            Ok(mut process) => match process.exited_within(IMMEDIATE_EXIT_PROBE).await {
                Ok(None) => {
                    tracing::info!(
                        session = %session.id,
                        segment = index,
                        pid = process.id(),
                        path = %path.display(),
                        "Segment started"
                    );
                    state.active = Some(process);
                    return true;
                }
                Ok(Some(status)) => format!(
                    "encoder exited immediately ({status}): {}",
                    state.tail.render()
                ),
                Err(e) => {
                    process.shutdown(GracefulStop::Kill, Duration::ZERO).await;
                    e.to_string()
                }
            },
        };

        tracing::error!(
            session = %session.id,
            segment = index,
            reason = %failure,
            "Segment failed to start"
        );
        session.segments.retain(|s| s != &path);
        remove_file_logged(&path).await;
        state.last_failure = Some(failure);
        false
    }

    async fn stop_segment_locked(state: &mut SegmentState) {
        if let Some(process) = state.active.take() {
            let outcome = process
                .shutdown(GracefulStop::QuitCommand, SEGMENT_STOP_TIMEOUT)
                .await;
            if outcome.is_clean() {
                tracing::info!("Segment stopped");
            } else {
                tracing::warn!(
                    ?outcome,
                    tail = %state.tail.render(),
                    "Segment encoder did not stop cleanly"
                );
            }
        }
    }

    async fn finalize_session(
        session: SegmentSession,
        tail: &StderrTail,
        masks: &[MaskRect],
        concat_timeout: Duration,
    ) -> RdtileResult<FinishedRecording> {
        let mut segments = Vec::with_capacity(session.segments.len());
        for segment in &session.segments {
            if tokio::fs::try_exists(segment).await.unwrap_or(false) {
                segments.push(segment.clone());
            } else {
                tracing::warn!(path = %segment.display(), "Dropping missing segment");
            }
        }

        let Some((first, rest)) = segments.split_first() else {
            return Err(RdtileError::capture(format!(
                "No segments were recorded; last encoder output: {}",
                tail.render()
            )));
        };

        let final_path = session.artifact("", "mp4");
        tracing::info!(
            session = %session.id,
            segments = segments.len(),
            masks = masks.len(),
            "Finalizing segment recording"
        );

        let (source, unjoined) = if rest.is_empty() {
            (first.clone(), Vec::new())
        } else {
            match Self::concatenate(&session, &segments, concat_timeout).await {
                Ok(joined) => (joined, Vec::new()),
                Err(e) => {
                    tracing::error!(
                        session = %session.id,
                        error = %e,
                        "Publishing the first segment only"
                    );
                    (first.clone(), rest.to_vec())
                }
            }
        };

        let mut finished = publish_recording(
            &session.encoder,
            &source,
            &final_path,
            &final_path,
            &session.frame,
            masks,
        )
        .await?;
        finished.unjoined_segments = unjoined;
        Ok(finished)
    }

    /// Join `segments` into one file and delete the inputs.
    ///
    /// Inputs are only deleted after a successful exit with a non-empty
    /// output. On failure the partial output is removed and every segment
    /// stays on disk.
    async fn concatenate(
        session: &SegmentSession,
        segments: &[PathBuf],
        timeout: Duration,
    ) -> RdtileResult<PathBuf> {
        let manifest = session.artifact("_concat", "txt");
        let output = session.artifact("_concat", "mp4");

        tokio::fs::write(&manifest, concat_manifest(segments)).await?;

        let mut command = encoder_command(&session.encoder);
        command.args(concat_args(&manifest, &output));
        let result = run_to_completion("concat", command, timeout).await;
        remove_file_logged(&manifest).await;

        let output_len = tokio::fs::metadata(&output)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let failure = match result {
            Ok(status) if status.success() && output_len > 0 => {
                for segment in segments {
                    remove_file_logged(segment).await;
                }
                return Ok(output);
            }
            Ok(status) if status.success() => "encoder produced no output".to_string(),
            Ok(status) => format!("encoder exited with {status}"),
            Err(e) => e.to_string(),
        };

        remove_file_logged(&output).await;
        let kept = segments
            .iter()
            .map(|s| s.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(RdtileError::capture(format!(
            "Failed to join segments ({failure}); segments kept: {kept}"
        )))
    }
}

#[async_trait::async_trait]
impl RecordingEngine for SegmentRecorder {
    fn name(&self) -> &'static str {
        "segment"
    }

    async fn start(&self, request: &EngineStartRequest) -> RdtileResult<()> {
        SegmentRecorder::start(
            self,
            request.capture_bounds,
            request.desktop_bounds,
            request.profile,
            &request.output_folder,
            &request.encoder_path,
        )
        .await
    }

    async fn pause(&self) -> RdtileResult<()> {
        self.stop_current_segment().await;
        Ok(())
    }

    async fn resume(&self) -> RdtileResult<()> {
        let mut state = self.state.lock().await;
        if self.start_segment_locked(&mut state).await {
            return Ok(());
        }
        let reason = state
            .last_failure
            .take()
            .unwrap_or_else(|| "no recording in progress".to_string());
        Err(RdtileError::capture(format!(
            "Failed to start a new segment: {reason}"
        )))
    }

    async fn stop(&self, masks: &[MaskRect]) -> RdtileResult<FinishedRecording> {
        self.finalize_recording(masks).await
    }

    async fn abort(&self) {
        self.abort_recording().await;
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_empty_region() {
        let recorder = SegmentRecorder::new(CaptureSource::GdiGrab);
        let err = recorder
            .start(
                Rect::new(0, 0, 0, 720),
                Rect::new(0, 0, 1920, 1080),
                RecordingProfile::default(),
                Path::new("unused"),
                Path::new("ffmpeg"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("positive size"));
    }

    #[tokio::test]
    async fn test_rejects_zero_fps() {
        let recorder = SegmentRecorder::new(CaptureSource::GdiGrab);
        let profile = RecordingProfile {
            fps: 0,
            include_cursor: true,
        };
        let err = recorder
            .start(
                Rect::new(0, 0, 640, 480),
                Rect::new(0, 0, 1920, 1080),
                profile,
                Path::new("unused"),
                Path::new("ffmpeg"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Frame rate"));
    }

    #[tokio::test]
    async fn test_rejects_region_outside_desktop() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = SegmentRecorder::new(CaptureSource::GdiGrab);
        let err = recorder
            .start(
                Rect::new(-2000, 0, 640, 480),
                Rect::new(0, 0, 1920, 1080),
                RecordingProfile::default(),
                dir.path(),
                Path::new("ffmpeg"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("outside the desktop"));
        assert!(!recorder.is_running());
    }

    #[tokio::test]
    async fn test_missing_encoder_fails_start_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = SegmentRecorder::new(CaptureSource::GdiGrab);
        let err = recorder
            .start(
                Rect::new(0, 0, 640, 480),
                Rect::new(0, 0, 1920, 1080),
                RecordingProfile::default(),
                dir.path(),
                &dir.path().join("no-such-ffmpeg"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to start"), "{err}");
        assert!(recorder.segments().await.is_empty());
        assert!(!recorder.is_running());
    }

    #[tokio::test]
    async fn test_finalize_without_session_fails() {
        let recorder = SegmentRecorder::new(CaptureSource::GdiGrab);
        assert!(recorder.finalize_recording(&[]).await.is_err());
    }
}
