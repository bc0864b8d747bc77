//! Frame-pump recording engine.
//!
//! Captures the target window's bitmap at a fixed cadence and streams
//! each frame as a BMP into one encoder reading `image2pipe` from stdin.
//! Pausing closes a [`PauseGate`] so no frames are produced; the encoder
//! and its pipe stay untouched.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use rdtile_common::clock::{FramePacer, SessionId};
use rdtile_common::error::{RdtileError, RdtileResult};
use rdtile_platform_core::{MaskRect, Rect, WindowCapturer, WindowHandle};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::encoder_args::frame_pipe_args;
use crate::engine::RecordingEngine;
use crate::masking::{publish_recording, MaskFrame};
use crate::process::{
    encoder_command, remove_file_logged, EncoderProcess, GracefulStop, StderrTail,
    IMMEDIATE_EXIT_PROBE,
};
use crate::session::{EngineStartRequest, FinishedRecording, PumpStats, RecordingProfile};

/// How long stop waits for the pump task to notice cancellation.
pub const PUMP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period for the encoder to flush after its input pipe closes.
pub const PIPE_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Cooperative open/closed gate the pump waits on between frames.
#[derive(Debug, Clone)]
pub struct PauseGate {
    open: Arc<watch::Sender<bool>>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    /// A gate that starts open.
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self {
            open: Arc::new(open),
        }
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Resolve once the gate is open.
    pub async fn wait_open(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Window-bitmap recorder streaming frames into a single encoder.
pub struct FramePumpRecorder {
    capturer: Arc<dyn WindowCapturer>,
    gate: PauseGate,
    state: Mutex<Option<PumpSession>>,
    running: AtomicBool,
}

struct PumpSession {
    id: SessionId,
    encoder: PathBuf,
    output_folder: PathBuf,
    raw_path: PathBuf,
    frame: MaskFrame,
    process: EncoderProcess,
    tail: StderrTail,
    cancel: CancellationToken,
    pump: JoinHandle<PumpExit>,
}

struct PumpExit {
    stats: PumpStats,
    stdin: ChildStdin,
    error: Option<String>,
}

struct PumpContext {
    capturer: Arc<dyn WindowCapturer>,
    window: WindowHandle,
    crop: Rect,
    fps: u32,
    gate: PauseGate,
    cancel: CancellationToken,
    stdin: ChildStdin,
}

impl FramePumpRecorder {
    pub fn new(capturer: Arc<dyn WindowCapturer>) -> Self {
        Self {
            capturer,
            gate: PauseGate::new(),
            state: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// The pump's pause gate.
    pub fn gate(&self) -> &PauseGate {
        &self.gate
    }

    /// Process id of the running encoder, if any.
    pub async fn encoder_pid(&self) -> Option<u32> {
        self.state.lock().await.as_ref().and_then(|s| s.process.id())
    }

    /// Start capturing `window`.
    ///
    /// `capture_bounds` and `window_bounds` are screen coordinates; the
    /// crop is resolved against the window surface size seen by a probe
    /// capture.
    pub async fn start_recording(
        &self,
        window: WindowHandle,
        capture_bounds: Rect,
        window_bounds: Rect,
        profile: RecordingProfile,
        output_folder: &Path,
        encoder: &Path,
    ) -> RdtileResult<()> {
        if window.is_none() {
            return Err(RdtileError::capture("No window to record"));
        }
        if capture_bounds.is_empty() {
            return Err(RdtileError::capture(format!(
                "Capture region must have a positive size, got {}x{}",
                capture_bounds.width, capture_bounds.height
            )));
        }
        if profile.fps == 0 {
            return Err(RdtileError::capture("Frame rate must be positive"));
        }

        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(RdtileError::capture("A frame-pump recording is already running"));
        }

        let capturer = self.capturer.clone();
        let probe = tokio::task::spawn_blocking(move || capturer.capture(window))
            .await
            .map_err(|e| RdtileError::capture(format!("Probe capture task failed: {e}")))??;
        let surface = Rect::new(0, 0, probe.width() as i32, probe.height() as i32);

        let requested = capture_bounds.translate(-window_bounds.x, -window_bounds.y);
        let crop = resolve_crop(requested, surface);
        if crop.is_empty() {
            return Err(RdtileError::capture(format!(
                "Window surface {}x{} is too small to record",
                surface.width, surface.height
            )));
        }

        tokio::fs::create_dir_all(output_folder).await.map_err(|e| {
            RdtileError::capture(format!(
                "Cannot create output folder {}: {e}",
                output_folder.display()
            ))
        })?;

        let id = SessionId::generate();
        let raw_path = output_folder.join(id.file_name("_raw", "mp4"));
        let tail = StderrTail::default();

        let mut command = encoder_command(encoder);
        command
            .args(frame_pipe_args(profile.fps, &raw_path))
            .stdin(Stdio::piped());
        let mut process = EncoderProcess::spawn("frame-pump", command, tail.clone())?;

        if let Some(status) = process.exited_within(IMMEDIATE_EXIT_PROBE).await? {
            remove_file_logged(&raw_path).await;
            return Err(RdtileError::encoder(format!(
                "Encoder exited immediately ({status}): {}",
                tail.render()
            )));
        }

        let Some(stdin) = process.take_stdin() else {
            process.shutdown(GracefulStop::Kill, Duration::ZERO).await;
            remove_file_logged(&raw_path).await;
            return Err(RdtileError::process("Encoder input pipe unavailable"));
        };

        tracing::info!(
            session = %id,
            %window,
            ?surface,
            ?crop,
            fps = profile.fps,
            pid = process.id(),
            "Starting frame-pump recording"
        );

        self.gate.open();
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(run_frame_pump(PumpContext {
            capturer: self.capturer.clone(),
            window,
            crop,
            fps: profile.fps,
            gate: self.gate.clone(),
            cancel: cancel.clone(),
            stdin,
        }));

        *state = Some(PumpSession {
            id,
            encoder: encoder.to_path_buf(),
            output_folder: output_folder.to_path_buf(),
            raw_path,
            frame: MaskFrame::new(requested, crop),
            process,
            tail,
            cancel,
            pump,
        });
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop the pump, let the encoder finish, and publish the result.
    pub async fn stop_recording(&self, masks: &[MaskRect]) -> RdtileResult<FinishedRecording> {
        let mut state = self.state.lock().await;
        let Some(session) = state.take() else {
            return Err(RdtileError::capture("No frame-pump recording to stop"));
        };
        self.running.store(false, Ordering::SeqCst);

        let PumpSession {
            id,
            encoder,
            output_folder,
            raw_path,
            frame,
            process,
            tail,
            cancel,
            pump,
        } = session;

        let exit = self.stop_pump(cancel, pump).await;
        if let Some(exit) = exit {
            tracing::info!(
                session = %id,
                frames = exit.stats.frames_written,
                dropped = exit.stats.frames_dropped,
                drop_rate = exit.stats.drop_rate(),
                "Frame pump finished"
            );
            if let Some(error) = &exit.error {
                tracing::warn!(session = %id, %error, "Frame pump stopped early");
            }
            drop(exit.stdin);
        }

        let outcome = process
            .shutdown(GracefulStop::CloseStdin, PIPE_CLOSE_TIMEOUT)
            .await;
        if !outcome.is_clean() {
            tracing::warn!(session = %id, ?outcome, tail = %tail.render(), "Encoder did not finish cleanly");
        }

        let produced = tokio::fs::metadata(&raw_path)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !produced {
            remove_file_logged(&raw_path).await;
            return Err(RdtileError::capture(format!(
                "Encoder produced no output: {}",
                tail.render()
            )));
        }

        let final_path = output_folder.join(id.file_name("", "mp4"));
        let masked_path = output_folder.join(id.file_name("_masked", "mp4"));
        publish_recording(&encoder, &raw_path, &final_path, &masked_path, &frame, masks).await
    }

    /// Kill the encoder and delete the raw output.
    pub async fn abort_recording(&self) {
        let mut state = self.state.lock().await;
        self.running.store(false, Ordering::SeqCst);
        let Some(session) = state.take() else {
            return;
        };

        session.cancel.cancel();
        session.pump.abort();
        let _ = session.pump.await;
        self.gate.open();

        session
            .process
            .shutdown(GracefulStop::Kill, Duration::ZERO)
            .await;
        remove_file_logged(&session.raw_path).await;
        tracing::info!(session = %session.id, "Discarded frame-pump recording");
    }

    async fn stop_pump(
        &self,
        cancel: CancellationToken,
        mut pump: JoinHandle<PumpExit>,
    ) -> Option<PumpExit> {
        cancel.cancel();
        let joined = tokio::time::timeout(PUMP_JOIN_TIMEOUT, &mut pump).await;
        self.gate.open();
        match joined {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Frame pump task failed");
                None
            }
            Err(_) => {
                tracing::warn!("Frame pump did not stop in time; aborting it");
                pump.abort();
                None
            }
        }
    }
}

/// Intersect the window-relative request with the surface, even-sized.
///
/// Falls back to the whole surface when the request misses it.
fn resolve_crop(requested: Rect, surface: Rect) -> Rect {
    match requested
        .intersect(&surface)
        .map(|r| r.with_even_size())
        .filter(|r| !r.is_empty())
    {
        Some(crop) => crop,
        None => {
            tracing::warn!(
                ?requested,
                ?surface,
                "Capture region misses the window surface; recording the whole window"
            );
            surface.with_even_size()
        }
    }
}

async fn run_frame_pump(mut ctx: PumpContext) -> PumpExit {
    let mut pacer = FramePacer::new(ctx.fps, Instant::now());
    let mut stats = PumpStats::default();
    let mut error = None;

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = ctx.gate.wait_open() => {}
        }

        let capturer = ctx.capturer.clone();
        let (window, crop) = (ctx.window, ctx.crop);
        let job = tokio::task::spawn_blocking(move || capture_frame(capturer.as_ref(), window, crop));
        let captured = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            joined = job => joined,
        };

        match captured {
            Ok(Ok(bytes)) => {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                let written = async {
                    ctx.stdin.write_all(&bytes).await?;
                    ctx.stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    error = Some(format!("Encoder input pipe closed: {e}"));
                    break;
                }
                stats.frames_written += 1;
            }
            Ok(Err(e)) => {
                stats.frames_dropped += 1;
                if stats.frames_dropped == 1 || stats.frames_dropped % 100 == 0 {
                    tracing::warn!(dropped = stats.frames_dropped, error = %e, "Frame capture failed");
                }
            }
            Err(e) => {
                error = Some(format!("Capture worker failed: {e}"));
                break;
            }
        }

        let delay = pacer.next_delay(Instant::now());
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    PumpExit {
        stats,
        stdin: ctx.stdin,
        error,
    }
}

/// Capture one frame and serialize the crop as a 24-bit BMP.
///
/// The output is always exactly `crop` sized; parts of the crop outside
/// a shrunken window surface are black.
pub fn capture_frame(
    capturer: &dyn WindowCapturer,
    window: WindowHandle,
    crop: Rect,
) -> RdtileResult<Vec<u8>> {
    let surface = capturer.capture(window)?;
    let frame = crop_surface(&surface, crop);
    encode_bmp(frame)
}

fn crop_surface(surface: &RgbaImage, crop: Rect) -> RgbaImage {
    let bounds = Rect::new(0, 0, surface.width() as i32, surface.height() as i32);
    if bounds.contains_rect(&crop) {
        return imageops::crop_imm(
            surface,
            crop.x as u32,
            crop.y as u32,
            crop.width as u32,
            crop.height as u32,
        )
        .to_image();
    }
    let mut canvas = RgbaImage::new(crop.width.max(0) as u32, crop.height.max(0) as u32);
    imageops::replace(&mut canvas, surface, -(crop.x as i64), -(crop.y as i64));
    canvas
}

fn encode_bmp(frame: RgbaImage) -> RdtileResult<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(frame).to_rgb8();
    let mut bytes = Vec::with_capacity(rgb.as_raw().len() + 64);
    rgb.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Bmp)
        .map_err(|e| RdtileError::capture(format!("Failed to encode frame: {e}")))?;
    Ok(bytes)
}

#[async_trait::async_trait]
impl RecordingEngine for FramePumpRecorder {
    fn name(&self) -> &'static str {
        "frame-pump"
    }

    async fn start(&self, request: &EngineStartRequest) -> RdtileResult<()> {
        self.start_recording(
            request.window,
            request.capture_bounds,
            request.window_bounds,
            request.profile,
            &request.output_folder,
            &request.encoder_path,
        )
        .await
    }

    async fn pause(&self) -> RdtileResult<()> {
        self.gate.close();
        Ok(())
    }

    async fn resume(&self) -> RdtileResult<()> {
        self.gate.open();
        Ok(())
    }

    async fn stop(&self, masks: &[MaskRect]) -> RdtileResult<FinishedRecording> {
        self.stop_recording(masks).await
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
    use image::Rgba;

    struct SolidWindow {
        width: u32,
        height: u32,
    }

    impl WindowCapturer for SolidWindow {
        fn capture(&self, _window: WindowHandle) -> RdtileResult<RgbaImage> {
            Ok(RgbaImage::from_fn(self.width, self.height, |x, _| {
                Rgba([(x % 256) as u8, 0, 0, 255])
            }))
        }
    }

    #[test]
    fn test_crop_intersects_surface_and_rounds_even() {
        let crop = resolve_crop(Rect::new(10, 30, 1001, 601), Rect::new(0, 0, 800, 600));
        assert_eq!(crop, Rect::new(10, 30, 790, 570));
    }

    #[test]
    fn test_crop_falls_back_to_surface() {
        let crop = resolve_crop(Rect::new(2000, 2000, 100, 100), Rect::new(0, 0, 801, 601));
        assert_eq!(crop, Rect::new(0, 0, 800, 600));
    }

    #[test]
    fn test_capture_frame_is_crop_sized_bmp() {
        let window = SolidWindow {
            width: 64,
            height: 48,
        };
        let bytes = capture_frame(&window, WindowHandle(1), Rect::new(8, 8, 32, 16)).unwrap();
        assert_eq!(&bytes[..2], b"BM");

        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Bmp).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
        assert_eq!(decoded.to_rgb8().get_pixel(0, 0).0, [8, 0, 0]);
    }

    #[test]
    fn test_shrunken_surface_is_padded() {
        let surface = RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]));
        let frame = crop_surface(&surface, Rect::new(10, 10, 20, 20));
        assert_eq!(frame.dimensions(), (20, 20));
        assert_eq!(frame.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(frame.get_pixel(15, 15).0, [0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_gate_blocks_until_opened() {
        let gate = PauseGate::new();
        gate.close();
        assert!(!gate.is_open());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_open().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        gate.open();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_rejects_missing_window() {
        let recorder = FramePumpRecorder::new(Arc::new(SolidWindow {
            width: 10,
            height: 10,
        }));
        let err = recorder
            .start_recording(
                WindowHandle::NONE,
                Rect::new(0, 0, 10, 10),
                Rect::new(0, 0, 10, 10),
                RecordingProfile::default(),
                Path::new("unused"),
                Path::new("ffmpeg"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No window"));
        assert!(!recorder.is_running());
    }
}
