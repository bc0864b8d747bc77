//! Recording workflow orchestrator.
//!
//! Every public command runs under one async gate, is validated against
//! the [`RecordingStateMachine`] first, and reports back through
//! [`WorkflowEvent`]s and the chrome's status line.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use rdtile_capture_engine::locator::{
    EncoderLocator, EncoderSource, InstallProgress, InstallProgressCallback, InstallStage,
};
use rdtile_capture_engine::{
    EngineStartRequest, FinishedRecording, FramePumpRecorder, MaskingOutcome, RecordingEngine,
    RecordingProfile, SegmentRecorder,
};
use rdtile_common::config::RecordingSettings;
use rdtile_common::error::{RdtileError, RdtileResult};
use rdtile_platform_core::{
    select_capture_candidate, Rect, WindowCapturer, WindowHandle, WindowService,
};
use tokio::sync::{broadcast, watch, Mutex};

use crate::chrome::MaskEditingChrome;
use crate::state::{RecordingState, RecordingStateMachine, RecordingWorkflowAction};

const EVENT_CAPACITY: usize = 64;

/// Notification published to observers (overlay, tray, CLI).
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    StateChanged(RecordingState),
    Message(String),
}

#[derive(Debug, Clone, Copy)]
struct CaptureTarget {
    window: WindowHandle,
    capture_bounds: Rect,
}

struct WorkflowInner {
    machine: RecordingStateMachine,
    target: Option<CaptureTarget>,
    active: Option<Arc<dyn RecordingEngine>>,
    frame_pump_unavailable: bool,
}

/// Top-level coordinator for one recorder instance.
pub struct RecordingWorkflow {
    settings: RecordingSettings,
    windows: Arc<dyn WindowService>,
    chrome: Arc<dyn MaskEditingChrome>,
    locator: EncoderLocator,
    segment_engine: Arc<dyn RecordingEngine>,
    frame_pump_engine: Option<Arc<dyn RecordingEngine>>,
    gate: Mutex<WorkflowInner>,
    state_tx: watch::Sender<RecordingState>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl RecordingWorkflow {
    /// Build a workflow with the standard engines.
    ///
    /// Without a `capturer` only the segment engine is available.
    pub fn new(
        settings: RecordingSettings,
        windows: Arc<dyn WindowService>,
        chrome: Arc<dyn MaskEditingChrome>,
        capturer: Option<Arc<dyn WindowCapturer>>,
    ) -> Self {
        let locator = EncoderLocator::from_settings(&settings);
        let frame_pump_engine = capturer.map(|capturer| {
            Arc::new(FramePumpRecorder::new(capturer)) as Arc<dyn RecordingEngine>
        });
        let (state_tx, _) = watch::channel(RecordingState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            settings,
            windows,
            chrome,
            locator,
            segment_engine: Arc::new(SegmentRecorder::default()),
            frame_pump_engine,
            gate: Mutex::new(WorkflowInner {
                machine: RecordingStateMachine::new(),
                target: None,
                active: None,
                frame_pump_unavailable: false,
            }),
            state_tx,
            events,
        }
    }

    pub fn with_locator(mut self, locator: EncoderLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Replace the fallback engine.
    pub fn with_segment_engine(mut self, engine: Arc<dyn RecordingEngine>) -> Self {
        self.segment_engine = engine;
        self
    }

    /// Replace (or remove) the preferred engine.
    pub fn with_frame_pump_engine(mut self, engine: Option<Arc<dyn RecordingEngine>>) -> Self {
        self.frame_pump_engine = engine;
        self
    }

    /// Current state. Never waits on the command gate.
    pub fn state(&self) -> RecordingState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Select the window to record and open mask editing over it.
    ///
    /// `WindowHandle::NONE` auto-selects the least recently maximized
    /// candidate.
    pub async fn start_mask_editing(&self, target: WindowHandle) {
        let mut inner = self.gate.lock().await;
        if !self.permits(&inner, RecordingWorkflowAction::StartMaskEditing) {
            return;
        }

        let window = if target.is_none() {
            match self.windows.capture_candidates().await {
                Ok(candidates) => select_capture_candidate(&candidates),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to list capture candidates");
                    None
                }
            }
        } else {
            Some(target)
        };
        let Some(window) = window else {
            self.notify("No window available to record").await;
            return;
        };

        let capture_bounds = self
            .query_rect("client area", self.windows.client_area_screen_bounds(window).await);
        let monitor_bounds = self
            .query_rect("monitor", self.windows.monitor_bounds_for_window(window).await);
        if capture_bounds.is_empty() || monitor_bounds.is_empty() {
            tracing::warn!(%window, ?capture_bounds, ?monitor_bounds, "Empty target bounds");
            self.notify("Cannot determine target client area").await;
            return;
        }

        self.chrome
            .show_mask_editing(monitor_bounds, capture_bounds)
            .await;
        inner.target = Some(CaptureTarget {
            window,
            capture_bounds,
        });
        self.transition(&mut inner, RecordingWorkflowAction::StartMaskEditing);
        tracing::info!(%window, ?capture_bounds, "Mask editing started");
    }

    /// Resolve the encoder and start recording the selected target.
    pub async fn start_recording(&self) {
        let mut inner = self.gate.lock().await;
        if !self.permits(&inner, RecordingWorkflowAction::StartRecording) {
            return;
        }
        let Some(target) = inner.target else {
            self.notify("No capture target selected").await;
            return;
        };

        let progress = self.install_progress_reporter();
        let encoder_path = match self.locator.resolve(Some(&progress)).await {
            Ok((path, source)) => {
                if source == EncoderSource::Downloaded {
                    self.notify("Encoder installed").await;
                }
                path
            }
            Err(e) => {
                tracing::error!(error = %e, "Encoder resolution failed");
                self.notify(&format!("Cannot start recording: {e}")).await;
                return;
            }
        };

        let window_bounds = match self.windows.window_bounds(target.window).await {
            Ok(bounds) if !bounds.is_empty() => bounds,
            _ => target.capture_bounds,
        };
        let desktop_bounds = match self.windows.virtual_desktop_bounds().await {
            Ok(bounds) if !bounds.is_empty() => bounds,
            _ => target.capture_bounds,
        };
        let request = EngineStartRequest {
            window: target.window,
            capture_bounds: target.capture_bounds,
            window_bounds,
            desktop_bounds,
            profile: RecordingProfile::from_settings(&self.settings),
            output_folder: self.settings.output_folder.clone(),
            encoder_path,
        };

        match self.start_engine(&mut inner, &request).await {
            Ok(engine) => {
                let name = engine.name();
                inner.active = Some(engine);
                self.transition(&mut inner, RecordingWorkflowAction::StartRecording);
                self.chrome.enter_recording_mode().await;
                self.notify(&format!("Recording started ({name} engine)")).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Recording failed to start");
                self.notify(&format!("Failed to start recording: {e}")).await;
            }
        }
    }

    pub async fn pause(&self) {
        let mut inner = self.gate.lock().await;
        if !self.permits(&inner, RecordingWorkflowAction::Pause) {
            return;
        }
        let Some(engine) = inner.active.clone() else {
            return;
        };

        if let Err(e) = engine.pause().await {
            tracing::error!(error = %e, engine = engine.name(), "Pause failed");
            self.notify(&format!("Failed to pause: {e}")).await;
            return;
        }
        self.transition(&mut inner, RecordingWorkflowAction::Pause);
        self.chrome.enter_pause_edit_mode().await;
        self.notify("Recording paused").await;
    }

    pub async fn resume(&self) {
        let mut inner = self.gate.lock().await;
        if !self.permits(&inner, RecordingWorkflowAction::Resume) {
            return;
        }
        let Some(engine) = inner.active.clone() else {
            return;
        };

        self.chrome.re_enter_recording_mode().await;
        if let Err(e) = engine.resume().await {
            tracing::error!(error = %e, engine = engine.name(), "Resume failed");
            self.chrome.enter_pause_edit_mode().await;
            self.notify(&format!("Failed to resume: {e}")).await;
            return;
        }
        self.transition(&mut inner, RecordingWorkflowAction::Resume);
        self.notify("Recording resumed").await;
    }

    /// Finish the recording. With `save == false` everything is discarded.
    ///
    /// Returns the published recording when one was saved.
    pub async fn stop(&self, save: bool) -> Option<FinishedRecording> {
        let mut inner = self.gate.lock().await;
        let action = if save {
            RecordingWorkflowAction::StopSaveBegin
        } else {
            RecordingWorkflowAction::StopDiscard
        };
        if !self.permits(&inner, action) {
            return None;
        }

        let engine = inner.active.take();
        if !save {
            if let Some(engine) = engine {
                engine.abort().await;
            }
            self.chrome.close().await;
            inner.target = None;
            self.transition(&mut inner, RecordingWorkflowAction::StopDiscard);
            self.notify("Recording discarded").await;
            return None;
        }

        self.transition(&mut inner, RecordingWorkflowAction::StopSaveBegin);
        let masks = self.chrome.mask_rects_px().await;
        let result = match engine {
            Some(engine) => engine.stop(&masks).await,
            None => Err(RdtileError::workflow("No active recording engine")),
        };
        self.chrome.close().await;
        inner.target = None;
        if !self.transition(&mut inner, RecordingWorkflowAction::CompleteSaving) {
            inner.machine.reset();
            self.state_tx.send_replace(RecordingState::Idle);
        }

        match result {
            Ok(finished) => {
                let mut message = match &finished.masking {
                    MaskingOutcome::Degraded { reason } => format!(
                        "Saved {} without masks (masking failed: {reason})",
                        finished.path.display()
                    ),
                    _ => format!("Saved {}", finished.path.display()),
                };
                if finished.is_partial() {
                    let kept = finished
                        .unjoined_segments
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    message.push_str(&format!(
                        "; segments that could not be joined were kept: {kept}"
                    ));
                }
                tracing::info!(path = %finished.path.display(), masking = ?finished.masking, "Recording saved");
                self.notify(&message).await;
                Some(finished)
            }
            Err(e) => {
                tracing::error!(error = %e, "Recording could not be saved");
                self.notify(&format!("Failed to save recording: {e}")).await;
                None
            }
        }
    }

    /// Abandon whatever is in progress and return to idle.
    pub async fn cancel(&self) {
        let mut inner = self.gate.lock().await;
        if !self.permits(&inner, RecordingWorkflowAction::Cancel) {
            return;
        }
        if let Some(engine) = inner.active.take() {
            engine.abort().await;
        }
        self.chrome.close().await;
        inner.target = None;
        self.transition(&mut inner, RecordingWorkflowAction::Cancel);
        self.notify("Recording cancelled").await;
    }

    async fn start_engine(
        &self,
        inner: &mut WorkflowInner,
        request: &EngineStartRequest,
    ) -> RdtileResult<Arc<dyn RecordingEngine>> {
        if self.settings.prefer_frame_pump && !inner.frame_pump_unavailable {
            if let Some(engine) = &self.frame_pump_engine {
                match engine.start(request).await {
                    Ok(()) => return Ok(engine.clone()),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            fallback = self.segment_engine.name(),
                            "Preferred engine failed to start; disabling it"
                        );
                        inner.frame_pump_unavailable = true;
                        engine.abort().await;
                    }
                }
            }
        }

        self.segment_engine.start(request).await?;
        Ok(self.segment_engine.clone())
    }

    fn permits(&self, inner: &WorkflowInner, action: RecordingWorkflowAction) -> bool {
        if inner.machine.can_execute(action) {
            return true;
        }
        tracing::debug!(
            ?action,
            state = ?inner.machine.state(),
            allowed = ?inner.machine.allowed_states(action),
            "Ignoring command not valid in the current state"
        );
        false
    }

    fn transition(&self, inner: &mut WorkflowInner, action: RecordingWorkflowAction) -> bool {
        let result = inner.machine.try_transition(action);
        if !result.success {
            tracing::warn!(?action, state = ?result.previous, "Transition rejected");
            return false;
        }
        tracing::info!(?action, from = ?result.previous, to = ?result.next, "Workflow state changed");
        self.state_tx.send_replace(result.next);
        let _ = self.events.send(WorkflowEvent::StateChanged(result.next));
        true
    }

    async fn notify(&self, message: &str) {
        tracing::info!(status = message, "Workflow status");
        let _ = self.events.send(WorkflowEvent::Message(message.to_string()));
        self.chrome.show_status(message).await;
    }

    fn query_rect(&self, what: &str, result: RdtileResult<Rect>) -> Rect {
        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, query = what, "Window query failed");
            Rect::default()
        })
    }

    fn install_progress_reporter(&self) -> InstallProgressCallback {
        let events = self.events.clone();
        let last_percent = AtomicU8::new(u8::MAX);
        Box::new(move |progress: InstallProgress| {
            if let (InstallStage::Downloading, Some(percent)) = (progress.stage, progress.percent()) {
                if last_percent.swap(percent, Ordering::Relaxed) == percent {
                    return;
                }
            }
            let message = match progress.percent() {
                Some(percent) => format!("Downloading encoder... {percent}%"),
                None => format!(
                    "Downloading encoder... {} KiB",
                    progress.downloaded_bytes / 1024
                ),
            };
            let _ = events.send(WorkflowEvent::Message(message));
        })
    }
}
