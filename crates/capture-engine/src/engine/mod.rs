//! Recording engines.
//!
//! The workflow drives exactly two engines through [`RecordingEngine`]:
//! [`segment::SegmentRecorder`] (screen grab to disk, one file per
//! pause/resume cycle) and [`frame_pump::FramePumpRecorder`] (window
//! bitmaps streamed into one encoder).

pub mod frame_pump;
pub mod segment;

use rdtile_common::error::RdtileResult;
use rdtile_platform_core::MaskRect;

use crate::session::{EngineStartRequest, FinishedRecording};

/// Capability set shared by both engines.
///
/// Implementations serialize their own operations; callers may hold an
/// `Arc<dyn RecordingEngine>` across tasks.
#[async_trait::async_trait]
pub trait RecordingEngine: Send + Sync {
    /// Short engine name for logs and status messages.
    fn name(&self) -> &'static str;

    /// Begin a recording. Fails if one is already running.
    async fn start(&self, request: &EngineStartRequest) -> RdtileResult<()>;

    async fn pause(&self) -> RdtileResult<()>;

    async fn resume(&self) -> RdtileResult<()>;

    /// Finish the recording and publish the final file.
    ///
    /// `masks` are relative to the requested capture region.
    async fn stop(&self, masks: &[MaskRect]) -> RdtileResult<FinishedRecording>;

    /// Kill the encoder and delete everything recorded so far.
    async fn abort(&self);

    fn is_running(&self) -> bool;
}
