//! rdtile Capture Engine
//!
//! Records a live desktop region to a single video file by driving an
//! external encoder (ffmpeg). Two interchangeable engines implement
//! [`engine::RecordingEngine`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     RecordingEngine                      │
//! │  ┌──────────────────────┐   ┌─────────────────────────┐  │
//! │  │ SegmentRecorder      │   │ FramePumpRecorder       │  │
//! │  │ screen grab → file   │   │ window bitmap → stdin   │  │
//! │  │ one file per resume  │   │ pause gate, one process │  │
//! │  └──────────┬───────────┘   └────────────┬────────────┘  │
//! │             ▼                            ▼               │
//! │        concat (copy)                 raw output          │
//! │             └──────────► masking ◄───────┘               │
//! │                             │                            │
//! │                      rec_<stamp>.mp4                     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Shared pieces: [`process`] (bounded waits, graceful-then-forced
//! shutdown, stderr tail), [`encoder_args`] (argument builders),
//! [`masking`] (drawbox redaction pass) and [`locator`] (finding or
//! installing the encoder binary).

pub mod encoder_args;
pub mod engine;
pub mod locator;
pub mod masking;
pub mod process;
pub mod session;

pub use engine::frame_pump::{FramePumpRecorder, PauseGate};
pub use engine::segment::SegmentRecorder;
pub use engine::RecordingEngine;
pub use session::*;
