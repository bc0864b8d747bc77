//! rdtile recording workflow.
//!
//! Ties the pieces together:
//!
//! - [`state`]: the pure state machine every command is validated against
//! - [`chrome`]: the overlay the user edits masks on
//! - [`orchestrator`]: serializes commands, resolves the encoder, picks an
//!   engine and publishes [`orchestrator::WorkflowEvent`]s

pub mod chrome;
pub mod orchestrator;
pub mod state;

pub use chrome::MaskEditingChrome;
pub use orchestrator::{RecordingWorkflow, WorkflowEvent};
pub use state::{RecordingState, RecordingStateMachine, RecordingWorkflowAction, TransitionResult};
