//! Recording workflow state machine.
//!
//! Pure and synchronous. Every workflow command maps to one
//! [`RecordingWorkflowAction`] with a fixed target state and a fixed set of
//! states it may be issued from.

use serde::{Deserialize, Serialize};

/// Where the recording workflow currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordingState {
    #[default]
    Idle,
    MaskEditing,
    Recording,
    Paused,
    Saving,
}

/// Commands that move the workflow between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordingWorkflowAction {
    StartMaskEditing,
    StartRecording,
    Pause,
    Resume,
    StopSaveBegin,
    CompleteSaving,
    StopDiscard,
    Cancel,
}

impl RecordingWorkflowAction {
    pub const ALL: [RecordingWorkflowAction; 8] = [
        RecordingWorkflowAction::StartMaskEditing,
        RecordingWorkflowAction::StartRecording,
        RecordingWorkflowAction::Pause,
        RecordingWorkflowAction::Resume,
        RecordingWorkflowAction::StopSaveBegin,
        RecordingWorkflowAction::CompleteSaving,
        RecordingWorkflowAction::StopDiscard,
        RecordingWorkflowAction::Cancel,
    ];

    /// States this action may be issued from.
    pub fn allowed_states(self) -> &'static [RecordingState] {
        use RecordingState::*;
        match self {
            RecordingWorkflowAction::StartMaskEditing => &[Idle],
            RecordingWorkflowAction::StartRecording => &[MaskEditing],
            RecordingWorkflowAction::Pause => &[Recording],
            RecordingWorkflowAction::Resume => &[Paused],
            RecordingWorkflowAction::StopSaveBegin => &[Recording, Paused],
            RecordingWorkflowAction::CompleteSaving => &[Saving],
            RecordingWorkflowAction::StopDiscard => &[Recording, Paused],
            RecordingWorkflowAction::Cancel => &[MaskEditing, Recording, Paused, Saving],
        }
    }

    /// State reached when the action succeeds.
    pub fn target(self) -> RecordingState {
        match self {
            RecordingWorkflowAction::StartMaskEditing => RecordingState::MaskEditing,
            RecordingWorkflowAction::StartRecording => RecordingState::Recording,
            RecordingWorkflowAction::Pause => RecordingState::Paused,
            RecordingWorkflowAction::Resume => RecordingState::Recording,
            RecordingWorkflowAction::StopSaveBegin => RecordingState::Saving,
            RecordingWorkflowAction::CompleteSaving
            | RecordingWorkflowAction::StopDiscard
            | RecordingWorkflowAction::Cancel => RecordingState::Idle,
        }
    }
}

/// Outcome of [`RecordingStateMachine::try_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionResult {
    pub success: bool,
    pub previous: RecordingState,
    /// Equal to `previous` when the transition was rejected.
    pub next: RecordingState,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingStateMachine {
    state: RecordingState,
}

impl RecordingStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn can_execute(&self, action: RecordingWorkflowAction) -> bool {
        action.allowed_states().contains(&self.state)
    }

    /// Source states `action` is legal from, for rejection diagnostics.
    pub fn allowed_states(&self, action: RecordingWorkflowAction) -> &'static [RecordingState] {
        action.allowed_states()
    }

    /// Apply `action` if it is legal from the current state.
    pub fn try_transition(&mut self, action: RecordingWorkflowAction) -> TransitionResult {
        let previous = self.state;
        if !self.can_execute(action) {
            return TransitionResult {
                success: false,
                previous,
                next: previous,
            };
        }
        self.state = action.target();
        TransitionResult {
            success: true,
            previous,
            next: self.state,
        }
    }

    /// Force the machine back to `Idle`.
    pub fn reset(&mut self) {
        self.state = RecordingState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use RecordingWorkflowAction::*;

    const ALL_STATES: [RecordingState; 5] = [
        RecordingState::Idle,
        RecordingState::MaskEditing,
        RecordingState::Recording,
        RecordingState::Paused,
        RecordingState::Saving,
    ];

    fn machine_at(state: RecordingState) -> RecordingStateMachine {
        RecordingStateMachine { state }
    }

    #[test]
    fn test_happy_path_passes_through_saving() {
        let mut machine = RecordingStateMachine::new();
        let mut visited = vec![machine.state()];
        for action in [StartMaskEditing, StartRecording, Pause, Resume, StopSaveBegin, CompleteSaving] {
            let result = machine.try_transition(action);
            assert!(result.success, "{action:?} rejected from {:?}", result.previous);
            visited.push(result.next);
        }
        assert_eq!(
            visited,
            vec![
                RecordingState::Idle,
                RecordingState::MaskEditing,
                RecordingState::Recording,
                RecordingState::Paused,
                RecordingState::Recording,
                RecordingState::Saving,
                RecordingState::Idle,
            ]
        );
    }

    #[test]
    fn test_cancel_legal_from_every_active_state() {
        for state in ALL_STATES {
            let mut machine = machine_at(state);
            let result = machine.try_transition(Cancel);
            assert_eq!(result.success, state != RecordingState::Idle, "from {state:?}");
            assert_eq!(machine.state(), RecordingState::Idle);
        }
    }

    #[test]
    fn test_rejected_transition_keeps_state() {
        let mut machine = RecordingStateMachine::new();
        let result = machine.try_transition(Pause);
        assert_eq!(
            result,
            TransitionResult {
                success: false,
                previous: RecordingState::Idle,
                next: RecordingState::Idle,
            }
        );
        assert_eq!(machine.allowed_states(Pause), &[RecordingState::Recording]);
    }

    #[test]
    fn test_stop_requires_active_capture() {
        for state in [RecordingState::Idle, RecordingState::MaskEditing, RecordingState::Saving] {
            let machine = machine_at(state);
            assert!(!machine.can_execute(StopSaveBegin));
            assert!(!machine.can_execute(StopDiscard));
        }
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut machine = machine_at(RecordingState::Saving);
        machine.reset();
        assert_eq!(machine.state(), RecordingState::Idle);
    }

    fn action_strategy() -> impl Strategy<Value = RecordingWorkflowAction> {
        (0..RecordingWorkflowAction::ALL.len()).prop_map(|i| RecordingWorkflowAction::ALL[i])
    }

    proptest! {
        #[test]
        fn transitions_follow_table(actions in proptest::collection::vec(action_strategy(), 0..64)) {
            let mut machine = RecordingStateMachine::new();
            for action in actions {
                let before = machine.state();
                let legal = action.allowed_states().contains(&before);
                let result = machine.try_transition(action);

                prop_assert_eq!(result.success, legal);
                prop_assert_eq!(result.previous, before);
                if legal {
                    prop_assert_eq!(result.next, action.target());
                } else {
                    prop_assert_eq!(result.next, before);
                }
                prop_assert_eq!(machine.state(), result.next);
            }
        }

        #[test]
        fn saving_only_ends_in_idle(actions in proptest::collection::vec(action_strategy(), 0..64)) {
            let mut machine = RecordingStateMachine::new();
            for action in actions {
                let before = machine.state();
                let result = machine.try_transition(action);
                if before == RecordingState::Saving && result.success {
                    prop_assert_eq!(result.next, RecordingState::Idle);
                }
                if result.success && result.next == RecordingState::Saving {
                    prop_assert!(matches!(before, RecordingState::Recording | RecordingState::Paused));
                }
            }
        }
    }
}
