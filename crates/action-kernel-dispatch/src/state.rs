use serde::Serialize;
use std::fmt;

/// Lifecycle of a single dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    Received,
    PolicyCheck,
    InputValidated,
    Executing,
    OutputValidated,
    Completed,
    Denied,
    InputInvalid,
    ExecFailed,
    OutputInvalid,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchState::Completed
                | DispatchState::Denied
                | DispatchState::InputInvalid
                | DispatchState::ExecFailed
                | DispatchState::OutputInvalid
        )
    }

    /// Legal next states
    pub fn can_transition_to(&self, next: DispatchState) -> bool {
        use DispatchState::*;
        matches!(
            (self, next),
            (Received, PolicyCheck)
                | (Received, Denied)
                | (PolicyCheck, InputValidated)
                | (PolicyCheck, Denied)
                | (PolicyCheck, InputInvalid)
                | (InputValidated, Executing)
                | (Executing, OutputValidated)
                | (Executing, ExecFailed)
                | (Executing, OutputInvalid)
                | (OutputValidated, Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchState::Received => "RECEIVED",
            DispatchState::PolicyCheck => "POLICY_CHECK",
            DispatchState::InputValidated => "INPUT_VALIDATED",
            DispatchState::Executing => "EXECUTING",
            DispatchState::OutputValidated => "OUTPUT_VALIDATED",
            DispatchState::Completed => "COMPLETED",
            DispatchState::Denied => "DENIED",
            DispatchState::InputInvalid => "INPUT_INVALID",
            DispatchState::ExecFailed => "EXEC_FAILED",
            DispatchState::OutputInvalid => "OUTPUT_INVALID",
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one dispatch, advanced only along legal edges
#[derive(Debug)]
pub(crate) struct StateTracker {
    action_id: String,
    state: DispatchState,
}

impl StateTracker {
    pub(crate) fn new(action_id: &str) -> Self {
        Self {
            action_id: action_id.to_string(),
            state: DispatchState::Received,
        }
    }

    pub(crate) fn state(&self) -> DispatchState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: DispatchState) {
        if self.state.can_transition_to(next) {
            tracing::debug!(action_id = %self.action_id, from = %self.state, to = %next, "Dispatch state");
            self.state = next;
        } else {
            tracing::error!(
                action_id = %self.action_id,
                from = %self.state,
                to = %next,
                "Illegal dispatch transition ignored"
            );
        }
    }
}
