// Listening state machine for the coordination engine

use serde::Serialize;

/// Coordinator state
///
/// Exactly one instance exists, owned by the coordinator. All transitions are
/// validated and serialized; callbacks never interleave a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ListeningState {
    /// No detector built, nothing holds the microphone
    Idle,
    /// Keyword detector running against the live stream
    Listening,
    /// Detector built but stopped; microphone released
    Paused,
    /// A speech-capture session owns the microphone
    Capturing,
}

impl Default for ListeningState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Errors from state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListeningStateError {
    /// Invalid state transition attempted
    InvalidTransition {
        from: ListeningState,
        to: ListeningState,
    },
}

impl std::fmt::Display for ListeningStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListeningStateError::InvalidTransition { from, to } => {
                write!(f, "Invalid state transition from {:?} to {:?}", from, to)
            }
        }
    }
}

impl std::error::Error for ListeningStateError {}

impl ListeningState {
    /// Validate a transition out of this state
    ///
    /// Valid transitions:
    /// - Idle -> Listening (start), Idle -> Capturing (standalone capture)
    /// - Listening -> Paused | Capturing | Idle
    /// - Paused -> Listening | Capturing | Idle
    /// - Capturing -> Listening | Paused | Idle (pending intent decides)
    #[must_use = "this returns a Result that should be handled"]
    pub fn validate_transition(self, to: ListeningState) -> Result<(), ListeningStateError> {
        let valid = matches!(
            (self, to),
            (ListeningState::Idle, ListeningState::Listening)
                | (ListeningState::Idle, ListeningState::Capturing)
                | (ListeningState::Listening, ListeningState::Paused)
                | (ListeningState::Listening, ListeningState::Capturing)
                | (ListeningState::Listening, ListeningState::Idle)
                | (ListeningState::Paused, ListeningState::Listening)
                | (ListeningState::Paused, ListeningState::Capturing)
                | (ListeningState::Paused, ListeningState::Idle)
                | (ListeningState::Capturing, ListeningState::Listening)
                | (ListeningState::Capturing, ListeningState::Paused)
                | (ListeningState::Capturing, ListeningState::Idle)
        );

        if !valid {
            return Err(ListeningStateError::InvalidTransition { from: self, to });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        assert_eq!(ListeningState::default(), ListeningState::Idle);
    }

    #[test]
    fn test_idle_to_listening_is_valid() {
        assert!(ListeningState::Idle
            .validate_transition(ListeningState::Listening)
            .is_ok());
    }

    #[test]
    fn test_idle_to_paused_is_invalid() {
        let result = ListeningState::Idle.validate_transition(ListeningState::Paused);
        assert_eq!(
            result,
            Err(ListeningStateError::InvalidTransition {
                from: ListeningState::Idle,
                to: ListeningState::Paused,
            })
        );
    }

    #[test]
    fn test_listening_pause_resume_cycle() {
        assert!(ListeningState::Listening
            .validate_transition(ListeningState::Paused)
            .is_ok());
        assert!(ListeningState::Paused
            .validate_transition(ListeningState::Listening)
            .is_ok());
    }

    #[test]
    fn test_capture_roundtrip_from_listening() {
        assert!(ListeningState::Listening
            .validate_transition(ListeningState::Capturing)
            .is_ok());
        assert!(ListeningState::Capturing
            .validate_transition(ListeningState::Listening)
            .is_ok());
    }

    #[test]
    fn test_every_state_can_reach_idle() {
        for from in [
            ListeningState::Listening,
            ListeningState::Paused,
            ListeningState::Capturing,
        ] {
            assert!(from.validate_transition(ListeningState::Idle).is_ok());
        }
    }

    #[test]
    fn test_self_transitions_are_invalid() {
        for state in [
            ListeningState::Idle,
            ListeningState::Listening,
            ListeningState::Paused,
            ListeningState::Capturing,
        ] {
            assert!(state.validate_transition(state).is_err());
        }
    }

    #[test]
    fn test_state_serializes_as_name() {
        let json = serde_json::to_string(&ListeningState::Capturing).unwrap();
        assert_eq!(json, "\"Capturing\"");
    }
}
