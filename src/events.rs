// Runtime events for the external collaborator layer
// Defines event payloads and emission traits for testability

use serde::Serialize;
use uuid::Uuid;

use crate::listening::ListeningState;

/// Event names as constants for consistency
pub mod event_names {
    pub const WAKE_DETECTED: &str = "wake_detected";
    pub const LISTENING_STATE_CHANGED: &str = "listening_state_changed";
    pub const CAPTURE_READY: &str = "capture_ready";
    pub const CAPTURE_PARTIAL: &str = "capture_partial";
    pub const CAPTURE_FINAL: &str = "capture_final";
    pub const CAPTURE_ERROR: &str = "capture_error";
}

/// Payload for wake_detected event
///
/// Exactly one of these is emitted per detection event.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WakeDetectedPayload {
    /// ISO 8601 timestamp of the detection
    pub timestamp: String,
}

/// Payload for listening_state_changed event
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListeningStateChangedPayload {
    /// The state the coordinator landed in
    pub state: ListeningState,
    /// ISO 8601 timestamp of the transition
    pub timestamp: String,
}

/// Payload for capture_ready event
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReadyPayload {
    /// Identifier of the capture session
    pub session_id: Uuid,
    /// ISO 8601 timestamp when the session became ready
    pub timestamp: String,
}

/// Payload for capture_partial event
///
/// Each partial supersedes the previous one; consumers keep only the latest.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapturePartialPayload {
    /// Identifier of the capture session
    pub session_id: Uuid,
    /// Current best recognition hypothesis
    pub text: String,
}

/// Payload for capture_final event
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureFinalPayload {
    /// Identifier of the capture session
    pub session_id: Uuid,
    /// Final recognized text for the utterance
    pub text: String,
}

/// Payload for capture_error event
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureErrorPayload {
    /// Identifier of the capture session
    pub session_id: Uuid,
    /// Stable error code string
    pub code: String,
}

/// Trait for emitting listening events
/// Allows mocking in tests while a real transport bridge is used in production
pub trait ListeningEventEmitter: Send + Sync {
    /// Emit wake_detected event
    fn emit_wake_detected(&self, payload: WakeDetectedPayload);

    /// Emit listening_state_changed event
    fn emit_listening_state_changed(&self, payload: ListeningStateChangedPayload);
}

/// Trait for emitting capture events
/// Allows mocking in tests while a real transport bridge is used in production
pub trait CaptureEventEmitter: Send + Sync {
    /// Emit capture_ready event
    fn emit_capture_ready(&self, payload: CaptureReadyPayload);

    /// Emit capture_partial event
    fn emit_capture_partial(&self, payload: CapturePartialPayload);

    /// Emit capture_final event
    fn emit_capture_final(&self, payload: CaptureFinalPayload);

    /// Emit capture_error event
    fn emit_capture_error(&self, payload: CaptureErrorPayload);
}

/// Get the current timestamp in ISO 8601 format
pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
#[path = "events_test.rs"]
pub(crate) mod tests;
