use super::*;
use std::sync::{Arc, Mutex};

/// Mock emitter that records all emitted events for testing
#[derive(Default)]
pub struct MockEventEmitter {
    pub wake_events: Arc<Mutex<Vec<WakeDetectedPayload>>>,
    pub state_events: Arc<Mutex<Vec<ListeningStateChangedPayload>>>,
    pub ready_events: Arc<Mutex<Vec<CaptureReadyPayload>>>,
    pub partial_events: Arc<Mutex<Vec<CapturePartialPayload>>>,
    pub final_events: Arc<Mutex<Vec<CaptureFinalPayload>>>,
    pub error_events: Arc<Mutex<Vec<CaptureErrorPayload>>>,
}

impl MockEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ListeningEventEmitter for MockEventEmitter {
    fn emit_wake_detected(&self, payload: WakeDetectedPayload) {
        self.wake_events.lock().unwrap().push(payload);
    }

    fn emit_listening_state_changed(&self, payload: ListeningStateChangedPayload) {
        self.state_events.lock().unwrap().push(payload);
    }
}

impl CaptureEventEmitter for MockEventEmitter {
    fn emit_capture_ready(&self, payload: CaptureReadyPayload) {
        self.ready_events.lock().unwrap().push(payload);
    }

    fn emit_capture_partial(&self, payload: CapturePartialPayload) {
        self.partial_events.lock().unwrap().push(payload);
    }

    fn emit_capture_final(&self, payload: CaptureFinalPayload) {
        self.final_events.lock().unwrap().push(payload);
    }

    fn emit_capture_error(&self, payload: CaptureErrorPayload) {
        self.error_events.lock().unwrap().push(payload);
    }
}

#[test]
fn test_current_timestamp_is_iso8601() {
    let timestamp = current_timestamp();
    assert!(timestamp.contains('T'));
    assert!(chrono::DateTime::parse_from_rfc3339(&timestamp).is_ok());
}

#[test]
fn test_capture_payloads_serialize_camel_case() {
    let payload = CaptureFinalPayload {
        session_id: Uuid::nil(),
        text: "turn off the lights".to_string(),
    };
    let json = serde_json::to_string(&payload).unwrap();
    assert!(json.contains("\"sessionId\""));
    assert!(json.contains("turn off the lights"));
}

#[test]
fn test_state_payload_serializes_state_name() {
    let payload = ListeningStateChangedPayload {
        state: ListeningState::Listening,
        timestamp: current_timestamp(),
    };
    let json = serde_json::to_string(&payload).unwrap();
    assert!(json.contains("Listening"));
}

#[test]
fn test_mock_emitter_records_events() {
    let emitter = MockEventEmitter::new();
    emitter.emit_wake_detected(WakeDetectedPayload {
        timestamp: current_timestamp(),
    });
    emitter.emit_capture_partial(CapturePartialPayload {
        session_id: Uuid::new_v4(),
        text: "turn off".to_string(),
    });

    assert_eq!(emitter.wake_events.lock().unwrap().len(), 1);
    assert_eq!(emitter.partial_events.lock().unwrap().len(), 1);
    assert!(emitter.final_events.lock().unwrap().is_empty());
}
