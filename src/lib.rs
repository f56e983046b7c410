// On-device listening and inference runtime for the Ari voice assistant
//
// Coordinates the always-on keyword detector, transient speech-capture
// sessions, and the local-model inference session around the two exclusive
// resources: the microphone and the resident model weights.

// Enable coverage attribute on nightly for explicit exclusions
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod audio;
mod capture;
mod events;
mod inference;
mod listening;
mod paths;
mod picker;
mod runtime;

pub use audio::{MicError, MicGuard, MicOwner, Microphone};
pub use capture::{
    CaptureError, CaptureErrorCode, CaptureEvent, CaptureSink, RecognitionBackend,
    SpeechCaptureSession,
};
pub use events::{
    current_timestamp, event_names, CaptureErrorPayload, CaptureEventEmitter, CaptureFinalPayload,
    CapturePartialPayload, CaptureReadyPayload, ListeningEventEmitter,
    ListeningStateChangedPayload, WakeDetectedPayload,
};
pub use inference::{
    EngineError, GenerationRequest, InferenceEngine, InferenceError, LocalInferenceSession,
    ModelHandle, ModelStatus,
};
pub use listening::{
    AudioKeywordDetector, CoordinatorError, DetectorConfig, DetectorError, EnvironmentSignal,
    KeywordSource, ListeningCoordinator, ListeningState, ListeningStateError, ListeningStatus,
    PauseReason, SpotterEngine, SpotterEngineFactory, SpotterError, WakeEvent, WakeSink,
};
pub use paths::{resolve_uri, PathsError, RuntimePaths};
pub use picker::{PickError, PickSlot};
pub use runtime::{AssistantRuntime, ModelInfo};

// Re-export log macros for use throughout the crate
pub use log::{debug, error, info, trace, warn};
