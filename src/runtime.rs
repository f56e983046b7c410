// Boundary facade for the collaborator layer
// Maps the wakeword/stt/llm method surface onto the core components

use crate::inference::{GenerationRequest, InferenceError, LocalInferenceSession};
use crate::listening::{
    CoordinatorError, DetectorConfig, EnvironmentSignal, ListeningCoordinator, ListeningStatus,
};
use crate::events::{CaptureEventEmitter, ListeningEventEmitter};
use crate::picker::{PickError, PickSlot};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

/// Model info in the shape the collaborator layer displays
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// "Loaded" or "Not loaded"
    pub status: String,
    /// URI of the resident model, if any
    pub uri: Option<String>,
    /// Size of the resident weights in whole megabytes
    pub size_mb: u64,
}

/// The assembled runtime behind the external method surface
///
/// Owns the listening coordinator, the inference session, and the single-slot
/// pick registers for keyword and model file requests.
pub struct AssistantRuntime<E>
where
    E: ListeningEventEmitter + CaptureEventEmitter + Send + Sync + 'static,
{
    coordinator: ListeningCoordinator<E>,
    inference: LocalInferenceSession,
    keyword_pick: PickSlot,
    model_pick: PickSlot,
}

impl<E> AssistantRuntime<E>
where
    E: ListeningEventEmitter + CaptureEventEmitter + Send + Sync + 'static,
{
    pub fn new(coordinator: ListeningCoordinator<E>, inference: LocalInferenceSession) -> Self {
        Self {
            coordinator,
            inference,
            keyword_pick: PickSlot::new(),
            model_pick: PickSlot::new(),
        }
    }

    // ---- wakeword control plane ----

    /// wakeword.start
    pub fn wakeword_start(&self, config: DetectorConfig) -> Result<(), CoordinatorError> {
        self.coordinator.start_listening(config)
    }

    /// wakeword.stop
    pub fn wakeword_stop(&self) {
        self.coordinator.stop_listening();
    }

    /// wakeword.pause
    pub fn wakeword_pause(&self) -> Result<(), CoordinatorError> {
        self.coordinator.pause()
    }

    /// wakeword.resume
    pub fn wakeword_resume(&self) -> Result<(), CoordinatorError> {
        self.coordinator.resume()
    }

    /// wakeword.pickKeywordFile
    ///
    /// Registers a pick request; the receiver resolves once the collaborator
    /// layer reports the chosen URI (or `None` on cancellation).
    pub fn pick_keyword_file(&self) -> Result<oneshot::Receiver<Option<String>>, PickError> {
        self.keyword_pick.begin()
    }

    /// Completion callback for a keyword-file pick
    pub fn complete_keyword_pick(&self, uri: Option<String>) -> bool {
        self.keyword_pick.complete(uri)
    }

    /// Environmental signal ingress (screen, battery)
    pub fn on_environment(&self, signal: EnvironmentSignal) {
        self.coordinator.handle_environment(signal);
    }

    /// Listening status for the collaborator layer
    pub fn listening_status(&self) -> ListeningStatus {
        self.coordinator.status()
    }

    // ---- stt control plane ----

    /// stt.start
    pub fn stt_start(&self) -> Result<(), CoordinatorError> {
        self.coordinator.start_capture()
    }

    /// stt.stop
    pub fn stt_stop(&self) {
        self.coordinator.stop_capture();
    }

    // ---- llm control plane ----

    /// llm.getModelInfo
    pub fn model_info(&self) -> ModelInfo {
        let status = self.inference.status();
        ModelInfo {
            status: if status.loaded { "Loaded" } else { "Not loaded" }.to_string(),
            size_mb: status.size_mb(),
            uri: status.source_uri,
        }
    }

    /// llm.loadModel
    pub fn load_model(&self, uri: &str) -> Result<(), InferenceError> {
        self.inference.load(uri).map(|_| ())
    }

    /// llm.unloadModel
    pub fn unload_model(&self) {
        self.inference.unload();
    }

    /// llm.getModelSizeMb
    ///
    /// Absent rather than an error when the URI cannot be read.
    pub fn model_size_mb(&self, uri: &str) -> Option<u64> {
        match self.inference.estimate_size(uri) {
            Ok(bytes) => Some(bytes / (1024 * 1024)),
            Err(e) => {
                crate::debug!("[runtime] Size estimation failed: {}", e);
                None
            }
        }
    }

    /// llm.rewrite
    ///
    /// Blocks for up to the request's wall-clock budget; call it off any
    /// thread that services audio callbacks.
    pub fn rewrite(&self, text: &str, config: &Map<String, Value>) -> String {
        let request = GenerationRequest::from_config(text, config);
        self.inference.generate(&request)
    }

    /// llm.pickModel
    pub fn pick_model(&self) -> Result<oneshot::Receiver<Option<String>>, PickError> {
        self.model_pick.begin()
    }

    /// Completion callback for a model pick
    pub fn complete_model_pick(&self, uri: Option<String>) -> bool {
        self.model_pick.complete(uri)
    }
}
