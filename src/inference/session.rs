// Local inference session owning the resident model and the native engine
// Serializes load/unload/generate so weights never race a generation

use super::GenerationRequest;
use crate::paths::{resolve_uri, RuntimePaths};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Errors surfaced by the native inference engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineError(pub String);

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for EngineError {}

/// The native text-generation engine, consumed as an opaque capability
///
/// Implementations wrap the quantized-model runtime. The session guarantees
/// calls never overlap; the engine does not need its own locking.
pub trait InferenceEngine: Send {
    /// One-time runtime initialization; called at most once per session
    fn init(&mut self) -> Result<(), EngineError>;

    /// Load weights from the materialized working file
    fn load_weights(&mut self, path: &Path) -> Result<(), EngineError>;

    /// Bounded generation; must return control once the request's wall-clock
    /// budget elapses even if the token budget was not reached
    fn generate(&mut self, request: &GenerationRequest) -> Result<String, EngineError>;

    /// Free native resources; safe to call when nothing is loaded
    fn release(&mut self);
}

/// Errors from inference session operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    /// Materialization, engine init, or weight loading failed
    #[error("Model load failed: {0}")]
    LoadFailed(String),
    /// The source URI cannot be read
    #[error("Source unreadable: {0}")]
    Unreadable(String),
    /// Internal lock error
    #[error("Failed to acquire inference session lock")]
    LockError,
}

/// The resident model, at most one at a time
#[derive(Debug, Clone, PartialEq)]
pub struct ModelHandle {
    /// URI the model was loaded from
    pub source_uri: String,
    /// Materialized working file consumed by the engine
    pub local_path: PathBuf,
    /// Size of the materialized weights
    pub size_bytes: u64,
    /// Whether the engine holds these weights
    pub loaded: bool,
}

/// Status snapshot for the collaborator layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    /// Whether a model is resident
    pub loaded: bool,
    /// URI of the resident model, if any
    pub source_uri: Option<String>,
    /// Size of the resident weights in bytes, 0 when unloaded
    pub size_bytes: u64,
}

impl ModelStatus {
    /// Whole megabytes, the unit the collaborator layer displays
    pub fn size_mb(&self) -> u64 {
        self.size_bytes / (1024 * 1024)
    }
}

struct SessionInner {
    engine: Box<dyn InferenceEngine>,
    handle: Option<ModelHandle>,
    engine_initialized: bool,
}

/// Session hosting the quantized model for on-device text generation
///
/// One mutex serializes every operation: no generation overlaps another, and
/// load/unload never race a generation in flight. `generate` never fails
/// outward; any engine fault degrades to echoing the input.
pub struct LocalInferenceSession {
    inner: Mutex<SessionInner>,
    paths: RuntimePaths,
}

impl LocalInferenceSession {
    pub fn new(engine: Box<dyn InferenceEngine>, paths: RuntimePaths) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                engine,
                handle: None,
                engine_initialized: false,
            }),
            paths,
        }
    }

    /// Snapshot of the resident model state
    pub fn status(&self) -> ModelStatus {
        match self.inner.lock() {
            Ok(inner) => match &inner.handle {
                Some(handle) => ModelStatus {
                    loaded: handle.loaded,
                    source_uri: Some(handle.source_uri.clone()),
                    size_bytes: handle.size_bytes,
                },
                None => ModelStatus {
                    loaded: false,
                    source_uri: None,
                    size_bytes: 0,
                },
            },
            Err(_) => ModelStatus {
                loaded: false,
                source_uri: None,
                size_bytes: 0,
            },
        }
    }

    /// Load a model from `uri`, replacing any resident model
    ///
    /// Unloads the previous model first, materializes the source into the
    /// single working slot (overwriting whatever was there), initializes the
    /// engine runtime on first use, then hands the weights to the engine. On
    /// any failure the session is left unloaded and status reflects it.
    pub fn load(&self, uri: &str) -> Result<ModelHandle, InferenceError> {
        let mut inner = self.inner.lock().map_err(|_| InferenceError::LockError)?;

        if inner.handle.is_some() {
            Self::unload_locked(&mut inner, &self.paths);
        }

        self.paths
            .ensure_exists()
            .map_err(|e| InferenceError::LoadFailed(e.to_string()))?;

        let source = resolve_uri(uri).map_err(|e| InferenceError::LoadFailed(e.to_string()))?;
        let slot = self.paths.model_slot();
        fs::copy(&source, &slot).map_err(|e| {
            InferenceError::LoadFailed(format!("{}: {}", source.display(), e))
        })?;
        let size_bytes = fs::metadata(&slot)
            .map_err(|e| InferenceError::LoadFailed(e.to_string()))?
            .len();

        if !inner.engine_initialized {
            inner
                .engine
                .init()
                .map_err(|e| InferenceError::LoadFailed(format!("engine init: {}", e)))?;
            inner.engine_initialized = true;
        }

        inner
            .engine
            .load_weights(&slot)
            .map_err(|e| InferenceError::LoadFailed(e.to_string()))?;

        let handle = ModelHandle {
            source_uri: uri.to_string(),
            local_path: slot,
            size_bytes,
            loaded: true,
        };
        inner.handle = Some(handle.clone());
        crate::info!(
            "[inference] Model loaded from {} ({} MB)",
            uri,
            size_bytes / (1024 * 1024)
        );
        Ok(handle)
    }

    /// Release the resident model and delete the working file
    ///
    /// Safe to call when nothing is loaded.
    pub fn unload(&self) {
        match self.inner.lock() {
            Ok(mut inner) => Self::unload_locked(&mut inner, &self.paths),
            Err(_) => crate::error!("[inference] Unload skipped, session lock poisoned"),
        }
    }

    /// Size in bytes of the content behind `uri`, without loading it
    pub fn estimate_size(&self, uri: &str) -> Result<u64, InferenceError> {
        let source = resolve_uri(uri).map_err(|e| InferenceError::Unreadable(e.to_string()))?;
        let metadata = fs::metadata(&source)
            .map_err(|e| InferenceError::Unreadable(format!("{}: {}", source.display(), e)))?;
        Ok(metadata.len())
    }

    /// Rewrite `request.text` with the resident model
    ///
    /// Never fails outward: with no model loaded, or on any engine fault or
    /// empty engine output, the original input is returned unchanged. Blocks
    /// the caller for up to the request's wall-clock budget; invoke it off
    /// threads that service audio callbacks.
    pub fn generate(&self, request: &GenerationRequest) -> String {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => {
                crate::error!("[inference] Generate skipped, session lock poisoned");
                return request.text.clone();
            }
        };

        if inner.handle.is_none() {
            crate::debug!("[inference] Generate with no model loaded, echoing input");
            return request.text.clone();
        }

        match inner.engine.generate(request) {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => {
                crate::warn!("[inference] Engine returned empty output, echoing input");
                request.text.clone()
            }
            Err(e) => {
                crate::warn!("[inference] Generation failed, echoing input: {}", e);
                request.text.clone()
            }
        }
    }

    fn unload_locked(inner: &mut SessionInner, paths: &RuntimePaths) {
        inner.engine.release();
        inner.handle = None;
        let slot = paths.model_slot();
        if slot.exists() {
            if let Err(e) = fs::remove_file(&slot) {
                crate::warn!("[inference] Failed to delete working file: {}", e);
            }
        }
        crate::info!("[inference] Model unloaded");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Inference engine mock with injectable failures
    pub(crate) struct MockInferenceEngine {
        pub fail_init: bool,
        pub fail_load: bool,
        pub fail_generate: Arc<AtomicBool>,
        pub empty_output: bool,
        pub generate_delay: Option<Duration>,
        pub init_calls: Arc<AtomicUsize>,
        pub release_calls: Arc<AtomicUsize>,
        pub loaded_paths: Arc<Mutex<Vec<PathBuf>>>,
        pub call_log: Arc<Mutex<Vec<String>>>,
    }

    impl MockInferenceEngine {
        pub fn new() -> Self {
            Self {
                fail_init: false,
                fail_load: false,
                fail_generate: Arc::new(AtomicBool::new(false)),
                empty_output: false,
                generate_delay: None,
                init_calls: Arc::new(AtomicUsize::new(0)),
                release_calls: Arc::new(AtomicUsize::new(0)),
                loaded_paths: Arc::new(Mutex::new(Vec::new())),
                call_log: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl InferenceEngine for MockInferenceEngine {
        fn init(&mut self) -> Result<(), EngineError> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(EngineError("init rejected".to_string()));
            }
            Ok(())
        }

        fn load_weights(&mut self, path: &Path) -> Result<(), EngineError> {
            if self.fail_load {
                return Err(EngineError("weights rejected".to_string()));
            }
            self.loaded_paths.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        fn generate(&mut self, request: &GenerationRequest) -> Result<String, EngineError> {
            self.call_log
                .lock()
                .unwrap()
                .push(format!("begin:{}", request.text));
            if let Some(delay) = self.generate_delay {
                std::thread::sleep(delay);
            }
            self.call_log
                .lock()
                .unwrap()
                .push(format!("end:{}", request.text));
            if self.fail_generate.load(Ordering::SeqCst) {
                return Err(EngineError("native fault".to_string()));
            }
            if self.empty_output {
                return Ok(String::new());
            }
            Ok(format!("rewritten: {}", request.text))
        }

        fn release(&mut self) {
            self.release_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session_with(
        engine: MockInferenceEngine,
        root: &Path,
    ) -> LocalInferenceSession {
        LocalInferenceSession::new(Box::new(engine), RuntimePaths::at(root))
    }

    fn write_model(root: &Path, name: &str, contents: &[u8]) -> String {
        let path = root.join(name);
        fs::write(&path, contents).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_new_session_reports_not_loaded() {
        let root = tempfile::tempdir().unwrap();
        let session = session_with(MockInferenceEngine::new(), &root.path().join("data"));
        let status = session.status();
        assert!(!status.loaded);
        assert_eq!(status.source_uri, None);
        assert_eq!(status.size_bytes, 0);
        assert_eq!(status.size_mb(), 0);
    }

    #[test]
    fn test_load_materializes_into_working_slot() {
        let root = tempfile::tempdir().unwrap();
        let uri = write_model(root.path(), "model.gguf", b"weights-v1");
        let paths = RuntimePaths::at(root.path().join("data"));
        let session =
            LocalInferenceSession::new(Box::new(MockInferenceEngine::new()), paths.clone());

        let handle = session.load(&uri).unwrap();
        assert!(handle.loaded);
        assert_eq!(handle.local_path, paths.model_slot());
        assert_eq!(handle.size_bytes, b"weights-v1".len() as u64);
        assert_eq!(fs::read(paths.model_slot()).unwrap(), b"weights-v1");

        let status = session.status();
        assert!(status.loaded);
        assert_eq!(status.source_uri, Some(uri));
    }

    #[test]
    fn test_second_load_replaces_first() {
        let root = tempfile::tempdir().unwrap();
        let uri_a = write_model(root.path(), "a.gguf", b"aaaa");
        let uri_b = write_model(root.path(), "b.gguf", b"bbbbbbbb");
        let paths = RuntimePaths::at(root.path().join("data"));
        let engine = MockInferenceEngine::new();
        let release_calls = engine.release_calls.clone();
        let session = LocalInferenceSession::new(Box::new(engine), paths.clone());

        session.load(&uri_a).unwrap();
        let handle = session.load(&uri_b).unwrap();

        // Exactly one resident handle, referencing B, with A's resources released
        assert_eq!(handle.source_uri, uri_b);
        assert_eq!(release_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(paths.model_slot()).unwrap(), b"bbbbbbbb");
        let status = session.status();
        assert_eq!(status.source_uri, Some(uri_b));
        assert_eq!(status.size_bytes, 8);
    }

    #[test]
    fn test_engine_init_happens_once_across_loads() {
        let root = tempfile::tempdir().unwrap();
        let uri = write_model(root.path(), "model.gguf", b"weights");
        let engine = MockInferenceEngine::new();
        let init_calls = engine.init_calls.clone();
        let session = session_with(engine, &root.path().join("data"));

        session.load(&uri).unwrap();
        session.load(&uri).unwrap();
        session.load(&uri).unwrap();
        assert_eq!(init_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_init_failure_leaves_session_unloaded() {
        let root = tempfile::tempdir().unwrap();
        let uri = write_model(root.path(), "model.gguf", b"weights");
        let mut engine = MockInferenceEngine::new();
        engine.fail_init = true;
        let session = session_with(engine, &root.path().join("data"));

        let result = session.load(&uri);
        assert!(matches!(result, Err(InferenceError::LoadFailed(_))));
        assert!(!session.status().loaded);
    }

    #[test]
    fn test_weight_load_failure_leaves_session_unloaded() {
        let root = tempfile::tempdir().unwrap();
        let uri = write_model(root.path(), "model.gguf", b"weights");
        let mut engine = MockInferenceEngine::new();
        engine.fail_load = true;
        let session = session_with(engine, &root.path().join("data"));

        assert!(matches!(
            session.load(&uri),
            Err(InferenceError::LoadFailed(_))
        ));
        assert!(!session.status().loaded);
    }

    #[test]
    fn test_load_missing_source_fails() {
        let root = tempfile::tempdir().unwrap();
        let session = session_with(MockInferenceEngine::new(), &root.path().join("data"));
        assert!(matches!(
            session.load("/nonexistent/model.gguf"),
            Err(InferenceError::LoadFailed(_))
        ));
        assert!(!session.status().loaded);
    }

    #[test]
    fn test_unload_releases_engine_and_deletes_slot() {
        let root = tempfile::tempdir().unwrap();
        let uri = write_model(root.path(), "model.gguf", b"weights");
        let paths = RuntimePaths::at(root.path().join("data"));
        let engine = MockInferenceEngine::new();
        let release_calls = engine.release_calls.clone();
        let session = LocalInferenceSession::new(Box::new(engine), paths.clone());

        session.load(&uri).unwrap();
        assert!(paths.model_slot().exists());
        session.unload();

        assert_eq!(release_calls.load(Ordering::SeqCst), 1);
        assert!(!paths.model_slot().exists());
        let status = session.status();
        assert!(!status.loaded);
        assert_eq!(status.size_bytes, 0);
    }

    #[test]
    fn test_unload_when_nothing_loaded_is_safe() {
        let root = tempfile::tempdir().unwrap();
        let session = session_with(MockInferenceEngine::new(), &root.path().join("data"));
        session.unload();
        session.unload();
        assert!(!session.status().loaded);
    }

    #[test]
    fn test_estimate_size_reads_metadata() {
        let root = tempfile::tempdir().unwrap();
        let uri = write_model(root.path(), "model.gguf", &[0u8; 4096]);
        let session = session_with(MockInferenceEngine::new(), &root.path().join("data"));
        assert_eq!(session.estimate_size(&uri).unwrap(), 4096);
    }

    #[test]
    fn test_estimate_size_unreadable_uri() {
        let root = tempfile::tempdir().unwrap();
        let session = session_with(MockInferenceEngine::new(), &root.path().join("data"));
        assert!(matches!(
            session.estimate_size("/nonexistent/model.gguf"),
            Err(InferenceError::Unreadable(_))
        ));
        assert!(matches!(
            session.estimate_size(""),
            Err(InferenceError::Unreadable(_))
        ));
    }

    #[test]
    fn test_generate_without_model_echoes_input() {
        let root = tempfile::tempdir().unwrap();
        let session = session_with(MockInferenceEngine::new(), &root.path().join("data"));
        let request = GenerationRequest {
            max_tokens: 10,
            max_wall_clock_ms: 1,
            ..GenerationRequest::new("hi")
        };
        assert_eq!(session.generate(&request), "hi");
    }

    #[test]
    fn test_generate_rewrites_with_loaded_model() {
        let root = tempfile::tempdir().unwrap();
        let uri = write_model(root.path(), "model.gguf", b"weights");
        let session = session_with(MockInferenceEngine::new(), &root.path().join("data"));
        session.load(&uri).unwrap();
        assert_eq!(
            session.generate(&GenerationRequest::new("hello there")),
            "rewritten: hello there"
        );
    }

    #[test]
    fn test_generate_under_native_failure_echoes_input() {
        let root = tempfile::tempdir().unwrap();
        let uri = write_model(root.path(), "model.gguf", b"weights");
        let engine = MockInferenceEngine::new();
        engine.fail_generate.store(true, Ordering::SeqCst);
        let session = session_with(engine, &root.path().join("data"));
        session.load(&uri).unwrap();

        assert_eq!(session.generate(&GenerationRequest::new("keep me")), "keep me");
    }

    #[test]
    fn test_generate_empty_output_echoes_input() {
        let root = tempfile::tempdir().unwrap();
        let uri = write_model(root.path(), "model.gguf", b"weights");
        let mut engine = MockInferenceEngine::new();
        engine.empty_output = true;
        let session = session_with(engine, &root.path().join("data"));
        session.load(&uri).unwrap();

        assert_eq!(session.generate(&GenerationRequest::new("keep me")), "keep me");
        // Empty input stays empty rather than being invented
        assert_eq!(session.generate(&GenerationRequest::new("")), "");
    }

    #[test]
    fn test_concurrent_generations_do_not_interleave() {
        let root = tempfile::tempdir().unwrap();
        let uri = write_model(root.path(), "model.gguf", b"weights");
        let mut engine = MockInferenceEngine::new();
        engine.generate_delay = Some(Duration::from_millis(20));
        let call_log = engine.call_log.clone();
        let session = Arc::new(session_with(engine, &root.path().join("data")));
        session.load(&uri).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let session = session.clone();
                std::thread::spawn(move || {
                    session.generate(&GenerationRequest::new(format!("req-{}", i)))
                })
            })
            .collect();
        for handle in handles {
            let output = handle.join().unwrap();
            assert!(output.starts_with("rewritten: req-"));
        }

        // Every begin is immediately followed by its own end: no torn output
        let log = call_log.lock().unwrap();
        assert_eq!(log.len(), 8);
        for pair in log.chunks(2) {
            let begin = pair[0].strip_prefix("begin:").unwrap();
            let end = pair[1].strip_prefix("end:").unwrap();
            assert_eq!(begin, end);
        }
    }
}
