// Keyword detector wrapper over the acoustic spotter engine
// Owns keyword-source materialization, microphone tenure, and wake delivery

use crate::audio::{MicError, MicGuard, MicOwner, Microphone};
use crate::events::current_timestamp;
use crate::paths::{resolve_uri, RuntimePaths};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc as tokio_mpsc;

/// Bounded buffer for the wake event channel
const EVENT_CHANNEL_BUFFER_SIZE: usize = 16;

/// Minimum spacing between forwarded wake signals
///
/// The engine debounces per utterance; this guards against raw engines that
/// report the same utterance more than once.
const WAKE_DEBOUNCE_MS: u64 = 1000;

/// Where the keyword model bytes come from
#[derive(Debug, Clone, PartialEq)]
pub enum KeywordSource {
    /// An asset shipped with the app, relative to the assets directory
    Bundled(String),
    /// A user-supplied location, re-copied on every build
    UserSupplied(String),
}

/// Configuration for the keyword detector
///
/// Immutable once a detector is built; changing it requires a rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Label the assistant answers to
    pub assistant_label: String,
    /// Spotter sensitivity, clamped to [0, 1] at build time
    pub sensitivity: f32,
    /// Pause listening while the screen is off
    pub pause_on_screen_off: bool,
    /// Pause listening when the battery drops below the threshold
    pub pause_on_low_battery: bool,
    /// Battery percentage at or below which listening pauses
    pub low_battery_threshold_percent: u8,
    /// Source of the keyword model
    pub keyword_source: KeywordSource,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            assistant_label: "Ari".to_string(),
            sensitivity: 0.6,
            pause_on_screen_off: false,
            pause_on_low_battery: true,
            low_battery_threshold_percent: 15,
            keyword_source: KeywordSource::Bundled("wakewords/ari.bin".to_string()),
        }
    }
}

/// Wake events delivered through the detector's channel
#[derive(Debug, Clone, PartialEq)]
pub enum WakeEvent {
    /// The keyword was spotted in the live stream
    Detected {
        /// ISO 8601 timestamp of the detection
        timestamp: String,
    },
    /// The engine reported a runtime fault
    Error {
        /// Engine-provided description
        message: String,
    },
}

impl WakeEvent {
    pub fn detected() -> Self {
        WakeEvent::Detected {
            timestamp: current_timestamp(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WakeEvent::Error {
            message: message.into(),
        }
    }

    pub fn is_detected(&self) -> bool {
        matches!(self, WakeEvent::Detected { .. })
    }
}

/// Errors reported by spotter engines
#[derive(Debug, Clone, PartialEq)]
pub enum SpotterError {
    /// Engine construction failed
    BuildFailed(String),
    /// Engine could not start streaming
    StartFailed(String),
    /// Engine could not stop cleanly
    StopFailed(String),
}

impl std::fmt::Display for SpotterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpotterError::BuildFailed(msg) => write!(f, "Spotter build failed: {}", msg),
            SpotterError::StartFailed(msg) => write!(f, "Spotter start failed: {}", msg),
            SpotterError::StopFailed(msg) => write!(f, "Spotter stop failed: {}", msg),
        }
    }
}

impl std::error::Error for SpotterError {}

/// Errors from detector operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectorError {
    /// The keyword source could not be resolved or materialized
    #[error("Invalid keyword source: {0}")]
    InvalidKeywordSource(String),
    /// The spotter engine could not be built
    #[error("Engine build failed: {0}")]
    EngineBuild(String),
    /// The spotter engine could not start
    #[error("Engine start failed: {0}")]
    EngineStart(String),
    /// The microphone is held by another component
    #[error("Microphone unavailable: {0}")]
    Microphone(MicError),
    /// The detector is already running
    #[error("Detector is already running")]
    AlreadyRunning,
    /// The detector has been disposed
    #[error("Detector has been disposed")]
    Disposed,
}

/// The acoustic keyword spotter, consumed as an opaque capability
///
/// The engine owns its own audio plumbing and detection model. It raises each
/// positive match through the sink handed to the factory; match debouncing
/// per utterance is the engine's job.
pub trait SpotterEngine: Send {
    /// Begin streaming microphone frames into the keyword model
    fn start(&mut self) -> Result<(), SpotterError>;

    /// Stop streaming and release engine-side audio resources
    fn stop(&mut self) -> Result<(), SpotterError>;
}

/// Builds spotter engines against a materialized keyword file
pub trait SpotterEngineFactory: Send + Sync {
    fn build(
        &self,
        keyword_path: &Path,
        sensitivity: f32,
        sink: WakeSink,
    ) -> Result<Box<dyn SpotterEngine>, SpotterError>;
}

struct SinkShared {
    tx: tokio_mpsc::Sender<WakeEvent>,
    gate: AtomicBool,
    last_raise: Mutex<Option<Instant>>,
    debounce: Duration,
}

/// Handle the engine uses to raise wake signals
///
/// The sink gates signals to the detector's running interval and suppresses
/// duplicates inside the debounce window, so a single utterance yields at
/// most one event per start-pause interval.
#[derive(Clone)]
pub struct WakeSink {
    shared: Arc<SinkShared>,
}

impl WakeSink {
    fn new(tx: tokio_mpsc::Sender<WakeEvent>) -> Self {
        Self {
            shared: Arc::new(SinkShared {
                tx,
                gate: AtomicBool::new(false),
                last_raise: Mutex::new(None),
                debounce: Duration::from_millis(WAKE_DEBOUNCE_MS),
            }),
        }
    }

    fn open_gate(&self) {
        self.shared.gate.store(true, Ordering::SeqCst);
    }

    fn close_gate(&self) {
        self.shared.gate.store(false, Ordering::SeqCst);
    }

    /// Raise a wake signal for a positive match
    ///
    /// No-op while the detector is paused or disposed. Safe to call from the
    /// engine's callback thread.
    pub fn raise(&self) {
        if !self.shared.gate.load(Ordering::SeqCst) {
            crate::trace!("[detector] Wake raised while gated, dropping");
            return;
        }
        {
            let mut last = match self.shared.last_raise.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if let Some(prev) = *last {
                if prev.elapsed() < self.shared.debounce {
                    crate::debug!("[detector] Duplicate wake within debounce window, dropping");
                    return;
                }
            }
            *last = Some(Instant::now());
        }
        if let Err(e) = self.shared.tx.try_send(WakeEvent::detected()) {
            crate::warn!(
                "[detector] Failed to send wake event: {} (channel full or closed)",
                e
            );
        }
    }

    /// Report an engine fault through the event channel
    pub fn report_error(&self, message: impl Into<String>) {
        let _ = self.shared.tx.try_send(WakeEvent::error(message));
    }
}

/// Wrapper around the continuously-running keyword spotter
///
/// Holds the microphone while running and releases it deterministically on
/// pause so a capture session can claim the device.
pub struct AudioKeywordDetector {
    config: DetectorConfig,
    keyword_path: PathBuf,
    engine: Option<Box<dyn SpotterEngine>>,
    sink: Option<WakeSink>,
    mic: Microphone,
    mic_guard: Option<MicGuard>,
    running: bool,
}

impl AudioKeywordDetector {
    /// Build a detector against a resolved keyword source
    ///
    /// Materializes the keyword bytes into the private data directory before
    /// the engine ever sees them; any resolution failure is a hard
    /// `InvalidKeywordSource` error and no partial detector is constructed.
    ///
    /// Returns the detector together with the receiving end of its wake
    /// event channel.
    pub fn build(
        config: DetectorConfig,
        factory: &dyn SpotterEngineFactory,
        mic: Microphone,
        paths: &RuntimePaths,
    ) -> Result<(Self, tokio_mpsc::Receiver<WakeEvent>), DetectorError> {
        let keyword_path = materialize_keyword(&config.keyword_source, paths)?;

        let (tx, rx) = tokio_mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);
        let sink = WakeSink::new(tx);

        let sensitivity = config.sensitivity.clamp(0.0, 1.0);
        let engine = factory
            .build(&keyword_path, sensitivity, sink.clone())
            .map_err(|e| DetectorError::EngineBuild(e.to_string()))?;

        crate::info!(
            "[detector] Built for '{}', sensitivity={:.2}, keyword={}",
            config.assistant_label,
            sensitivity,
            keyword_path.display()
        );

        Ok((
            Self {
                config,
                keyword_path,
                engine: Some(engine),
                sink: Some(sink),
                mic,
                mic_guard: None,
                running: false,
            },
            rx,
        ))
    }

    /// The configuration this detector was built from
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Path of the materialized keyword file
    pub fn keyword_path(&self) -> &Path {
        &self.keyword_path
    }

    /// Whether the detector currently holds the microphone and streams audio
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Claim the microphone and start the spotter engine
    pub fn start(&mut self) -> Result<(), DetectorError> {
        if self.engine.is_none() {
            return Err(DetectorError::Disposed);
        }
        if self.running {
            return Err(DetectorError::AlreadyRunning);
        }
        self.run_engine()
    }

    /// Stop the engine and release the microphone
    ///
    /// The release is deterministic: once `pause` returns, a capture session
    /// can claim the device. Idempotent when not running.
    pub fn pause(&mut self) {
        if !self.running {
            return;
        }
        if let Some(sink) = &self.sink {
            sink.close_gate();
        }
        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.stop() {
                crate::warn!("[detector] Engine stop during pause failed: {}", e);
            }
        }
        self.mic_guard = None;
        self.running = false;
        crate::debug!("[detector] Paused, microphone released");
    }

    /// Re-acquire the microphone and restart the spotter engine
    pub fn resume(&mut self) -> Result<(), DetectorError> {
        if self.engine.is_none() {
            return Err(DetectorError::Disposed);
        }
        if self.running {
            return Ok(());
        }
        self.run_engine()
    }

    /// Release the microphone and all engine resources
    ///
    /// Safe to call multiple times. The wake event channel closes once the
    /// detector (and the engine's sink clone) is dropped.
    pub fn dispose(&mut self) {
        if let Some(sink) = &self.sink {
            sink.close_gate();
        }
        if self.running {
            if let Some(engine) = self.engine.as_mut() {
                if let Err(e) = engine.stop() {
                    crate::warn!("[detector] Engine stop during dispose failed: {}", e);
                }
            }
            self.running = false;
        }
        self.mic_guard = None;
        self.engine = None;
        self.sink = None;
        crate::debug!("[detector] Disposed");
    }

    fn run_engine(&mut self) -> Result<(), DetectorError> {
        let guard = self
            .mic
            .acquire(MicOwner::KeywordDetector)
            .map_err(DetectorError::Microphone)?;

        let engine = self.engine.as_mut().ok_or(DetectorError::Disposed)?;
        if let Err(e) = engine.start() {
            // Guard is dropped here so the device is not left claimed
            return Err(DetectorError::EngineStart(e.to_string()));
        }

        self.mic_guard = Some(guard);
        if let Some(sink) = &self.sink {
            sink.open_gate();
        }
        self.running = true;
        crate::info!("[detector] Listening for '{}'", self.config.assistant_label);
        Ok(())
    }
}

impl Drop for AudioKeywordDetector {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Materialize the keyword source into the private data directory
///
/// Bundled assets are copied once and reused on later builds. User-supplied
/// sources are re-copied every time since the bytes behind the URI may have
/// changed between loads.
fn materialize_keyword(
    source: &KeywordSource,
    paths: &RuntimePaths,
) -> Result<PathBuf, DetectorError> {
    paths
        .ensure_exists()
        .map_err(|e| DetectorError::InvalidKeywordSource(e.to_string()))?;

    match source {
        KeywordSource::Bundled(asset_path) => {
            let dest = paths.materialized_asset(asset_path);
            if dest.exists() {
                return Ok(dest);
            }
            let src = paths.assets_dir().join(asset_path);
            fs::copy(&src, &dest).map_err(|e| {
                DetectorError::InvalidKeywordSource(format!("{}: {}", src.display(), e))
            })?;
            Ok(dest)
        }
        KeywordSource::UserSupplied(uri) => {
            let src =
                resolve_uri(uri).map_err(|e| DetectorError::InvalidKeywordSource(e.to_string()))?;
            let dest = paths.keyword_slot();
            fs::copy(&src, &dest).map_err(|e| {
                DetectorError::InvalidKeywordSource(format!("{}: {}", src.display(), e))
            })?;
            Ok(dest)
        }
    }
}
