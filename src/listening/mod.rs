// Listening module for always-on keyword detection
// Provides the detector wrapper over the acoustic spotter engine and the
// coordinator that serializes the listening lifecycle

mod coordinator;
mod detector;
mod state;

pub use coordinator::{
    CoordinatorError, EnvironmentSignal, ListeningCoordinator, ListeningStatus, PauseReason,
};
pub use detector::{
    AudioKeywordDetector, DetectorConfig, DetectorError, KeywordSource, SpotterEngine,
    SpotterEngineFactory, SpotterError, WakeEvent, WakeSink,
};
pub use state::{ListeningState, ListeningStateError};

#[cfg(test)]
pub(crate) use detector::tests::{test_paths_with_keyword, MockSpotterFactory};
