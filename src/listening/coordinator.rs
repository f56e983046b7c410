// Top-level listening coordinator
// Serializes the state machine across detector callbacks, capture completion,
// and external lifecycle signals; mediates the microphone handoff

use super::detector::{
    AudioKeywordDetector, DetectorConfig, DetectorError, SpotterEngineFactory, WakeEvent,
};
use super::state::{ListeningState, ListeningStateError};
use crate::audio::Microphone;
use crate::capture::{CaptureError, CaptureEvent, SpeechCaptureSession};
use crate::events::{
    current_timestamp, CaptureErrorPayload, CaptureEventEmitter, CaptureFinalPayload,
    CapturePartialPayload, CaptureReadyPayload, ListeningEventEmitter,
    ListeningStateChangedPayload, WakeDetectedPayload,
};
use crate::paths::RuntimePaths;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc as tokio_mpsc;
use uuid::Uuid;

/// Environmental signals the coordinator may react to
///
/// Reactions are gated by the active `DetectorConfig` opt-ins; signals
/// arriving with no detector built are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentSignal {
    ScreenOff,
    ScreenOn,
    /// Battery charge in percent
    BatteryLevel(u8),
}

/// Why listening is currently paused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Explicit pause request from the caller
    User,
    /// Screen turned off while pause_on_screen_off was set
    ScreenOff,
    /// Battery fell to or below the configured threshold
    LowBattery,
}

/// Intent recorded while a capture session is in flight
///
/// A stop or pause arriving mid-capture wins over the post-capture detector
/// resume; the coordinator lands in Idle or Paused instead of resurrecting a
/// detector the caller already asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingIntent {
    Stop,
    Pause(PauseReason),
}

/// Errors from coordinator operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinatorError {
    /// Detector construction or start failed
    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),
    /// Capture session could not start
    #[error("Capture error: {0}")]
    Capture(CaptureError),
    /// A transition was attempted that the state machine forbids
    #[error("{0}")]
    State(ListeningStateError),
    /// Internal lock error
    #[error("Failed to acquire coordinator state lock")]
    LockError,
}

/// Status snapshot for the collaborator layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningStatus {
    /// Current coordinator state
    pub state: ListeningState,
    /// Whether the runtime is actively using the audio path
    pub active: bool,
    /// Whether some component currently holds the microphone
    pub mic_in_use: bool,
}

struct CoordinatorInner {
    state: ListeningState,
    config: Option<DetectorConfig>,
    detector: Option<AudioKeywordDetector>,
    pending: Option<PendingIntent>,
    paused_reason: Option<PauseReason>,
    capture_origin: ListeningState,
    /// Bumped whenever the detector or capture lineage is torn down, so
    /// relay threads from an earlier lineage cannot apply stale transitions
    epoch: u64,
}

/// The top-level state machine owning the listening lifecycle
///
/// All transitions run under one mutex; wake events, capture completion, and
/// external calls are serialized through it. Relay threads consume the
/// component event channels and re-enter the coordinator with an epoch tag.
pub struct ListeningCoordinator<E>
where
    E: ListeningEventEmitter + CaptureEventEmitter + Send + Sync + 'static,
{
    inner: Arc<Mutex<CoordinatorInner>>,
    emitter: Arc<E>,
    spotter_factory: Arc<dyn SpotterEngineFactory>,
    capture: Arc<Mutex<SpeechCaptureSession>>,
    mic: Microphone,
    paths: RuntimePaths,
}

impl<E> ListeningCoordinator<E>
where
    E: ListeningEventEmitter + CaptureEventEmitter + Send + Sync + 'static,
{
    pub fn new(
        spotter_factory: Arc<dyn SpotterEngineFactory>,
        capture: SpeechCaptureSession,
        mic: Microphone,
        emitter: Arc<E>,
        paths: RuntimePaths,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CoordinatorInner {
                state: ListeningState::Idle,
                config: None,
                detector: None,
                pending: None,
                paused_reason: None,
                capture_origin: ListeningState::Idle,
                epoch: 0,
            })),
            emitter,
            spotter_factory,
            capture: Arc::new(Mutex::new(capture)),
            mic,
            paths,
        }
    }

    /// Current coordinator state
    pub fn state(&self) -> ListeningState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(ListeningState::Idle)
    }

    /// Status snapshot
    pub fn status(&self) -> ListeningStatus {
        let state = self.state();
        ListeningStatus {
            state,
            active: matches!(state, ListeningState::Listening | ListeningState::Capturing),
            mic_in_use: !self.mic.is_free(),
        }
    }

    /// Start listening with the given configuration
    ///
    /// A no-op when already running with an identical configuration; a
    /// changed configuration tears everything down and rebuilds the detector.
    pub fn start_listening(&self, config: DetectorConfig) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().map_err(|_| CoordinatorError::LockError)?;

        if inner.state != ListeningState::Idle {
            if inner.config.as_ref() == Some(&config) {
                crate::debug!("[coordinator] start_listening with unchanged config, no-op");
                return Ok(());
            }
            crate::info!("[coordinator] Configuration changed, rebuilding detector");
            self.force_stop_locked(&mut inner);
        }

        let (mut detector, wake_rx) = AudioKeywordDetector::build(
            config.clone(),
            self.spotter_factory.as_ref(),
            self.mic.clone(),
            &self.paths,
        )?;
        detector.start()?;

        inner.detector = Some(detector);
        inner.config = Some(config);
        inner.pending = None;
        inner.paused_reason = None;
        inner.epoch += 1;
        let epoch = inner.epoch;
        Self::transition(&mut inner, &self.emitter, ListeningState::Listening)?;
        drop(inner);

        self.spawn_wake_loop(wake_rx, epoch);
        Ok(())
    }

    /// Stop listening and dispose the detector
    ///
    /// While a capture session is in flight the stop is recorded as pending
    /// intent; the session runs to its own termination and the coordinator
    /// lands in Idle afterwards.
    pub fn stop_listening(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        match inner.state {
            ListeningState::Idle => {}
            ListeningState::Capturing => {
                crate::info!("[coordinator] Stop requested mid-capture, recording pending intent");
                inner.pending = Some(PendingIntent::Stop);
                if let Some(mut detector) = inner.detector.take() {
                    detector.dispose();
                }
                inner.config = None;
            }
            ListeningState::Listening | ListeningState::Paused => {
                if let Some(mut detector) = inner.detector.take() {
                    detector.dispose();
                }
                inner.config = None;
                inner.paused_reason = None;
                inner.epoch += 1;
                let _ = Self::transition(&mut inner, &self.emitter, ListeningState::Idle);
            }
        }
    }

    /// Pause listening on behalf of the caller
    pub fn pause(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().map_err(|_| CoordinatorError::LockError)?;
        Self::pause_locked(&mut inner, &self.emitter, PauseReason::User)
    }

    /// Resume listening on behalf of the caller
    pub fn resume(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().map_err(|_| CoordinatorError::LockError)?;
        match inner.state {
            ListeningState::Paused => Self::resume_locked(&mut inner, &self.emitter),
            ListeningState::Capturing => {
                // A resume cancels a pending pause but cannot cancel a stop
                if matches!(inner.pending, Some(PendingIntent::Pause(_))) {
                    inner.pending = None;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// React to an environmental signal, honoring the config opt-ins
    pub fn handle_environment(&self, signal: EnvironmentSignal) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let Some(config) = inner.config.clone() else {
            return;
        };

        match signal {
            EnvironmentSignal::ScreenOff if config.pause_on_screen_off => {
                crate::info!("[coordinator] Screen off, pausing listening");
                let _ = Self::pause_locked(&mut inner, &self.emitter, PauseReason::ScreenOff);
            }
            EnvironmentSignal::ScreenOn => {
                Self::auto_resume_locked(&mut inner, &self.emitter, PauseReason::ScreenOff);
            }
            EnvironmentSignal::BatteryLevel(percent) if config.pause_on_low_battery => {
                if percent <= config.low_battery_threshold_percent {
                    crate::info!(
                        "[coordinator] Battery at {}%, below threshold, pausing",
                        percent
                    );
                    let _ =
                        Self::pause_locked(&mut inner, &self.emitter, PauseReason::LowBattery);
                } else {
                    Self::auto_resume_locked(&mut inner, &self.emitter, PauseReason::LowBattery);
                }
            }
            _ => {}
        }
    }

    /// Start a capture session on explicit external request
    ///
    /// From Listening this behaves exactly like a wake event (detector paused
    /// first); from Idle or Paused the session runs standalone and the
    /// coordinator returns to the originating state on completion.
    pub fn start_capture(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().map_err(|_| CoordinatorError::LockError)?;
        match inner.state {
            ListeningState::Capturing => {
                Err(CoordinatorError::Capture(CaptureError::AlreadyActive))
            }
            ListeningState::Listening => {
                if let Some(detector) = inner.detector.as_mut() {
                    detector.pause();
                }
                let origin = ListeningState::Listening;
                match self.begin_capture_locked(&mut inner, origin) {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        if let Some(detector) = inner.detector.as_mut() {
                            let _ = detector.resume();
                        }
                        Err(e)
                    }
                }
            }
            origin @ (ListeningState::Idle | ListeningState::Paused) => {
                self.begin_capture_locked(&mut inner, origin)
            }
        }
    }

    /// Stop the active capture session, if any
    ///
    /// Safe to call from any thread; the session's relay observes the closed
    /// channel and completes the state transition.
    pub fn stop_capture(&self) {
        if let Ok(mut capture) = self.capture.lock() {
            capture.stop();
        }
    }

    fn begin_capture_locked(
        &self,
        inner: &mut CoordinatorInner,
        origin: ListeningState,
    ) -> Result<(), CoordinatorError> {
        let (session_id, rx) = {
            let mut capture = self.capture.lock().map_err(|_| CoordinatorError::LockError)?;
            capture.start().map_err(CoordinatorError::Capture)?
        };
        inner.capture_origin = origin;
        Self::transition(inner, &self.emitter, ListeningState::Capturing)?;
        self.spawn_capture_relay(session_id, rx, inner.epoch);
        Ok(())
    }

    fn force_stop_locked(&self, inner: &mut CoordinatorInner) {
        if inner.state == ListeningState::Capturing {
            if let Ok(mut capture) = self.capture.lock() {
                capture.stop();
            }
        }
        if let Some(mut detector) = inner.detector.take() {
            detector.dispose();
        }
        inner.config = None;
        inner.pending = None;
        inner.paused_reason = None;
        inner.epoch += 1;
        if inner.state != ListeningState::Idle {
            let _ = Self::transition(inner, &self.emitter, ListeningState::Idle);
        }
    }

    fn spawn_wake_loop(&self, mut rx: tokio_mpsc::Receiver<WakeEvent>, epoch: u64) {
        let inner = self.inner.clone();
        let emitter = self.emitter.clone();
        let capture = self.capture.clone();
        thread::spawn(move || {
            crate::debug!("[coordinator] Wake loop started (epoch {})", epoch);
            while let Some(event) = rx.blocking_recv() {
                match event {
                    WakeEvent::Detected { timestamp } => {
                        Self::handle_wake(&inner, &emitter, &capture, epoch, timestamp);
                    }
                    WakeEvent::Error { message } => {
                        crate::warn!("[coordinator] Detector engine error: {}", message);
                    }
                }
            }
            crate::debug!("[coordinator] Wake loop exited (epoch {})", epoch);
        });
    }

    /// Handle a wake event: emit, pause the detector, hand the microphone to
    /// a capture session. Runs on the wake loop thread under the state lock.
    fn handle_wake(
        inner_arc: &Arc<Mutex<CoordinatorInner>>,
        emitter: &Arc<E>,
        capture: &Arc<Mutex<SpeechCaptureSession>>,
        epoch: u64,
        timestamp: String,
    ) {
        let Ok(mut inner) = inner_arc.lock() else {
            return;
        };
        if inner.epoch != epoch {
            crate::debug!("[coordinator] Wake from stale detector lineage, ignoring");
            return;
        }
        if inner.state != ListeningState::Listening {
            crate::debug!("[coordinator] Wake while {:?}, ignoring", inner.state);
            return;
        }

        crate::info!("[coordinator] Wake detected, starting capture");
        emitter.emit_wake_detected(WakeDetectedPayload { timestamp });

        if let Some(detector) = inner.detector.as_mut() {
            detector.pause();
        }

        let started = {
            match capture.lock() {
                Ok(mut session) => session.start(),
                Err(_) => {
                    crate::error!("[coordinator] Capture session lock poisoned");
                    if let Some(detector) = inner.detector.as_mut() {
                        let _ = detector.resume();
                    }
                    return;
                }
            }
        };

        match started {
            Ok((session_id, rx)) => {
                inner.capture_origin = ListeningState::Listening;
                if Self::transition(&mut inner, emitter, ListeningState::Capturing).is_ok() {
                    Self::relay_capture_events(
                        inner.epoch,
                        session_id,
                        rx,
                        Arc::clone(emitter),
                        Arc::clone(inner_arc),
                    );
                }
            }
            Err(e) => {
                crate::error!("[coordinator] Capture failed to start after wake: {}", e);
                if let Some(detector) = inner.detector.as_mut() {
                    let _ = detector.resume();
                }
            }
        }
    }

    fn spawn_capture_relay(
        &self,
        session_id: Uuid,
        rx: tokio_mpsc::Receiver<CaptureEvent>,
        epoch: u64,
    ) {
        Self::relay_capture_events(
            epoch,
            session_id,
            rx,
            self.emitter.clone(),
            self.inner.clone(),
        );
    }

    /// Forward capture events to the emitter until the channel closes, then
    /// complete the post-capture transition.
    fn relay_capture_events(
        epoch: u64,
        session_id: Uuid,
        mut rx: tokio_mpsc::Receiver<CaptureEvent>,
        emitter: Arc<E>,
        inner: Arc<Mutex<CoordinatorInner>>,
    ) {
        thread::spawn(move || {
            while let Some(event) = rx.blocking_recv() {
                match event {
                    CaptureEvent::Ready => emitter.emit_capture_ready(CaptureReadyPayload {
                        session_id,
                        timestamp: current_timestamp(),
                    }),
                    CaptureEvent::Partial(text) => {
                        emitter.emit_capture_partial(CapturePartialPayload { session_id, text })
                    }
                    CaptureEvent::Final(text) => {
                        emitter.emit_capture_final(CaptureFinalPayload { session_id, text })
                    }
                    CaptureEvent::Error(code) => {
                        emitter.emit_capture_error(CaptureErrorPayload {
                            session_id,
                            code: code.code().to_string(),
                        })
                    }
                }
            }
            Self::finish_capture(&inner, &emitter, epoch);
        });
    }

    /// Post-capture completion: pending intent wins over the detector resume
    fn finish_capture(inner: &Arc<Mutex<CoordinatorInner>>, emitter: &Arc<E>, epoch: u64) {
        let Ok(mut inner) = inner.lock() else {
            return;
        };
        if inner.epoch != epoch {
            crate::debug!("[coordinator] Capture completion from stale lineage, ignoring");
            return;
        }
        if inner.state != ListeningState::Capturing {
            crate::debug!(
                "[coordinator] Capture completion while {:?}, ignoring",
                inner.state
            );
            return;
        }

        let target = match inner.pending.take() {
            Some(PendingIntent::Stop) => {
                if let Some(mut detector) = inner.detector.take() {
                    detector.dispose();
                }
                inner.config = None;
                ListeningState::Idle
            }
            Some(PendingIntent::Pause(reason)) => {
                // Detector is already paused from the capture handoff
                inner.paused_reason = Some(reason);
                ListeningState::Paused
            }
            None => match inner.capture_origin {
                ListeningState::Listening => match inner.detector.as_mut() {
                    Some(detector) => match detector.resume() {
                        Ok(()) => ListeningState::Listening,
                        Err(e) => {
                            crate::error!(
                                "[coordinator] Failed to resume detector after capture: {}",
                                e
                            );
                            if let Some(mut detector) = inner.detector.take() {
                                detector.dispose();
                            }
                            inner.config = None;
                            ListeningState::Idle
                        }
                    },
                    None => ListeningState::Idle,
                },
                origin => origin,
            },
        };

        let _ = Self::transition(&mut inner, emitter, target);
    }

    fn pause_locked(
        inner: &mut CoordinatorInner,
        emitter: &Arc<E>,
        reason: PauseReason,
    ) -> Result<(), CoordinatorError> {
        match inner.state {
            ListeningState::Listening => {
                if let Some(detector) = inner.detector.as_mut() {
                    detector.pause();
                }
                inner.paused_reason = Some(reason);
                Self::transition(inner, emitter, ListeningState::Paused)
            }
            ListeningState::Capturing => {
                match inner.pending {
                    Some(PendingIntent::Stop) => {}
                    // A user pause overrides an environmental one; nothing
                    // downgrades a pause the user asked for
                    Some(PendingIntent::Pause(_)) if reason == PauseReason::User => {
                        inner.pending = Some(PendingIntent::Pause(reason));
                    }
                    Some(PendingIntent::Pause(_)) => {}
                    None => inner.pending = Some(PendingIntent::Pause(reason)),
                }
                Ok(())
            }
            ListeningState::Paused => {
                if reason == PauseReason::User {
                    inner.paused_reason = Some(reason);
                }
                Ok(())
            }
            ListeningState::Idle => Ok(()),
        }
    }

    fn resume_locked(
        inner: &mut CoordinatorInner,
        emitter: &Arc<E>,
    ) -> Result<(), CoordinatorError> {
        match inner.detector.as_mut() {
            Some(detector) => {
                detector.resume()?;
                inner.paused_reason = None;
                Self::transition(inner, emitter, ListeningState::Listening)
            }
            None => {
                crate::warn!("[coordinator] Resume with no detector built");
                inner.paused_reason = None;
                let _ = Self::transition(inner, emitter, ListeningState::Idle);
                Ok(())
            }
        }
    }

    /// Resume only if the pause was caused by the matching environment signal
    fn auto_resume_locked(inner: &mut CoordinatorInner, emitter: &Arc<E>, cause: PauseReason) {
        match inner.state {
            ListeningState::Paused if inner.paused_reason == Some(cause) => {
                crate::info!("[coordinator] Environment recovered, resuming listening");
                if let Err(e) = Self::resume_locked(inner, emitter) {
                    crate::error!("[coordinator] Auto-resume failed: {}", e);
                }
            }
            ListeningState::Capturing => {
                if inner.pending == Some(PendingIntent::Pause(cause)) {
                    inner.pending = None;
                }
            }
            _ => {}
        }
    }

    fn transition(
        inner: &mut CoordinatorInner,
        emitter: &Arc<E>,
        to: ListeningState,
    ) -> Result<(), CoordinatorError> {
        inner
            .state
            .validate_transition(to)
            .map_err(CoordinatorError::State)?;
        crate::info!("[coordinator] {:?} -> {:?}", inner.state, to);
        inner.state = to;
        emitter.emit_listening_state_changed(ListeningStateChangedPayload {
            state: to,
            timestamp: current_timestamp(),
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
