// Speech-capture session over the platform recognition backend
// Enforces event ordering, single-terminal delivery, and microphone tenure

use crate::audio::{MicError, MicGuard, MicOwner, Microphone};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc as tokio_mpsc;
use uuid::Uuid;

/// Bounded buffer for the capture event channel
///
/// Sized so the terminal event never competes with partials for a slot under
/// normal consumption.
const CAPTURE_CHANNEL_BUFFER_SIZE: usize = 64;

/// Stable error codes carried by terminal capture errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureErrorCode {
    /// The platform lacks a recognition capability
    Unavailable,
    /// The audio device or recognizer failed
    Device,
    /// The recognizer gave up waiting for speech
    Timeout,
    /// Audio was captured but no speech was recognized
    NoSpeech,
}

impl CaptureErrorCode {
    /// Stable string form used in boundary payloads
    pub fn code(&self) -> &'static str {
        match self {
            CaptureErrorCode::Unavailable => "unavailable",
            CaptureErrorCode::Device => "device",
            CaptureErrorCode::Timeout => "timeout",
            CaptureErrorCode::NoSpeech => "no_speech",
        }
    }
}

impl std::fmt::Display for CaptureErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Events produced by a capture session
///
/// For a single session the order is Ready, zero or more Partial, then at
/// most one terminal event (Final or Error). The event channel closes when
/// the session terminates, whether or not a terminal event was emitted.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// The session claimed the microphone and is listening
    Ready,
    /// Interim hypothesis; supersedes any previous Partial
    Partial(String),
    /// The completed utterance
    Final(String),
    /// Terminal failure
    Error(CaptureErrorCode),
}

impl CaptureEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureEvent::Final(_) | CaptureEvent::Error(_))
    }
}

/// Errors from capture session operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    /// A session is already active
    #[error("A capture session is already active")]
    AlreadyActive,
    /// The microphone is held by another component
    #[error("Microphone unavailable: {0}")]
    Microphone(MicError),
}

/// The platform speech recognizer, consumed as an opaque capability
///
/// The backend streams recognition results into the sink from its own
/// callback context. `Ready` is emitted by the session before `start` is
/// called; the backend only ever delivers partials and the terminal event.
pub trait RecognitionBackend: Send {
    /// Whether recognition is available on this device
    fn is_available(&self) -> bool;

    /// Begin recognizing; deliver results through `sink` until terminal
    ///
    /// A returned error code becomes the session's terminal event.
    fn start(&mut self, sink: CaptureSink) -> Result<(), CaptureErrorCode>;

    /// Cancel in-flight recognition; must be safe to call at any time
    fn cancel(&mut self);
}

struct SinkState {
    tx: Option<tokio_mpsc::Sender<CaptureEvent>>,
    mic_guard: Option<MicGuard>,
    terminated: bool,
}

struct SinkInner {
    session_id: Uuid,
    state: Mutex<SinkState>,
}

/// Guarded event sink for one capture session
///
/// Enforces the session's delivery contract: at most one terminal event,
/// nothing after termination, microphone released the moment the session
/// terminates. Late events from a cancelled backend are tolerated as no-ops.
#[derive(Clone)]
pub struct CaptureSink {
    inner: Arc<SinkInner>,
}

impl CaptureSink {
    fn new(
        session_id: Uuid,
        tx: tokio_mpsc::Sender<CaptureEvent>,
        mic_guard: Option<MicGuard>,
    ) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                session_id,
                state: Mutex::new(SinkState {
                    tx: Some(tx),
                    mic_guard,
                    terminated: false,
                }),
            }),
        }
    }

    /// Identifier of the session this sink belongs to
    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Whether a terminal event was emitted or the session was stopped
    pub fn is_terminated(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|s| s.terminated)
            .unwrap_or(true)
    }

    fn send_interim(&self, event: CaptureEvent) {
        let state = match self.inner.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };
        if state.terminated {
            crate::trace!("[capture] Event after termination, dropping");
            return;
        }
        if let Some(tx) = &state.tx {
            // Interim events are best-effort; a full buffer drops the hypothesis
            if let Err(e) = tx.try_send(event) {
                crate::warn!("[capture] Failed to send event: {} (channel full or closed)", e);
            }
        }
    }

    fn send_terminal(&self, event: Option<CaptureEvent>) {
        let (tx, mic_guard) = {
            let mut state = match self.inner.state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };
            if state.terminated {
                return;
            }
            state.terminated = true;
            (state.tx.take(), state.mic_guard.take())
        };
        // Release the device before the terminal event is observable, so the
        // consumer can restart the detector immediately
        drop(mic_guard);
        if let (Some(tx), Some(event)) = (&tx, event) {
            if let Err(e) = tx.try_send(event) {
                crate::warn!("[capture] Failed to send terminal event: {}", e);
            }
        }
        // Dropping tx closes the channel; the closed channel is the
        // end-of-session signal even when the terminal event was suppressed
        drop(tx);
    }

    pub(crate) fn ready(&self) {
        self.send_interim(CaptureEvent::Ready);
    }

    /// Deliver an interim hypothesis
    pub fn partial(&self, text: impl Into<String>) {
        self.send_interim(CaptureEvent::Partial(text.into()));
    }

    /// Deliver the completed utterance and terminate the session
    pub fn finalize(&self, text: impl Into<String>) {
        self.send_terminal(Some(CaptureEvent::Final(text.into())));
    }

    /// Deliver a terminal error and terminate the session
    pub fn error(&self, code: CaptureErrorCode) {
        self.send_terminal(Some(CaptureEvent::Error(code)));
    }

    /// Terminate without a terminal event (explicit stop before completion)
    pub(crate) fn close_silently(&self) {
        self.send_terminal(None);
    }
}

/// Short-lived session converting spoken audio into recognized text
///
/// Only one session may be active at a time. `stop` is idempotent; stopping
/// before the terminal event suppresses it rather than synthesizing an empty
/// `Final`.
pub struct SpeechCaptureSession {
    backend: Box<dyn RecognitionBackend>,
    mic: Microphone,
    active: Option<CaptureSink>,
}

impl SpeechCaptureSession {
    pub fn new(backend: Box<dyn RecognitionBackend>, mic: Microphone) -> Self {
        Self {
            backend,
            mic,
            active: None,
        }
    }

    /// Whether a session is active and has not yet terminated
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .map(|sink| !sink.is_terminated())
            .unwrap_or(false)
    }

    /// Identifier of the active session, if any
    pub fn current_session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|sink| sink.session_id())
    }

    /// Start a capture session
    ///
    /// If the recognition capability is unavailable the returned channel
    /// carries a single `Error(Unavailable)` and no microphone is claimed.
    /// Otherwise the channel opens with `Ready` and closes on termination.
    pub fn start(
        &mut self,
    ) -> Result<(Uuid, tokio_mpsc::Receiver<CaptureEvent>), CaptureError> {
        if self.is_active() {
            return Err(CaptureError::AlreadyActive);
        }

        let session_id = Uuid::new_v4();
        let (tx, rx) = tokio_mpsc::channel(CAPTURE_CHANNEL_BUFFER_SIZE);

        if !self.backend.is_available() {
            crate::warn!("[capture] Recognition unavailable on this device");
            let sink = CaptureSink::new(session_id, tx, None);
            sink.error(CaptureErrorCode::Unavailable);
            return Ok((session_id, rx));
        }

        let mic_guard = self
            .mic
            .acquire(MicOwner::CaptureSession)
            .map_err(CaptureError::Microphone)?;

        let sink = CaptureSink::new(session_id, tx, Some(mic_guard));
        sink.ready();

        if let Err(code) = self.backend.start(sink.clone()) {
            crate::error!("[capture] Backend failed to start: {}", code);
            sink.error(code);
            return Ok((session_id, rx));
        }

        crate::info!("[capture] Session {} started", session_id);
        self.active = Some(sink);
        Ok((session_id, rx))
    }

    /// Stop the active session
    ///
    /// Cancels in-flight recognition. If no terminal event was emitted yet it
    /// is suppressed; the session's channel simply closes. Idempotent and
    /// safe to call from any thread holding the session.
    pub fn stop(&mut self) {
        let Some(sink) = self.active.take() else {
            crate::debug!("[capture] Stop with no active session, ignoring");
            return;
        };
        crate::info!("[capture] Stopping session {}", sink.session_id());
        self.backend.cancel();
        sink.close_silently();
    }
}
