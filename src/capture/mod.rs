// Speech-capture module
// A bounded session converting spoken audio into recognized text

mod session;

pub use session::{
    CaptureError, CaptureErrorCode, CaptureEvent, CaptureSink, RecognitionBackend,
    SpeechCaptureSession,
};

#[cfg(test)]
pub(crate) use session::tests::MockRecognizer;
