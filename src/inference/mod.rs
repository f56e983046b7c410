// Local inference module
// Hosts the quantized model for on-device text rewriting

mod request;
mod session;

pub use request::{
    GenerationRequest, DEFAULT_CONTEXT_SIZE, DEFAULT_MAX_TOKENS, DEFAULT_MAX_WALL_CLOCK_MS,
    DEFAULT_TEMPERATURE, DEFAULT_THREAD_COUNT,
};
pub use session::{
    EngineError, InferenceEngine, InferenceError, LocalInferenceSession, ModelHandle, ModelStatus,
};

#[cfg(test)]
pub(crate) use session::tests::MockInferenceEngine;
