use std::time::Duration;

use copylint_protocol::ErrorEnvelope;
use thiserror::Error;

/// Fatal request-level failures. Everything else (cache outages, inference
/// failures, malformed output) degrades inside the orchestrator and never
/// surfaces here.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{}", .0.message)]
    Request(ErrorEnvelope),

    #[error("Guideline store unavailable: {0}")]
    GuidelinesUnavailable(String),
}

/// Per-call failures of the inference backend; recovered by batch-level
/// retry and fallback.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned status {0}")]
    Status(u16),

    #[error("malformed output: {0}")]
    Malformed(String),
}
