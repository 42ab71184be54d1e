pub mod config;
pub mod error;
pub mod filters;
pub mod inference;
pub mod orchestrator;
pub mod prompt;
pub mod reconcile;

pub use config::EngineConfig;
pub use error::{EngineError, InferenceError};
pub use filters::{FilterChain, ViolationFilter};
pub use inference::{HttpInference, Inference, RawItemResult, RawViolation};
pub use orchestrator::Orchestrator;
pub use prompt::build_prompt;
pub use reconcile::reconcile;
