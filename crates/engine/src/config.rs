use std::time::Duration;

/// Tuning inputs for the batch orchestrator. All timing behavior derives
/// from these values at dispatch time, so tests drive the state machine by
/// injecting a fixed budget instead of racing wall clocks.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Maximum items sent to the inference service in one call.
    pub max_batch_size: usize,
    /// Hard wall-clock budget for the whole request.
    pub total_budget: Duration,
    /// Below this remaining budget no inference call is attempted; unresolved
    /// items short-circuit to fallback results.
    pub min_inference_budget: Duration,
    /// Slice of the budget reserved for response assembly.
    pub assembly_reserve: Duration,
    /// Retries per batch after the first failed attempt.
    pub max_retries: usize,
    /// Upper bound on any single cache probe, regardless of remaining budget.
    pub max_cache_probe: Duration,
    /// Bound on each fire-and-forget cache/relationship write.
    pub cache_write_timeout: Duration,
    /// Per-request item ceiling; 0 disables the check.
    pub max_items: usize,
    /// Positive/negative examples rendered per guideline in the prompt.
    pub max_examples_per_guideline: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 12,
            total_budget: Duration::from_secs(25),
            min_inference_budget: Duration::from_millis(1_500),
            assembly_reserve: Duration::from_millis(500),
            max_retries: 2,
            max_cache_probe: Duration::from_secs(2),
            cache_write_timeout: Duration::from_secs(3),
            max_items: 0,
            max_examples_per_guideline: 3,
        }
    }
}
