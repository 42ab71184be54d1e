use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use copylint_protocol::{
    AnalysisResult, AnalyzeRequest, AnalyzeResponse, GuidelineMeta, Provenance, Telemetry,
    TextItem,
};
use copylint_rules::{guidelines_version, normalize, quick_hash, GuidelineRecord, Rule, RuleSetMemo};
use copylint_store::{CacheLayer, GuidelineStore};

use crate::config::EngineConfig;
use crate::error::{EngineError, InferenceError};
use crate::filters::FilterChain;
use crate::inference::{Inference, RawItemResult};
use crate::prompt::build_prompt;
use crate::reconcile::reconcile;

/// Request-scoped batch orchestration: pre-filter, cache probe, concurrent
/// batch dispatch under one global deadline, reconcile, cache write, and
/// input-order reassembly.
///
/// Per request the state machine is
/// `Received -> PreFiltered -> CacheProbed -> (Batched -> InferenceInFlight
/// -> Reconciled)* -> Assembled`, and every failure mode below the
/// guideline store degrades to per-item fallback results rather than a
/// request error.
pub struct Orchestrator {
    config: EngineConfig,
    cache: CacheLayer,
    guidelines: Arc<dyn GuidelineStore>,
    inference: Arc<dyn Inference>,
    memo: Arc<RuleSetMemo>,
    filters: Arc<FilterChain>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        cache: CacheLayer,
        guidelines: Arc<dyn GuidelineStore>,
        inference: Arc<dyn Inference>,
    ) -> Self {
        Self {
            config,
            cache,
            guidelines,
            inference,
            memo: Arc::new(RuleSetMemo::new()),
            filters: Arc::new(FilterChain::default_policy()),
        }
    }

    /// Replace the heuristic false-positive chain. Policy belongs to the
    /// caller, not this state machine.
    #[must_use]
    pub fn with_filters(mut self, filters: FilterChain) -> Self {
        self.filters = Arc::new(filters);
        self
    }

    pub async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalyzeResponse, EngineError> {
        let started = Instant::now();
        let deadline = started + self.config.total_budget;

        request
            .validate(self.config.max_items)
            .map_err(EngineError::Request)?;

        let guidelines = self.load_guidelines(deadline).await?;
        let version = guidelines_version(&guidelines);
        let rules = self.memo.get_or_extract(&version, &guidelines);
        let meta = guideline_meta(&guidelines, &rules, &version);

        let total_items = request.items.len();
        let mut slots: Vec<Option<AnalysisResult>> = vec![None; total_items];
        let mut timed_out = false;

        // Pre-filter: blank items pass through as compliant results so the
        // output stays length- and order-matched to the input; caller
        // `likelyCompliant` hints are trusted without verification.
        let mut pending: Vec<(usize, TextItem)> = Vec::new();
        for (index, item) in request.items.iter().enumerate() {
            if item.text.trim().is_empty() || item.likely_compliant.unwrap_or(false) {
                slots[index] = Some(AnalysisResult::compliant(
                    &item.id,
                    &item.text,
                    &version,
                    Provenance::PreFiltered,
                ));
            } else {
                pending.push((index, item.clone()));
            }
        }

        let pending = self.probe_cache(pending, &version, deadline, &mut slots).await;

        // Normalization-equivalent texts share one inference slot; the
        // copies are filled in from their representative after batches
        // resolve.
        let (pending, duplicates) = dedup_pending(pending);

        if !pending.is_empty() {
            let prompt = Arc::new(build_prompt(
                &guidelines,
                &rules,
                &version,
                self.config.max_examples_per_guideline,
            ));
            let context = BatchContext {
                inference: Arc::clone(&self.inference),
                prompt,
                filters: Arc::clone(&self.filters),
                version: version.clone(),
                deadline,
                min_budget: self.config.min_inference_budget,
                reserve: self.config.assembly_reserve,
                max_retries: self.config.max_retries,
            };

            // All batches go out concurrently; total latency is governed by
            // the slowest batch, not the sum.
            let mut in_flight = Vec::new();
            for chunk in pending.chunks(self.config.max_batch_size) {
                let batch = chunk.to_vec();
                let handle = tokio::spawn(run_batch(context.clone(), chunk.to_vec()));
                in_flight.push((batch, handle));
            }

            for (batch, handle) in in_flight {
                match handle.await {
                    Ok((results, deadline_hit)) => {
                        timed_out |= deadline_hit;
                        for (index, result) in results {
                            slots[index] = Some(result);
                        }
                    }
                    Err(err) => {
                        // A panicked batch task is isolated to its own items.
                        log::error!("batch task failed: {err}");
                        for (index, item) in batch {
                            slots[index] = Some(AnalysisResult::degraded(
                                &item.id,
                                &item.text,
                                &version,
                                "batch task failed",
                            ));
                        }
                    }
                }
            }
        }

        self.write_back(&slots, &version);

        for (index, item, rep_index) in duplicates {
            slots[index] = match &slots[rep_index] {
                Some(rep) => Some(AnalysisResult {
                    id: item.id.clone(),
                    ..rep.clone()
                }),
                None => Some(AnalysisResult::degraded(
                    &item.id,
                    &item.text,
                    &version,
                    "item left unresolved",
                )),
            };
        }

        let mut results = Vec::with_capacity(total_items);
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(result) => results.push(result),
                None => {
                    let item = &request.items[index];
                    results.push(AnalysisResult::degraded(
                        &item.id,
                        &item.text,
                        &version,
                        "item left unresolved",
                    ));
                }
            }
        }

        timed_out |= Instant::now() >= deadline;
        let telemetry = telemetry_from(&results, started.elapsed());
        Ok(AnalyzeResponse {
            success: true,
            results,
            telemetry,
            guidelines: meta,
            timed_out,
            error: None,
        })
    }

    async fn load_guidelines(
        &self,
        deadline: Instant,
    ) -> Result<Vec<GuidelineRecord>, EngineError> {
        let remaining = remaining_budget(deadline, self.config.assembly_reserve);
        match tokio::time::timeout(remaining, self.guidelines.active_guidelines()).await {
            Ok(Ok(guidelines)) => Ok(guidelines),
            Ok(Err(err)) => Err(EngineError::GuidelinesUnavailable(err.to_string())),
            Err(_) => Err(EngineError::GuidelinesUnavailable(format!(
                "guideline load timed out after {remaining:?}"
            ))),
        }
    }

    /// Probe every pending item concurrently; each probe gets an equal share
    /// of the remaining budget, capped by the configured probe bound. A
    /// relationship probe runs only after a direct miss.
    async fn probe_cache(
        &self,
        pending: Vec<(usize, TextItem)>,
        version: &str,
        deadline: Instant,
        slots: &mut [Option<AnalysisResult>],
    ) -> Vec<(usize, TextItem)> {
        if pending.is_empty() {
            return pending;
        }

        let remaining = remaining_budget(deadline, self.config.assembly_reserve);
        let share = remaining / u32::try_from(pending.len()).unwrap_or(u32::MAX).max(1);
        let probe_budget = share.min(self.config.max_cache_probe);

        let mut probes = Vec::with_capacity(pending.len());
        for (index, item) in pending {
            let cache = self.cache.clone();
            let version = version.to_string();
            let probe_item = item.clone();
            let handle = tokio::spawn(async move {
                match cache
                    .lookup(&probe_item.id, &probe_item.text, &version, probe_budget)
                    .await
                {
                    Some(hit) => Some(hit),
                    None => {
                        cache
                            .lookup_via_relationship(
                                &probe_item.id,
                                &probe_item.text,
                                &version,
                                probe_budget,
                            )
                            .await
                    }
                }
            });
            probes.push((index, item, handle));
        }

        let mut unresolved = Vec::new();
        for (index, item, handle) in probes {
            match handle.await {
                Ok(Some(hit)) => slots[index] = Some(hit),
                Ok(None) => unresolved.push((index, item)),
                Err(err) => {
                    log::error!("cache probe task failed: {err}");
                    unresolved.push((index, item));
                }
            }
        }
        unresolved
    }

    /// Spawn the additive cache writes for freshly analyzed results. These
    /// never block the response.
    fn write_back(&self, slots: &[Option<AnalysisResult>], version: &str) {
        let timeout = self.config.cache_write_timeout;
        for result in slots.iter().flatten() {
            if result.provenance != Provenance::FreshlyAnalyzed {
                continue;
            }
            self.cache
                .store(&result.original_text, version, result, timeout);
            if result.has_violations && result.corrected_text != result.original_text {
                self.cache.store_relationship(
                    &result.original_text,
                    &result.corrected_text,
                    version,
                    timeout,
                );
                self.cache
                    .mark_as_compliant(&result.corrected_text, version, timeout);
            }
        }
    }
}

#[derive(Clone)]
struct BatchContext {
    inference: Arc<dyn Inference>,
    prompt: Arc<String>,
    filters: Arc<FilterChain>,
    version: String,
    deadline: Instant,
    min_budget: Duration,
    reserve: Duration,
    max_retries: usize,
}

/// Drive one batch through inference with retry. Each attempt gets a fresh
/// deadline from the remaining budget; when the budget drops below the
/// minimum useful call time, the batch short-circuits to fallback results.
/// Returns the per-item results plus whether the deadline forced them.
async fn run_batch(
    context: BatchContext,
    batch: Vec<(usize, TextItem)>,
) -> (Vec<(usize, AnalysisResult)>, bool) {
    let items: Vec<TextItem> = batch.iter().map(|(_, item)| item.clone()).collect();
    let mut last_error = String::new();

    for attempt in 0..=context.max_retries {
        let remaining = remaining_budget(context.deadline, context.reserve);
        if remaining < context.min_budget {
            let reason = if attempt == 0 {
                "insufficient time budget for inference".to_string()
            } else {
                format!("time budget exhausted after {attempt} failed attempts: {last_error}")
            };
            return (fallback_batch(&batch, &context.version, &reason), true);
        }

        // The backend receives the timeout but is not trusted to honor it;
        // the outer timeout keeps a stalled impl from outliving the budget.
        let outcome = tokio::time::timeout(
            remaining,
            context.inference.analyze(&context.prompt, &items, remaining),
        )
        .await
        .unwrap_or(Err(InferenceError::Timeout(remaining)));

        match outcome {
            Ok(raw_results) => {
                let by_id: HashMap<&str, &RawItemResult> = raw_results
                    .iter()
                    .map(|result| (result.id.as_str(), result))
                    .collect();
                let results = batch
                    .iter()
                    .map(|(index, item)| {
                        let result = match by_id.get(item.id.as_str()) {
                            Some(raw) => reconcile(
                                raw,
                                &item.id,
                                &item.text,
                                &context.version,
                                &context.filters,
                            ),
                            None => AnalysisResult::degraded(
                                &item.id,
                                &item.text,
                                &context.version,
                                "item missing from inference response",
                            ),
                        };
                        (*index, result)
                    })
                    .collect();
                return (results, false);
            }
            Err(err) => {
                log::warn!(
                    "inference attempt {}/{} failed for a {}-item batch: {err}",
                    attempt + 1,
                    context.max_retries + 1,
                    items.len()
                );
                last_error = err.to_string();
            }
        }
    }

    let reason = format!(
        "inference failed after {} attempts: {last_error}",
        context.max_retries + 1
    );
    (fallback_batch(&batch, &context.version, &reason), false)
}

fn fallback_batch(
    batch: &[(usize, TextItem)],
    version: &str,
    reason: &str,
) -> Vec<(usize, AnalysisResult)> {
    batch
        .iter()
        .map(|(index, item)| {
            (
                *index,
                AnalysisResult::degraded(&item.id, &item.text, version, reason),
            )
        })
        .collect()
}

/// Collapse pending items whose normalized text is identical. The first
/// occurrence stays in the batch queue; later ones record the slot index of
/// their representative. The cheap hash narrows candidates, the normalized
/// comparison confirms them.
fn dedup_pending(
    pending: Vec<(usize, TextItem)>,
) -> (Vec<(usize, TextItem)>, Vec<(usize, TextItem, usize)>) {
    let mut seen: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut unique: Vec<(usize, TextItem)> = Vec::new();
    let mut duplicates = Vec::new();
    for (index, item) in pending {
        let normalized = normalize(&item.text);
        let positions = seen.entry(quick_hash(&normalized)).or_default();
        match positions
            .iter()
            .find(|&&pos| normalize(&unique[pos].1.text) == normalized)
        {
            Some(&pos) => duplicates.push((index, item, unique[pos].0)),
            None => {
                positions.push(unique.len());
                unique.push((index, item));
            }
        }
    }
    (unique, duplicates)
}

fn remaining_budget(deadline: Instant, reserve: Duration) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .checked_sub(reserve)
        .unwrap_or(Duration::ZERO)
}

fn guideline_meta(
    guidelines: &[GuidelineRecord],
    rules: &[Rule],
    version: &str,
) -> GuidelineMeta {
    let categories: BTreeSet<String> = guidelines
        .iter()
        .map(|g| g.category.clone())
        .collect();
    GuidelineMeta {
        guideline_count: guidelines.len(),
        categories: categories.into_iter().collect(),
        rule_count: rules.len(),
        version: version.to_string(),
    }
}

fn telemetry_from(results: &[AnalysisResult], elapsed: Duration) -> Telemetry {
    let mut telemetry = Telemetry {
        total_items: results.len(),
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        ..Telemetry::default()
    };
    for result in results {
        match result.provenance {
            Provenance::FreshlyAnalyzed => telemetry.freshly_analyzed += 1,
            Provenance::CacheHit => telemetry.cache_hits += 1,
            Provenance::RelationshipHit => telemetry.relationship_hits += 1,
            Provenance::PreFiltered => telemetry.pre_filtered += 1,
            Provenance::Fallback => telemetry.fallbacks += 1,
        }
    }
    telemetry
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn remaining_budget_saturates_at_zero() {
        let past = Instant::now() - Duration::from_secs(1);
        assert_eq!(remaining_budget(past, Duration::from_millis(100)), Duration::ZERO);

        let near = Instant::now() + Duration::from_millis(50);
        assert_eq!(remaining_budget(near, Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn dedup_collapses_normalization_equivalent_items() {
        let item = |id: &str, text: &str| TextItem {
            id: id.to_string(),
            text: text.to_string(),
            likely_compliant: None,
        };
        let pending = vec![
            (0, item("a", "Contact support")),
            (2, item("b", "  Contact\u{00a0}support ")),
            (3, item("c", "Something else")),
        ];
        let (unique, duplicates) = dedup_pending(pending);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].0, 0);
        assert_eq!(unique[1].0, 3);
        assert_eq!(duplicates, vec![(2, item("b", "  Contact\u{00a0}support "), 0)]);
    }

    #[test]
    fn telemetry_counts_provenance_tags() {
        let results = vec![
            AnalysisResult::compliant("a", "t", "v", Provenance::CacheHit),
            AnalysisResult::compliant("b", "t", "v", Provenance::RelationshipHit),
            AnalysisResult::compliant("c", "t", "v", Provenance::PreFiltered),
            AnalysisResult::degraded("d", "t", "v", "boom"),
        ];
        let telemetry = telemetry_from(&results, Duration::from_millis(42));
        assert_eq!(telemetry.total_items, 4);
        assert_eq!(telemetry.cache_hits, 1);
        assert_eq!(telemetry.relationship_hits, 1);
        assert_eq!(telemetry.pre_filtered, 1);
        assert_eq!(telemetry.fallbacks, 1);
        assert_eq!(telemetry.elapsed_ms, 42);
    }
}
