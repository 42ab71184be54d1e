use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const ANALYZE_SCHEMA_VERSION: u32 = 1;

/// Confidence bounds enforced on every surviving violation.
pub const MIN_VIOLATION_CONFIDENCE: f64 = 0.85;
pub const MAX_VIOLATION_CONFIDENCE: f64 = 1.0;

/// Confidence reported on degraded results when inference never ran.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextItem {
    pub id: String,
    pub text: String,
    /// Caller hint: the item is already known to be compliant, so cache
    /// lookup and inference are skipped entirely. Trusted, not re-verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likely_compliant: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Literal substring of the item's original text.
    pub original: String,
    pub suggested: String,
    pub confidence: f64,
    pub rule_category: String,
    pub rule_description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    FreshlyAnalyzed,
    CacheHit,
    RelationshipHit,
    PreFiltered,
    Fallback,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub id: String,
    pub has_violations: bool,
    pub violations: Vec<Violation>,
    pub corrected_text: String,
    /// Text this verdict applies to. For cache and relationship hits, and
    /// for items that shared an inference slot with an equivalent item,
    /// this is the stored or representative text, which can differ from
    /// the submitted text in normalized characters (whitespace runs, NBSP,
    /// typographic punctuation). Do not diff it against the raw input.
    pub original_text: String,
    pub confidence: f64,
    pub guidelines_version: String,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl AnalysisResult {
    /// A clean result for text that needs no correction.
    #[must_use]
    pub fn compliant(
        id: impl Into<String>,
        text: impl Into<String>,
        guidelines_version: impl Into<String>,
        provenance: Provenance,
    ) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            has_violations: false,
            violations: Vec::new(),
            corrected_text: text.clone(),
            original_text: text,
            confidence: 1.0,
            guidelines_version: guidelines_version.into(),
            provenance,
            fallback: false,
            fallback_reason: None,
        }
    }

    /// A degraded result emitted when inference failed or the deadline fired.
    #[must_use]
    pub fn degraded(
        id: impl Into<String>,
        text: impl Into<String>,
        guidelines_version: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            has_violations: false,
            violations: Vec::new(),
            corrected_text: text.clone(),
            original_text: text,
            confidence: FALLBACK_CONFIDENCE,
            guidelines_version: guidelines_version.into(),
            provenance: Provenance::Fallback,
            fallback: true,
            fallback_reason: Some(reason.into()),
        }
    }

    /// Structural invariants every result must satisfy before it is returned.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.has_violations != !self.violations.is_empty() {
            return false;
        }
        if !self.has_violations && self.corrected_text != self.original_text {
            return false;
        }
        self.violations.iter().all(|v| {
            self.original_text.contains(&v.original) && v.original != v.suggested
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub items: Vec<TextItem>,
    /// Caller hint: how many presentation layers the items came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_layers: Option<u32>,
    /// Caller hint: how many items are expected to be compliant already.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_compliant: Option<u32>,
}

impl AnalyzeRequest {
    /// Enforce the optional per-request item ceiling. The error names the
    /// limit and suggests how many sub-requests the caller should split into.
    pub fn validate(&self, max_items: usize) -> Result<(), ErrorEnvelope> {
        if max_items == 0 || self.items.len() <= max_items {
            return Ok(());
        }
        let suggested_batches = self.items.len().div_ceil(max_items);
        Err(ErrorEnvelope {
            code: "too_many_items".to_string(),
            message: format!(
                "request has {} items, limit is {max_items}",
                self.items.len()
            ),
            details: Some(serde_json::json!({
                "maxItems": max_items,
                "received": self.items.len(),
                "suggestedBatches": suggested_batches,
            })),
            hint: Some(format!(
                "split the request into {suggested_batches} batches of at most {max_items} items"
            )),
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub total_items: usize,
    pub cache_hits: usize,
    pub relationship_hits: usize,
    pub freshly_analyzed: usize,
    pub pre_filtered: usize,
    pub fallbacks: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GuidelineMeta {
    pub guideline_count: usize,
    pub categories: Vec<String>,
    pub rule_count: usize,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub success: bool,
    pub results: Vec<AnalysisResult>,
    pub telemetry: Telemetry,
    pub guidelines: GuidelineMeta,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub hint: Option<String>,
}
