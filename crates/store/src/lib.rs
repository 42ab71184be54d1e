pub mod cache;
pub mod error;
pub mod memory;

pub use cache::CacheLayer;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;

use async_trait::async_trait;
use copylint_protocol::{AnalysisResult, Provenance, Violation};
use copylint_rules::GuidelineRecord;
use serde::{Deserialize, Serialize};

/// An analysis verdict as persisted: the result minus per-request volatile
/// fields (item id, provenance, fallback markers).
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CachedResult {
    pub has_violations: bool,
    pub violations: Vec<Violation>,
    pub corrected_text: String,
    pub original_text: String,
    pub confidence: f64,
    pub guidelines_version: String,
}

impl CachedResult {
    #[must_use]
    pub fn from_result(result: &AnalysisResult) -> Self {
        Self {
            has_violations: result.has_violations,
            violations: result.violations.clone(),
            corrected_text: result.corrected_text.clone(),
            original_text: result.original_text.clone(),
            confidence: result.confidence,
            guidelines_version: result.guidelines_version.clone(),
        }
    }

    /// Rehydrate a stored verdict for a new request item.
    #[must_use]
    pub fn into_result(self, id: impl Into<String>, provenance: Provenance) -> AnalysisResult {
        AnalysisResult {
            id: id.into(),
            has_violations: self.has_violations,
            violations: self.violations,
            corrected_text: self.corrected_text,
            original_text: self.original_text,
            confidence: self.confidence,
            guidelines_version: self.guidelines_version,
            provenance,
            fallback: false,
            fallback_reason: None,
        }
    }
}

/// A known-good correction pairing, keyed by the fingerprints of both sides
/// and scoped by guideline version.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRecord {
    pub original_fingerprint: String,
    pub corrected_fingerprint: String,
    pub guidelines_version: String,
    pub original_text: String,
    pub corrected_text: String,
}

/// Point lookups/upserts against the analysis-cache table. Keys are
/// `(fingerprint of normalized text, guidelines version)`; entries are never
/// explicitly expired — a version change re-namespaces the table.
#[async_trait]
pub trait AnalysisCacheStore: Send + Sync {
    async fn get_result(&self, fingerprint: &str, version: &str) -> Result<Option<CachedResult>>;
    async fn put_result(
        &self,
        fingerprint: &str,
        version: &str,
        result: &CachedResult,
    ) -> Result<()>;
}

/// The relationship table: corrected-fingerprint lookups and idempotent
/// upserts keyed by the fingerprint pair.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn get_by_corrected(
        &self,
        corrected_fingerprint: &str,
        version: &str,
    ) -> Result<Option<RelationshipRecord>>;
    async fn put_relationship(&self, record: &RelationshipRecord) -> Result<()>;
}

/// The guideline table. Unreachable guidelines are fatal for a request,
/// unlike the cache tables which degrade silently.
#[async_trait]
pub trait GuidelineStore: Send + Sync {
    async fn active_guidelines(&self) -> Result<Vec<GuidelineRecord>>;
}
