use std::sync::Arc;
use std::time::Duration;

use copylint_protocol::{AnalysisResult, Provenance};
use copylint_rules::fingerprint;
use tokio::task::JoinHandle;

use crate::{AnalysisCacheStore, CachedResult, RelationshipRecord, RelationshipStore};

/// Read/write discipline over the cache and relationship tables.
///
/// Reads are bounded by a caller-supplied timeout and degrade to a miss on
/// timeout or store error: a cache outage costs a full analysis, never a
/// failed request. Writes are spawned, best-effort, and logged on failure;
/// the request path never waits on them.
#[derive(Clone)]
pub struct CacheLayer {
    results: Arc<dyn AnalysisCacheStore>,
    relationships: Arc<dyn RelationshipStore>,
}

impl CacheLayer {
    #[must_use]
    pub fn new(
        results: Arc<dyn AnalysisCacheStore>,
        relationships: Arc<dyn RelationshipStore>,
    ) -> Self {
        Self {
            results,
            relationships,
        }
    }

    /// Direct cache probe by `(fingerprint(normalize(text)), version)`.
    pub async fn lookup(
        &self,
        id: &str,
        text: &str,
        version: &str,
        timeout: Duration,
    ) -> Option<AnalysisResult> {
        let key = fingerprint(text);
        match tokio::time::timeout(timeout, self.results.get_result(&key, version)).await {
            Ok(Ok(Some(cached))) => Some(cached.into_result(id, Provenance::CacheHit)),
            Ok(Ok(None)) => None,
            Ok(Err(err)) => {
                log::warn!("cache lookup failed, treating as miss: {err}");
                None
            }
            Err(_) => {
                log::debug!("cache lookup timed out after {timeout:?}, treating as miss");
                None
            }
        }
    }

    /// Relationship probe, run only after a direct miss: if this text's
    /// fingerprint matches a stored corrected-fingerprint under the current
    /// version, the author has already applied a known-good correction, so
    /// the item is compliant without inference.
    pub async fn lookup_via_relationship(
        &self,
        id: &str,
        text: &str,
        version: &str,
        timeout: Duration,
    ) -> Option<AnalysisResult> {
        let key = fingerprint(text);
        match tokio::time::timeout(timeout, self.relationships.get_by_corrected(&key, version))
            .await
        {
            Ok(Ok(Some(_))) => Some(AnalysisResult::compliant(
                id,
                text,
                version,
                Provenance::RelationshipHit,
            )),
            Ok(Ok(None)) => None,
            Ok(Err(err)) => {
                log::warn!("relationship lookup failed, treating as miss: {err}");
                None
            }
            Err(_) => {
                log::debug!("relationship lookup timed out after {timeout:?}, treating as miss");
                None
            }
        }
    }

    /// Fire-and-forget write of a verdict. The handle is returned so tests
    /// can await settlement; the request path drops it.
    pub fn store(
        &self,
        text: &str,
        version: &str,
        result: &AnalysisResult,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let key = fingerprint(text);
        let cached = CachedResult::from_result(result);
        let store = Arc::clone(&self.results);
        let version = version.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, store.put_result(&key, &version, &cached)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::warn!("cache write failed: {err}"),
                Err(_) => log::warn!("cache write timed out after {timeout:?}"),
            }
        })
    }

    /// Record that `corrected_text` is a known-good correction of
    /// `original_text` under this version. Idempotent upsert, fire-and-forget.
    pub fn store_relationship(
        &self,
        original_text: &str,
        corrected_text: &str,
        version: &str,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let record = RelationshipRecord {
            original_fingerprint: fingerprint(original_text),
            corrected_fingerprint: fingerprint(corrected_text),
            guidelines_version: version.to_string(),
            original_text: original_text.to_string(),
            corrected_text: corrected_text.to_string(),
        };
        let store = Arc::clone(&self.relationships);
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, store.put_relationship(&record)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::warn!("relationship write failed: {err}"),
                Err(_) => log::warn!("relationship write timed out after {timeout:?}"),
            }
        })
    }

    /// Pre-seed the result cache so a corrected text reappearing verbatim in
    /// a later batch resolves as a direct hit, skipping even the
    /// relationship probe.
    pub fn mark_as_compliant(
        &self,
        corrected_text: &str,
        version: &str,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let compliant = AnalysisResult::compliant(
            "", // id is volatile and not persisted
            corrected_text,
            version,
            Provenance::CacheHit,
        );
        self.store(corrected_text, version, &compliant, timeout)
    }
}
