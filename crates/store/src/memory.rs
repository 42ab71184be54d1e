use std::collections::HashMap;

use async_trait::async_trait;
use copylint_rules::GuidelineRecord;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::{AnalysisCacheStore, CachedResult, GuidelineStore, RelationshipRecord, RelationshipStore};

/// In-memory implementation of all three store tables. Used by the CLI and
/// by tests; a production deployment swaps in a persistent backend behind
/// the same traits.
#[derive(Default)]
pub struct MemoryStore {
    results: RwLock<HashMap<(String, String), CachedResult>>,
    relationships: RwLock<HashMap<(String, String), RelationshipRecord>>,
    guidelines: RwLock<Vec<GuidelineRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_guidelines(guidelines: Vec<GuidelineRecord>) -> Self {
        Self {
            guidelines: RwLock::new(guidelines),
            ..Self::default()
        }
    }

    pub async fn set_guidelines(&self, guidelines: Vec<GuidelineRecord>) {
        *self.guidelines.write().await = guidelines;
    }

    pub async fn result_count(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn relationship_count(&self) -> usize {
        self.relationships.read().await.len()
    }
}

#[async_trait]
impl AnalysisCacheStore for MemoryStore {
    async fn get_result(&self, fingerprint: &str, version: &str) -> Result<Option<CachedResult>> {
        let key = (version.to_string(), fingerprint.to_string());
        Ok(self.results.read().await.get(&key).cloned())
    }

    async fn put_result(
        &self,
        fingerprint: &str,
        version: &str,
        result: &CachedResult,
    ) -> Result<()> {
        let key = (version.to_string(), fingerprint.to_string());
        self.results.write().await.insert(key, result.clone());
        Ok(())
    }
}

#[async_trait]
impl RelationshipStore for MemoryStore {
    async fn get_by_corrected(
        &self,
        corrected_fingerprint: &str,
        version: &str,
    ) -> Result<Option<RelationshipRecord>> {
        let key = (version.to_string(), corrected_fingerprint.to_string());
        Ok(self.relationships.read().await.get(&key).cloned())
    }

    async fn put_relationship(&self, record: &RelationshipRecord) -> Result<()> {
        let key = (
            record.guidelines_version.clone(),
            record.corrected_fingerprint.clone(),
        );
        // Last writer wins; records are content-keyed so this is idempotent.
        self.relationships.write().await.insert(key, record.clone());
        Ok(())
    }
}

#[async_trait]
impl GuidelineStore for MemoryStore {
    async fn active_guidelines(&self) -> Result<Vec<GuidelineRecord>> {
        Ok(self
            .guidelines
            .read()
            .await
            .iter()
            .filter(|g| g.active)
            .cloned()
            .collect())
    }
}
