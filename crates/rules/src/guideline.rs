use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::normalize::hex_digest;

/// Hex length of the guideline version digest. Shorter than a full SHA-256
/// because it namespaces cache keys rather than addressing content.
const VERSION_DIGEST_CHARS: usize = 16;

/// An author-supplied guideline record as stored in the guideline table.
/// The `rules` payload is arbitrarily nested and never validated here; the
/// extractor walks whatever shape the author produced.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GuidelineRecord {
    pub id: String,
    pub category: String,
    pub title: String,
    pub rules: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<serde_json::Value>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub version: String,
    #[serde(default)]
    pub updated_ms: u64,
}

fn default_active() -> bool {
    true
}

/// Digest over the identity fields of all active guidelines, in the order
/// given. Any change to a guideline's rules, version, category, or timestamp
/// changes the digest, which re-namespaces every cache and relationship key
/// without explicit eviction.
#[must_use]
pub fn guidelines_version(guidelines: &[GuidelineRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in guidelines.iter().filter(|g| g.active) {
        hasher.update(record.id.as_bytes());
        hasher.update(b"|");
        hasher.update(record.version.as_bytes());
        hasher.update(b"|");
        hasher.update(record.category.as_bytes());
        hasher.update(b"|");
        // serde_json sorts object keys, so this repr is canonical.
        let rules = serde_json::to_string(&record.rules).unwrap_or_default();
        hasher.update(rules.as_bytes());
        hasher.update(b"|");
        hasher.update(record.updated_ms.to_le_bytes());
        hasher.update(b"\n");
    }
    let mut digest = hex_digest(&hasher.finalize());
    digest.truncate(VERSION_DIGEST_CHARS);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(id: &str, rules: serde_json::Value) -> GuidelineRecord {
        GuidelineRecord {
            id: id.to_string(),
            category: "terminology".to_string(),
            title: "Terminology".to_string(),
            rules,
            examples: None,
            active: true,
            version: "1".to_string(),
            updated_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn version_is_deterministic() {
        let guidelines = vec![record("g1", serde_json::json!({"tone": "friendly"}))];
        assert_eq!(guidelines_version(&guidelines), guidelines_version(&guidelines));
        assert_eq!(guidelines_version(&guidelines).len(), VERSION_DIGEST_CHARS);
    }

    #[test]
    fn rule_change_changes_version() {
        let before = vec![record("g1", serde_json::json!({"tone": "friendly"}))];
        let after = vec![record("g1", serde_json::json!({"tone": "formal"}))];
        assert_ne!(guidelines_version(&before), guidelines_version(&after));
    }

    #[test]
    fn inactive_guidelines_do_not_contribute() {
        let active = vec![record("g1", serde_json::json!({"tone": "friendly"}))];
        let mut with_inactive = active.clone();
        let mut extra = record("g2", serde_json::json!({"dates": "compact"}));
        extra.active = false;
        with_inactive.push(extra);
        assert_eq!(guidelines_version(&active), guidelines_version(&with_inactive));
    }

    #[test]
    fn timestamp_change_changes_version() {
        let before = vec![record("g1", serde_json::json!({"tone": "friendly"}))];
        let mut after = before.clone();
        after[0].updated_ms += 1;
        assert_ne!(guidelines_version(&before), guidelines_version(&after));
    }
}
