use std::sync::{Arc, Mutex, PoisonError};

use crate::extract::{extract_rules, Rule};
use crate::guideline::GuidelineRecord;

/// Read-through memo of the extracted rule set, keyed by the guideline
/// version digest. A version change supersedes the previous entry wholesale;
/// a race between requests only costs a redundant extraction, so a plain
/// mutex over the single slot is enough.
#[derive(Default)]
pub struct RuleSetMemo {
    slot: Mutex<Option<(String, Arc<Vec<Rule>>)>>,
}

impl RuleSetMemo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_extract(
        &self,
        version: &str,
        guidelines: &[GuidelineRecord],
    ) -> Arc<Vec<Rule>> {
        {
            let guard = self
                .slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some((cached_version, rules)) = guard.as_ref() {
                if cached_version == version {
                    return Arc::clone(rules);
                }
            }
        }

        let rules = Arc::new(extract_rules(guidelines));
        let mut guard = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some((version.to_string(), Arc::clone(&rules)));
        rules
    }
}
