use copylint_protocol::Violation;
use once_cell::sync::Lazy;
use regex::Regex;

/// One false-positive heuristic. These encode knowledge about what the
/// inference service over-flags for a particular style guide; they are
/// policy, not mechanism, so the orchestrator takes a chain of them rather
/// than baking any in.
pub trait ViolationFilter: Send + Sync {
    fn name(&self) -> &'static str;
    /// Return false to drop the violation.
    fn keep(&self, original_text: &str, violation: &Violation) -> bool;
}

pub struct FilterChain {
    filters: Vec<Box<dyn ViolationFilter>>,
}

impl FilterChain {
    #[must_use]
    pub fn new(filters: Vec<Box<dyn ViolationFilter>>) -> Self {
        Self { filters }
    }

    /// No heuristics at all; every structurally valid violation survives.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// The stock heuristics: compact dates, time ranges, and a single
    /// politeness term are tolerated rather than flagged.
    #[must_use]
    pub fn default_policy() -> Self {
        Self::new(vec![
            Box::new(CompactDateFilter),
            Box::new(TimeRangeFilter),
            Box::new(SinglePolitenessFilter),
        ])
    }

    #[must_use]
    pub fn retain(&self, original_text: &str, violations: Vec<Violation>) -> Vec<Violation> {
        violations
            .into_iter()
            .filter(|violation| {
                for filter in &self.filters {
                    if !filter.keep(original_text, violation) {
                        log::debug!(
                            "filter '{}' dropped violation on {:?}",
                            filter.name(),
                            violation.original
                        );
                        return false;
                    }
                }
                true
            })
            .collect()
    }
}

static COMPACT_DATE: Lazy<Regex> = Lazy::new(|| {
    // 3/5, 03/05, 3/5/24, 03/05/2024
    Regex::new(r"^\d{1,2}/\d{1,2}(/\d{2}|/\d{4})?$").expect("compact date regex")
});

/// Valid compact date formats are house style, not violations.
struct CompactDateFilter;

impl ViolationFilter for CompactDateFilter {
    fn name(&self) -> &'static str {
        "compact_date"
    }

    fn keep(&self, _original_text: &str, violation: &Violation) -> bool {
        !COMPACT_DATE.is_match(violation.original.trim())
    }
}

static TIME_RANGE: Lazy<Regex> = Lazy::new(|| {
    // 9-5, 9:30-17:00, 9am-5pm, 9:30 AM - 5:00 PM
    Regex::new(r"(?i)^\d{1,2}(:\d{2})?\s*(am|pm)?\s*-\s*\d{1,2}(:\d{2})?\s*(am|pm)?$")
        .expect("time range regex")
});

/// Valid time ranges are house style, not violations.
struct TimeRangeFilter;

impl ViolationFilter for TimeRangeFilter {
    fn name(&self) -> &'static str {
        "time_range"
    }

    fn keep(&self, _original_text: &str, violation: &Violation) -> bool {
        !TIME_RANGE.is_match(violation.original.trim())
    }
}

const POLITENESS_TERMS: &[&str] = &["please", "thank you", "thanks"];

/// One politeness term per snippet is tolerated; the service tends to flag
/// every occurrence.
struct SinglePolitenessFilter;

impl ViolationFilter for SinglePolitenessFilter {
    fn name(&self) -> &'static str {
        "single_politeness"
    }

    fn keep(&self, original_text: &str, violation: &Violation) -> bool {
        let flagged = violation.original.trim().to_lowercase();
        if !POLITENESS_TERMS.contains(&flagged.as_str()) {
            return true;
        }
        let haystack = original_text.to_lowercase();
        haystack.matches(&flagged).count() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(original: &str) -> Violation {
        Violation {
            original: original.to_string(),
            suggested: format!("{original} (reworded)"),
            confidence: 0.9,
            rule_category: "formatting".to_string(),
            rule_description: "test".to_string(),
        }
    }

    #[test]
    fn compact_dates_are_tolerated() {
        let chain = FilterChain::default_policy();
        let kept = chain.retain(
            "Due 3/5/24, see notes",
            vec![violation("3/5/24"), violation("March fifth")],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].original, "March fifth");
    }

    #[test]
    fn time_ranges_are_tolerated() {
        let chain = FilterChain::default_policy();
        let kept = chain.retain(
            "Open 9am-5pm daily",
            vec![violation("9am-5pm"), violation("9:30 AM - 5:00 PM")],
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn single_politeness_term_is_tolerated_but_repeats_are_not() {
        let chain = FilterChain::default_policy();

        let kept = chain.retain("Please reply soon", vec![violation("Please")]);
        assert!(kept.is_empty());

        let kept = chain.retain(
            "Please reply, and please hurry",
            vec![violation("please")],
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn empty_chain_keeps_everything() {
        let chain = FilterChain::empty();
        let kept = chain.retain("Due 3/5/24", vec![violation("3/5/24")]);
        assert_eq!(kept.len(), 1);
    }
}
