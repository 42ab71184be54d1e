use copylint_protocol::{
    AnalysisResult, Provenance, Violation, MAX_VIOLATION_CONFIDENCE, MIN_VIOLATION_CONFIDENCE,
};

use crate::filters::FilterChain;
use crate::inference::{RawItemResult, RawViolation};

/// Validate one raw service verdict against the item's actual text and
/// produce a consistent `AnalysisResult`. The service's id field is
/// untrusted; the caller supplies the authoritative id and original text.
#[must_use]
pub fn reconcile(
    raw: &RawItemResult,
    id: &str,
    original_text: &str,
    version: &str,
    filters: &FilterChain,
) -> AnalysisResult {
    let violations: Vec<Violation> = raw
        .violations
        .iter()
        .filter_map(|raw| validate_violation(raw, original_text))
        .collect();
    let violations = filters.retain(original_text, violations);

    let confidence = raw.confidence.unwrap_or(0.9).clamp(0.0, 1.0);

    if violations.is_empty() {
        let mut result =
            AnalysisResult::compliant(id, original_text, version, Provenance::FreshlyAnalyzed);
        result.confidence = confidence;
        return result;
    }

    // Start from the service's corrected text when it supplied a distinct
    // one, then guarantee every surviving violation's effect is visible.
    let candidate = raw
        .corrected_text
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty() && *text != original_text)
        .unwrap_or(original_text)
        .to_string();
    let corrected_text = apply_violations(candidate, &violations);

    AnalysisResult {
        id: id.to_string(),
        has_violations: true,
        violations,
        corrected_text,
        original_text: original_text.to_string(),
        confidence,
        guidelines_version: version.to_string(),
        provenance: Provenance::FreshlyAnalyzed,
        fallback: false,
        fallback_reason: None,
    }
}

fn validate_violation(raw: &RawViolation, original_text: &str) -> Option<Violation> {
    let original = raw.original.as_str();
    if original.trim().is_empty() {
        return None;
    }
    // The violation must point at literal text in the item.
    if !original_text.contains(original) {
        log::debug!("dropping violation: {original:?} not found in item text");
        return None;
    }
    // No-op corrections carry no information.
    if original.trim() == raw.suggested.trim() {
        return None;
    }
    Some(Violation {
        original: original.to_string(),
        suggested: raw.suggested.clone(),
        confidence: raw
            .confidence
            .unwrap_or(MIN_VIOLATION_CONFIDENCE)
            .clamp(MIN_VIOLATION_CONFIDENCE, MAX_VIOLATION_CONFIDENCE),
        rule_category: raw.rule_category.clone().unwrap_or_else(|| "general".to_string()),
        rule_description: raw.rule_description.clone().unwrap_or_default(),
    })
}

/// Apply violations longest-match-first so a short violation's replacement
/// cannot corrupt a longer overlapping one. A violation is applied only when
/// its original text is still present and its suggested text is not already
/// visible.
fn apply_violations(mut corrected: String, violations: &[Violation]) -> String {
    let mut ordered: Vec<&Violation> = violations.iter().collect();
    ordered.sort_by(|a, b| b.original.len().cmp(&a.original.len()));

    for violation in ordered {
        let already_applied =
            !violation.suggested.is_empty() && corrected.contains(&violation.suggested);
        if corrected.contains(&violation.original) && !already_applied {
            corrected = corrected.replace(&violation.original, &violation.suggested);
        }
    }
    corrected
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw_violation(original: &str, suggested: &str) -> RawViolation {
        RawViolation {
            original: original.to_string(),
            suggested: suggested.to_string(),
            confidence: Some(0.92),
            rule_category: Some("terminology".to_string()),
            rule_description: Some("test rule".to_string()),
        }
    }

    fn raw(violations: Vec<RawViolation>, corrected: Option<&str>) -> RawItemResult {
        RawItemResult {
            id: "a".to_string(),
            has_violations: !violations.is_empty(),
            violations,
            corrected_text: corrected.map(str::to_string),
            confidence: Some(0.9),
        }
    }

    #[test]
    fn applies_the_contact_correction_end_to_end() {
        let text = "Contact us at support@company.com";
        let raw = raw(
            vec![raw_violation("support@company.com", "help@company.com")],
            None,
        );
        let result = reconcile(&raw, "a", text, "v1", &FilterChain::empty());

        assert!(result.has_violations);
        assert_eq!(result.corrected_text, "Contact us at help@company.com");
        assert_eq!(result.violations[0].original, "support@company.com");
        assert!(result.is_consistent());
    }

    #[test]
    fn drops_violations_not_found_in_the_text() {
        let raw = raw(vec![raw_violation("missing text", "replacement")], None);
        let result = reconcile(&raw, "a", "Actual item text", "v1", &FilterChain::empty());

        assert!(!result.has_violations);
        assert_eq!(result.corrected_text, result.original_text);
        assert!(result.is_consistent());
    }

    #[test]
    fn drops_no_op_corrections() {
        let raw = raw(vec![raw_violation("same", " same ")], None);
        let result = reconcile(&raw, "a", "the same thing", "v1", &FilterChain::empty());
        assert!(!result.has_violations);
    }

    #[test]
    fn clamps_violation_confidence_into_bounds() {
        let mut low = raw_violation("old", "new");
        low.confidence = Some(0.2);
        let mut high = raw_violation("stale", "fresh");
        high.confidence = Some(1.7);

        let raw = raw(vec![low, high], None);
        let result = reconcile(&raw, "a", "old and stale text", "v1", &FilterChain::empty());

        for violation in &result.violations {
            assert!(violation.confidence >= MIN_VIOLATION_CONFIDENCE);
            assert!(violation.confidence <= MAX_VIOLATION_CONFIDENCE);
        }
    }

    #[test]
    fn longer_violations_apply_before_overlapping_shorter_ones() {
        let text = "Email support@company.com for support";
        let raw = raw(
            vec![
                raw_violation("support", "assistance"),
                raw_violation("support@company.com", "help@company.com"),
            ],
            None,
        );
        let result = reconcile(&raw, "a", text, "v1", &FilterChain::empty());

        assert_eq!(
            result.corrected_text,
            "Email help@company.com for assistance"
        );
    }

    #[test]
    fn reapplies_violations_the_service_corrected_text_omitted() {
        let text = "Call support now, support is waiting";
        // Service returned a corrected text that missed the violation.
        let raw = raw(
            vec![raw_violation("support", "the help desk")],
            Some("Call support now, support is waiting!"),
        );
        let result = reconcile(&raw, "a", text, "v1", &FilterChain::empty());

        assert!(result.corrected_text.contains("the help desk"));
        assert!(!result.corrected_text.contains("support"));
    }

    #[test]
    fn recomputes_has_violations_after_filtering() {
        let raw = raw(vec![raw_violation("3/5/24", "March 5, 2024")], Some("Due March 5, 2024"));
        let result = reconcile(
            &raw,
            "a",
            "Due 3/5/24",
            "v1",
            &FilterChain::default_policy(),
        );

        // The compact-date heuristic removed the only violation, so the
        // result must collapse back to compliant.
        assert!(!result.has_violations);
        assert_eq!(result.corrected_text, "Due 3/5/24");
        assert!(result.is_consistent());
    }

    #[test]
    fn missing_corrected_text_is_synthesized() {
        let raw = raw(vec![raw_violation("colour", "color")], None);
        let result = reconcile(&raw, "a", "Pick a colour", "v1", &FilterChain::empty());
        assert_eq!(result.corrected_text, "Pick a color");
    }
}
