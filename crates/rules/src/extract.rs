use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::guideline::GuidelineRecord;

/// Depth cap for the rules-payload traversal. Authored payloads are
/// unconstrained, so the walk is an explicit worklist with hard limits
/// instead of call recursion.
pub const MAX_TRAVERSAL_DEPTH: usize = 16;
pub const MAX_NODES_PER_GUIDELINE: usize = 2048;

const DEFAULT_SEVERITY: &str = "standard";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("rules payload nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("rules payload exceeds {0} nodes")]
    TooLarge(usize),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    TextRule,
    ContextualRule,
    CategoryRule,
    FallbackRule,
}

impl RuleKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TextRule => "text_rule",
            Self::ContextualRule => "contextual_rule",
            Self::CategoryRule => "category_rule",
            Self::FallbackRule => "fallback_rule",
        }
    }
}

/// Conditional enforcement fields carried verbatim from the authored
/// payload. The prompt synthesizer renders these as conditional
/// instructions, so they are never flattened into plain text here.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ideal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_triggers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub space_constrained: bool,
}

impl EnforcementContext {
    fn is_empty(&self) -> bool {
        self.ideal.is_none()
            && self.abbreviation.is_none()
            && self.required_triggers.is_empty()
            && self.exclude_patterns.is_empty()
            && !self.space_constrained
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub category: String,
    /// Dotted location of the source leaf within the guideline payload.
    pub path: String,
    pub key: String,
    pub description: String,
    pub kind: RuleKind,
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EnforcementContext>,
}

/// Flatten all active guidelines into a uniform rule list. A failure while
/// walking one guideline degrades to a single fallback rule for that
/// guideline and never aborts extraction of the others.
#[must_use]
pub fn extract_rules(guidelines: &[GuidelineRecord]) -> Vec<Rule> {
    let mut rules = Vec::new();
    for record in guidelines.iter().filter(|g| g.active) {
        match extract_one(record) {
            Ok(mut detailed) => {
                rules.push(category_rule(record, detailed.len()));
                rules.append(&mut detailed);
            }
            Err(err) => {
                log::warn!("guideline '{}': rule extraction failed: {err}", record.id);
                rules.push(fallback_rule(record, &err));
            }
        }
    }
    rules
}

struct WorkItem<'a> {
    value: &'a Value,
    path: String,
    key: String,
    depth: usize,
}

fn extract_one(record: &GuidelineRecord) -> Result<Vec<Rule>, ExtractError> {
    let mut rules = Vec::new();
    let mut visited = 0usize;
    let mut stack = vec![WorkItem {
        value: &record.rules,
        path: "rules".to_string(),
        key: "rules".to_string(),
        depth: 0,
    }];

    while let Some(item) = stack.pop() {
        if item.depth > MAX_TRAVERSAL_DEPTH {
            return Err(ExtractError::TooDeep(MAX_TRAVERSAL_DEPTH));
        }
        visited += 1;
        if visited > MAX_NODES_PER_GUIDELINE {
            return Err(ExtractError::TooLarge(MAX_NODES_PER_GUIDELINE));
        }

        match item.value {
            Value::String(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    rules.push(Rule {
                        id: format!("{}:{}", record.id, item.path),
                        category: record.category.clone(),
                        path: item.path,
                        key: item.key,
                        description: text.to_string(),
                        kind: RuleKind::TextRule,
                        severity: DEFAULT_SEVERITY.to_string(),
                        context: None,
                    });
                }
            }
            Value::Object(map) => {
                let context = enforcement_context(item.value);
                if let Some(context) = context {
                    rules.push(Rule {
                        id: format!("{}:{}", record.id, item.path),
                        category: record.category.clone(),
                        description: contextual_description(map, &context),
                        kind: RuleKind::ContextualRule,
                        severity: map
                            .get("severity")
                            .and_then(Value::as_str)
                            .unwrap_or(DEFAULT_SEVERITY)
                            .to_string(),
                        context: Some(context),
                        path: item.path,
                        key: item.key,
                    });
                    continue;
                }
                // serde_json maps iterate in sorted key order; reverse-push
                // so the LIFO stack walks them in that order.
                for (key, child) in map.iter().rev() {
                    stack.push(WorkItem {
                        value: child,
                        path: format!("{}.{key}", item.path),
                        key: key.clone(),
                        depth: item.depth + 1,
                    });
                }
            }
            Value::Array(entries) => {
                for (index, child) in entries.iter().enumerate().rev() {
                    stack.push(WorkItem {
                        value: child,
                        path: format!("{}[{index}]", item.path),
                        key: item.key.clone(),
                        depth: item.depth + 1,
                    });
                }
            }
            // Bare numbers, bools, and nulls are not rules.
            _ => {}
        }
    }

    Ok(rules)
}

/// An object is a contextual rule when it carries any of the recognized
/// conditional-enforcement markers.
fn enforcement_context(value: &Value) -> Option<EnforcementContext> {
    let map = value.as_object()?;
    let context = EnforcementContext {
        ideal: map.get("ideal").and_then(Value::as_str).map(str::to_string),
        abbreviation: map
            .get("abbreviation")
            .and_then(Value::as_str)
            .map(str::to_string),
        required_triggers: string_list(map.get("requiredTriggers")),
        exclude_patterns: string_list(map.get("excludePatterns")),
        space_constrained: map
            .get("spaceConstrained")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    };
    if context.is_empty() {
        None
    } else {
        Some(context)
    }
}

/// Accepts either a single string or an array of strings; authored payloads
/// use both forms.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn contextual_description(
    map: &serde_json::Map<String, Value>,
    context: &EnforcementContext,
) -> String {
    if let Some(description) = map.get("description").and_then(Value::as_str) {
        return description.to_string();
    }
    match (&context.ideal, &context.abbreviation) {
        (Some(ideal), Some(abbr)) => {
            format!("Prefer '{ideal}'; abbreviate as '{abbr}' when space is constrained")
        }
        (Some(ideal), None) => format!("Prefer '{ideal}'"),
        (None, Some(abbr)) => format!("Use the abbreviation '{abbr}'"),
        (None, None) => "Apply conditional enforcement rule".to_string(),
    }
}

fn category_rule(record: &GuidelineRecord, detailed_count: usize) -> Rule {
    Rule {
        id: format!("{}:category", record.id),
        category: record.category.clone(),
        path: "category".to_string(),
        key: record.category.clone(),
        description: format!(
            "{} ({detailed_count} detailed rules under guideline '{}')",
            record.title, record.id
        ),
        kind: RuleKind::CategoryRule,
        severity: DEFAULT_SEVERITY.to_string(),
        context: None,
    }
}

fn fallback_rule(record: &GuidelineRecord, err: &ExtractError) -> Rule {
    Rule {
        id: format!("{}:fallback", record.id),
        category: record.category.clone(),
        path: "rules".to_string(),
        key: record.category.clone(),
        description: format!(
            "Apply the general intent of guideline '{}' ({}); detailed rules unavailable: {err}",
            record.title, record.category
        ),
        kind: RuleKind::FallbackRule,
        severity: DEFAULT_SEVERITY.to_string(),
        context: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(id: &str, rules: Value) -> GuidelineRecord {
        GuidelineRecord {
            id: id.to_string(),
            category: "terminology".to_string(),
            title: "Terminology".to_string(),
            rules,
            examples: None,
            active: true,
            version: "1".to_string(),
            updated_ms: 0,
        }
    }

    #[test]
    fn string_leaves_become_text_rules_with_dotted_paths() {
        let rules = extract_rules(&[record(
            "g1",
            serde_json::json!({
                "tone": {
                    "greeting": "Always greet the customer by name",
                    "closing": "End with a clear next step"
                },
                "banned": ["Never use jargon", "Never use slang"]
            }),
        )]);

        let text_rules: Vec<&Rule> = rules
            .iter()
            .filter(|r| r.kind == RuleKind::TextRule)
            .collect();
        assert_eq!(text_rules.len(), 4);

        let paths: Vec<&str> = text_rules.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "rules.banned[0]",
                "rules.banned[1]",
                "rules.tone.closing",
                "rules.tone.greeting"
            ]
        );
        assert_eq!(text_rules[0].description, "Never use jargon");
    }

    #[test]
    fn one_category_rule_per_guideline_with_back_reference() {
        let rules = extract_rules(&[record("g1", serde_json::json!({"a": "Rule A"}))]);
        let category: Vec<&Rule> = rules
            .iter()
            .filter(|r| r.kind == RuleKind::CategoryRule)
            .collect();
        assert_eq!(category.len(), 1);
        assert!(category[0].description.contains("1 detailed rules"));
        assert!(category[0].description.contains("'g1'"));
    }

    #[test]
    fn contextual_marker_objects_keep_conditional_fields_verbatim() {
        let rules = extract_rules(&[record(
            "g1",
            serde_json::json!({
                "brand": {
                    "ideal": "Acme Corporation",
                    "abbreviation": "Acme",
                    "requiredTriggers": ["first mention"],
                    "excludePatterns": ["Acme Labs"],
                    "spaceConstrained": true,
                    "severity": "high"
                }
            }),
        )]);

        let contextual = rules
            .iter()
            .find(|r| r.kind == RuleKind::ContextualRule)
            .expect("contextual rule");
        assert_eq!(contextual.severity, "high");
        let context = contextual.context.as_ref().expect("context");
        assert_eq!(context.ideal.as_deref(), Some("Acme Corporation"));
        assert_eq!(context.abbreviation.as_deref(), Some("Acme"));
        assert_eq!(context.required_triggers, vec!["first mention"]);
        assert_eq!(context.exclude_patterns, vec!["Acme Labs"]);
        assert!(context.space_constrained);
    }

    #[test]
    fn single_string_trigger_is_accepted() {
        let rules = extract_rules(&[record(
            "g1",
            serde_json::json!({"term": {"ideal": "customer", "requiredTriggers": "support"}}),
        )]);
        let contextual = rules
            .iter()
            .find(|r| r.kind == RuleKind::ContextualRule)
            .expect("contextual rule");
        let context = contextual.context.as_ref().expect("context");
        assert_eq!(context.required_triggers, vec!["support"]);
    }

    #[test]
    fn too_deep_payload_degrades_to_fallback_rule_only_for_that_guideline() {
        let mut deep = serde_json::json!("leaf");
        for _ in 0..(MAX_TRAVERSAL_DEPTH + 2) {
            deep = serde_json::json!({ "nested": deep });
        }
        let rules = extract_rules(&[
            record("broken", deep),
            record("fine", serde_json::json!({"a": "Rule A"})),
        ]);

        let fallback: Vec<&Rule> = rules
            .iter()
            .filter(|r| r.kind == RuleKind::FallbackRule)
            .collect();
        assert_eq!(fallback.len(), 1);
        assert!(fallback[0].id.starts_with("broken"));

        // The healthy guideline still extracted normally.
        assert!(rules
            .iter()
            .any(|r| r.kind == RuleKind::TextRule && r.id.starts_with("fine")));
    }

    #[test]
    fn inactive_guidelines_are_skipped() {
        let mut inactive = record("g1", serde_json::json!({"a": "Rule A"}));
        inactive.active = false;
        assert!(extract_rules(&[inactive]).is_empty());
    }

    #[test]
    fn extraction_is_deterministic() {
        let guidelines = vec![record(
            "g1",
            serde_json::json!({"b": "B", "a": "A", "c": ["one", "two"]}),
        )];
        let first: Vec<String> = extract_rules(&guidelines)
            .into_iter()
            .map(|r| r.id)
            .collect();
        let second: Vec<String> = extract_rules(&guidelines)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(first, second);
    }
}
