use std::collections::BTreeMap;

use copylint_rules::{EnforcementContext, GuidelineRecord, Rule, RuleKind};
use serde_json::Value;

/// Synthesize the instruction payload for one inference call: rules grouped
/// by category, contextual rules rendered as conditional instructions, a
/// bounded number of examples per guideline, the guideline version digest,
/// and the exact output contract the reconciler validates against.
#[must_use]
pub fn build_prompt(
    guidelines: &[GuidelineRecord],
    rules: &[Rule],
    version: &str,
    max_examples_per_guideline: usize,
) -> String {
    let mut out = String::with_capacity(4096);

    out.push_str(
        "You are a style and terminology reviewer. Check each input item against \
the rules below and correct every violation you find.\n\n",
    );
    out.push_str("Guidelines version: ");
    out.push_str(version);
    out.push_str("\n\n");

    let mut by_category: BTreeMap<&str, Vec<&Rule>> = BTreeMap::new();
    for rule in rules {
        by_category.entry(rule.category.as_str()).or_default().push(rule);
    }

    out.push_str("RULES:\n");
    for (category, rules) in &by_category {
        out.push_str("\n## ");
        out.push_str(category);
        out.push('\n');
        for rule in rules {
            match rule.kind {
                RuleKind::ContextualRule => {
                    if let Some(context) = &rule.context {
                        render_contextual(&mut out, rule, context);
                    } else {
                        render_plain(&mut out, rule);
                    }
                }
                RuleKind::CategoryRule
                | RuleKind::TextRule
                | RuleKind::FallbackRule => render_plain(&mut out, rule),
            }
        }
    }

    if max_examples_per_guideline > 0 {
        render_examples(&mut out, guidelines, max_examples_per_guideline);
    }

    out.push_str("\nOUTPUT CONTRACT:\n");
    out.push_str(
        "Output ONLY a JSON array with exactly one object per input item, in input order. \
Each object: {\"id\":\"<item id>\",\"hasViolations\":<bool>,\
\"violations\":[{\"original\":\"<exact substring of the item text>\",\
\"suggested\":\"<replacement>\",\"confidence\":<number 0..1>,\
\"ruleCategory\":\"<category>\",\"ruleDescription\":\"<rule applied>\"}],\
\"correctedText\":\"<full corrected text>\",\"confidence\":<number 0..1>}.\n",
    );
    out.push_str(
        "\"original\" must be copied verbatim from the item text. If an item has no \
violations, set \"hasViolations\" to false, \"violations\" to an empty array, and \
\"correctedText\" to the unmodified item text. \
Output ONLY the JSON array, nothing else.\n",
    );

    out
}

fn render_plain(out: &mut String, rule: &Rule) {
    out.push_str("- ");
    out.push_str(&rule.description);
    out.push('\n');
}

fn render_contextual(out: &mut String, rule: &Rule, context: &EnforcementContext) {
    out.push_str("- ");
    out.push_str(&rule.description);
    out.push('.');

    if let Some(ideal) = &context.ideal {
        out.push_str(" Prefer \"");
        out.push_str(ideal);
        out.push_str("\" when space allows.");
    }
    if let Some(abbreviation) = &context.abbreviation {
        out.push_str(" Abbreviate to \"");
        out.push_str(abbreviation);
        out.push_str("\" only when space is constrained.");
    } else if context.space_constrained {
        out.push_str(" This rule applies to space-constrained surfaces only.");
    }
    if !context.required_triggers.is_empty() {
        out.push_str(" Apply this rule only when the text contains one of: ");
        push_quoted_list(out, &context.required_triggers);
        out.push('.');
    }
    if !context.exclude_patterns.is_empty() {
        out.push_str(" Never flag text matching: ");
        push_quoted_list(out, &context.exclude_patterns);
        out.push('.');
    }
    out.push('\n');
}

fn push_quoted_list(out: &mut String, entries: &[String]) {
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('"');
        out.push_str(entry);
        out.push('"');
    }
}

fn render_examples(out: &mut String, guidelines: &[GuidelineRecord], max_per_guideline: usize) {
    let mut wrote_header = false;
    for guideline in guidelines {
        let Some(examples) = &guideline.examples else {
            continue;
        };
        let positive = example_list(examples.get("positive"), max_per_guideline);
        let negative = example_list(examples.get("negative"), max_per_guideline);
        if positive.is_empty() && negative.is_empty() {
            continue;
        }
        if !wrote_header {
            out.push_str("\nEXAMPLES:\n");
            wrote_header = true;
        }
        out.push_str("\n## ");
        out.push_str(&guideline.title);
        out.push('\n');
        for example in positive {
            out.push_str("GOOD: ");
            out.push_str(example);
            out.push('\n');
        }
        for example in negative {
            out.push_str("BAD: ");
            out.push_str(example);
            out.push('\n');
        }
    }
}

fn example_list(value: Option<&Value>, max: usize) -> Vec<&str> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(Value::as_str)
        .take(max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use copylint_rules::extract_rules;

    fn guideline(id: &str, category: &str, rules: Value) -> GuidelineRecord {
        GuidelineRecord {
            id: id.to_string(),
            category: category.to_string(),
            title: format!("{category} guidelines"),
            rules,
            examples: None,
            active: true,
            version: "1".to_string(),
            updated_ms: 0,
        }
    }

    #[test]
    fn groups_rules_by_category_and_embeds_the_version() {
        let guidelines = vec![
            guideline("g1", "terminology", serde_json::json!({"a": "Use help, not support"})),
            guideline("g2", "tone", serde_json::json!({"b": "Stay friendly"})),
        ];
        let rules = extract_rules(&guidelines);
        let prompt = build_prompt(&guidelines, &rules, "abc123", 3);

        assert!(prompt.contains("Guidelines version: abc123"));
        assert!(prompt.contains("## terminology"));
        assert!(prompt.contains("## tone"));
        let terminology = prompt.find("## terminology").expect("terminology section");
        let tone = prompt.find("## tone").expect("tone section");
        assert!(terminology < tone, "categories render in sorted order");
    }

    #[test]
    fn contextual_rules_render_as_conditional_instructions() {
        let guidelines = vec![guideline(
            "g1",
            "branding",
            serde_json::json!({
                "brand": {
                    "ideal": "Acme Corporation",
                    "abbreviation": "Acme",
                    "requiredTriggers": ["first mention"],
                    "excludePatterns": ["Acme Labs"]
                }
            }),
        )];
        let rules = extract_rules(&guidelines);
        let prompt = build_prompt(&guidelines, &rules, "v", 0);

        assert!(prompt.contains("Prefer \"Acme Corporation\" when space allows."));
        assert!(prompt.contains("Abbreviate to \"Acme\" only when space is constrained."));
        assert!(prompt.contains("only when the text contains one of: \"first mention\""));
        assert!(prompt.contains("Never flag text matching: \"Acme Labs\""));
    }

    #[test]
    fn examples_are_bounded_per_guideline() {
        let mut record = guideline("g1", "tone", serde_json::json!({"a": "Rule"}));
        record.examples = Some(serde_json::json!({
            "positive": ["p1", "p2", "p3", "p4"],
            "negative": ["n1", "n2", "n3", "n4"]
        }));
        let rules = extract_rules(std::slice::from_ref(&record));
        let prompt = build_prompt(std::slice::from_ref(&record), &rules, "v", 2);

        assert!(prompt.contains("GOOD: p1"));
        assert!(prompt.contains("GOOD: p2"));
        assert!(!prompt.contains("p3"));
        assert!(prompt.contains("BAD: n1"));
        assert!(!prompt.contains("n3"));
    }

    #[test]
    fn output_contract_names_every_required_field() {
        let guidelines = vec![guideline("g1", "tone", serde_json::json!({"a": "Rule"}))];
        let rules = extract_rules(&guidelines);
        let prompt = build_prompt(&guidelines, &rules, "v", 3);

        for field in ["\"id\"", "\"hasViolations\"", "\"violations\"", "\"correctedText\"", "\"confidence\""] {
            assert!(prompt.contains(field), "contract missing {field}");
        }
        assert!(prompt.contains("Output ONLY the JSON array"));
    }
}
