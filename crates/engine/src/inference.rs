use std::time::Duration;

use async_trait::async_trait;
use copylint_protocol::TextItem;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// One untrusted per-item verdict as returned by the inference service.
/// Every field beyond `id` is optional or defaulted; the reconciler decides
/// what survives.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawItemResult {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub has_violations: bool,
    #[serde(default)]
    pub violations: Vec<RawViolation>,
    #[serde(default)]
    pub corrected_text: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawViolation {
    #[serde(default)]
    pub original: String,
    #[serde(default)]
    pub suggested: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rule_category: Option<String>,
    #[serde(default)]
    pub rule_description: Option<String>,
}

/// The inference backend seam. One call analyzes one batch of items against
/// a synthesized instruction payload, within the caller's timeout.
#[async_trait]
pub trait Inference: Send + Sync {
    async fn analyze(
        &self,
        prompt: &str,
        items: &[TextItem],
        timeout: Duration,
    ) -> Result<Vec<RawItemResult>, InferenceError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InferenceRequestBody<'a> {
    instructions: &'a str,
    items: Vec<RequestItem<'a>>,
}

#[derive(Serialize)]
struct RequestItem<'a> {
    id: &'a str,
    text: &'a str,
}

/// Reference HTTP backend: POSTs `{instructions, items}` as JSON and expects
/// a JSON array of per-item results, possibly wrapped in prose or fences.
pub struct HttpInference {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpInference {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Inference for HttpInference {
    async fn analyze(
        &self,
        prompt: &str,
        items: &[TextItem],
        timeout: Duration,
    ) -> Result<Vec<RawItemResult>, InferenceError> {
        let body = InferenceRequestBody {
            instructions: prompt,
            items: items
                .iter()
                .map(|item| RequestItem {
                    id: &item.id,
                    text: &item.text,
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    InferenceError::Timeout(timeout)
                } else {
                    InferenceError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Status(status.as_u16()));
        }

        let raw = response
            .text()
            .await
            .map_err(|err| InferenceError::Transport(err.to_string()))?;
        parse_results(&raw)
    }
}

/// Parse the service's output into per-item results. Tolerates prose or
/// code fences around the array; on a malformed array, salvages whatever
/// individual objects still parse.
pub fn parse_results(raw: &str) -> Result<Vec<RawItemResult>, InferenceError> {
    if let Ok(results) = serde_json::from_str::<Vec<RawItemResult>>(raw) {
        return Ok(results);
    }

    let array = extract_json_array(raw)
        .ok_or_else(|| InferenceError::Malformed("no JSON array in output".to_string()))?;
    if let Ok(results) = serde_json::from_str::<Vec<RawItemResult>>(&array) {
        return Ok(results);
    }

    let salvaged = salvage_objects(&array);
    if salvaged.is_empty() {
        return Err(InferenceError::Malformed(
            "array did not contain parseable result objects".to_string(),
        ));
    }
    Ok(salvaged)
}

fn extract_json_array(raw: &str) -> Option<String> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(raw[start..=end].to_string())
}

/// Scan a malformed array for balanced top-level objects and keep the ones
/// that parse individually.
fn salvage_objects(array: &str) -> Vec<RawItemResult> {
    let inner = array
        .trim()
        .strip_prefix('[')
        .unwrap_or(array)
        .strip_suffix(']')
        .unwrap_or(array);

    let mut results = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in inner.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Ok(result) =
                            serde_json::from_str::<RawItemResult>(&inner[s..=i])
                        {
                            results.push(result);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a_clean_array() {
        let raw = r#"[{"id":"a","hasViolations":true,"violations":[{"original":"x","suggested":"y","confidence":0.9}],"correctedText":"y","confidence":0.9}]"#;
        let results = parse_results(raw).expect("parse");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert!(results[0].has_violations);
        assert_eq!(results[0].violations[0].suggested, "y");
    }

    #[test]
    fn strips_code_fences_and_prose() {
        let raw = "Here are the results:\n```json\n[{\"id\":\"a\",\"hasViolations\":false}]\n```\nDone.";
        let results = parse_results(raw).expect("parse");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn salvages_objects_from_a_malformed_array() {
        // Trailing garbage between objects breaks the array parse.
        let raw = r#"[{"id":"a","hasViolations":false}, oops, {"id":"b","hasViolations":false}]"#;
        let results = parse_results(raw).expect("salvage");
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn braces_inside_string_values_do_not_break_salvage() {
        let raw = r#"[{"id":"a","hasViolations":false,"correctedText":"use {placeholder} here"}, oops, {"id":"b","hasViolations":false}]"#;
        let results = parse_results(raw).expect("salvage");
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(
            results[0].corrected_text.as_deref(),
            Some("use {placeholder} here")
        );
    }

    #[test]
    fn output_without_an_array_is_malformed() {
        let err = parse_results("I could not analyze these items.").expect_err("malformed");
        assert!(matches!(err, InferenceError::Malformed(_)));
    }

    #[test]
    fn missing_fields_default_instead_of_failing() {
        let raw = r#"[{"id":"a"}]"#;
        let results = parse_results(raw).expect("parse");
        assert!(!results[0].has_violations);
        assert!(results[0].violations.is_empty());
        assert!(results[0].corrected_text.is_none());
    }
}
