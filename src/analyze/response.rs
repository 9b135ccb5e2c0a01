// src/analyze/response.rs
//! Parsing and validating completion text into an [`AnalysisResult`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

pub const MAX_TAGS: usize = 8;
pub const MAX_TAG_CHARS: usize = 32;

/// Sentinel a model answers with for ads and irrelevant content.
const REJECT_SENTINEL: &str = "PASS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// 0..=100
    pub score: u8,
    /// Kept verbatim (formula markup included); never HTML-escaped.
    pub summary: String,
    pub tags: Vec<String>,
}

/// What a well-formed answer says about the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(AnalysisResult),
    /// The model refused the entry outright.
    Rejected,
}

static RE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fence regex")
});
static RE_SCORE_MARK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\|\s*SCORE\s*\|([^\n|]*)").expect("score regex"));
static RE_TAGS_MARK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\|\s*TAGS\s*\|([^\n|]*)").expect("tags regex"));
static RE_ANY_MARK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\|\s*(?:TAGS|SCORE)\s*\|").expect("marker regex"));

/// Parse one completion.
///
/// Accepts a JSON object (bare, fenced, or embedded in prose) or the marker
/// layout `summary\n|TAGS|a, b\n|SCORE|85`. Anything else is a validation failure.
pub fn parse_response(raw: &str) -> Result<Verdict, ValidationError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }
    if text.contains(REJECT_SENTINEL) && text.chars().count() < 20 {
        return Ok(Verdict::Rejected);
    }

    if let Some(candidate) = json_candidate(text) {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => return from_json(&map).map(Verdict::Accepted),
            Ok(_) => return Err(ValidationError::WrongType("response")),
            Err(e) if !RE_SCORE_MARK.is_match(text) => {
                return Err(ValidationError::Unparsable(e.to_string()))
            }
            Err(_) => {}
        }
    }

    if RE_SCORE_MARK.is_match(text) {
        return from_markers(text).map(Verdict::Accepted);
    }

    Err(ValidationError::Unparsable(
        "neither a JSON object nor score markers".to_string(),
    ))
}

/// Fenced block first, then the outermost `{...}` span.
fn json_candidate(text: &str) -> Option<&str> {
    if let Some(inner) = RE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| s.starts_with('{'))
    {
        return Some(inner);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn from_json(map: &serde_json::Map<String, Value>) -> Result<AnalysisResult, ValidationError> {
    let score = match map.get("score") {
        None | Some(Value::Null) => return Err(ValidationError::MissingField("score")),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => i,
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => f as i64,
                _ => return Err(ValidationError::ScoreNotInteger(n.to_string())),
            },
        },
        Some(Value::String(s)) => parse_score_text(s)?,
        Some(_) => return Err(ValidationError::WrongType("score")),
    };

    let summary = match map.get("summary") {
        None | Some(Value::Null) => return Err(ValidationError::MissingField("summary")),
        Some(Value::String(s)) => clean_summary(s),
        Some(_) => return Err(ValidationError::WrongType("summary")),
    };
    if summary.is_empty() {
        return Err(ValidationError::MissingField("summary"));
    }

    let tags = match map.get("tags") {
        None | Some(Value::Null) => return Err(ValidationError::MissingField("tags")),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for it in items {
                match it {
                    Value::String(s) => out.push(s.clone()),
                    Value::Number(n) => out.push(n.to_string()),
                    _ => return Err(ValidationError::WrongType("tags")),
                }
            }
            out
        }
        Some(Value::String(s)) => split_tags(s),
        Some(_) => return Err(ValidationError::WrongType("tags")),
    };

    Ok(AnalysisResult {
        score: check_range(score)?,
        summary,
        tags: clean_tags(tags),
    })
}

fn from_markers(text: &str) -> Result<AnalysisResult, ValidationError> {
    let score_raw = RE_SCORE_MARK
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let score = check_range(parse_score_text(score_raw)?)?;

    let tags = RE_TAGS_MARK
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| split_tags(m.as_str()))
        .ok_or(ValidationError::MissingField("tags"))?;

    let head = RE_ANY_MARK.split(text).next().unwrap_or_default();
    let summary = clean_summary(head);
    if summary.is_empty() {
        return Err(ValidationError::MissingField("summary"));
    }

    Ok(AnalysisResult {
        score,
        summary,
        tags: clean_tags(tags),
    })
}

fn parse_score_text(s: &str) -> Result<i64, ValidationError> {
    let t = s.trim();
    if t.is_empty() {
        return Err(ValidationError::MissingField("score"));
    }
    t.parse::<i64>()
        .map_err(|_| ValidationError::ScoreNotInteger(t.to_string()))
}

fn check_range(score: i64) -> Result<u8, ValidationError> {
    if (0..=100).contains(&score) {
        Ok(score as u8)
    } else {
        Err(ValidationError::ScoreOutOfRange(score))
    }
}

/// Trim and strip wrapping quotes. Content is otherwise kept as-is.
fn clean_summary(s: &str) -> String {
    s.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

fn split_tags(s: &str) -> Vec<String> {
    s.split([',', '，', '、', ';'])
        .map(str::to_string)
        .collect()
}

/// Trim, drop empties and `#`, dedupe (case-insensitive, first wins), cap count and length.
fn clean_tags(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for t in raw {
        let t = t.trim().trim_start_matches('#').trim();
        if t.is_empty() {
            continue;
        }
        let t: String = t.chars().take(MAX_TAG_CHARS).collect();
        if out.iter().any(|o| o.to_lowercase() == t.to_lowercase()) {
            continue;
        }
        out.push(t);
        if out.len() == MAX_TAGS {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(raw: &str) -> AnalysisResult {
        match parse_response(raw) {
            Ok(Verdict::Accepted(r)) => r,
            other => panic!("expected accepted, got {other:?}"),
        }
    }

    #[test]
    fn plain_json() {
        let r = accepted(r#"{"score": 85, "summary": "Kernel 6.10 lands", "tags": ["Linux", "Kernel"]}"#);
        assert_eq!(r.score, 85);
        assert_eq!(r.tags, vec!["Linux", "Kernel"]);
    }

    #[test]
    fn fenced_json_inside_prose() {
        let raw = "Sure! Here you go:\n```json\n{\"score\": \"70\", \"summary\": \"ok\", \"tags\": \"a, b，c\"}\n```\nThanks";
        let r = accepted(raw);
        assert_eq!(r.score, 70);
        assert_eq!(r.tags, vec!["a", "b", "c"]);
    }

    #[test]
    fn marker_layout() {
        let raw = "\"Linux 6.10 adds $O(n)$ scheduler fixes\"\n|TAGS| Linux, Kernel, linux\n|SCORE| 85";
        let r = accepted(raw);
        assert_eq!(r.score, 85);
        assert_eq!(r.summary, "Linux 6.10 adds $O(n)$ scheduler fixes");
        assert_eq!(r.tags, vec!["Linux", "Kernel"]);
    }

    #[test]
    fn summary_is_not_escaped() {
        let r = accepted(r#"{"score": 1, "summary": "a < b && $x$", "tags": []}"#);
        assert_eq!(r.summary, "a < b && $x$");
    }

    #[test]
    fn pass_is_a_rejection() {
        assert_eq!(parse_response("PASS").unwrap(), Verdict::Rejected);
        assert_eq!(parse_response(" \"PASS\". ").unwrap(), Verdict::Rejected);
    }

    #[test]
    fn out_of_range_score() {
        assert_eq!(
            parse_response(r#"{"score": 150, "summary": "x", "tags": []}"#),
            Err(ValidationError::ScoreOutOfRange(150))
        );
        assert_eq!(
            parse_response("sum\n|TAGS|a\n|SCORE|-3"),
            Err(ValidationError::ScoreOutOfRange(-3))
        );
    }

    #[test]
    fn non_integer_scores() {
        assert!(matches!(
            parse_response(r#"{"score": 72.5, "summary": "x", "tags": []}"#),
            Err(ValidationError::ScoreNotInteger(_))
        ));
        assert!(matches!(
            parse_response(r#"{"score": "high", "summary": "x", "tags": []}"#),
            Err(ValidationError::ScoreNotInteger(_))
        ));
        // 80.0 is an integer in disguise
        assert_eq!(accepted(r#"{"score": 80.0, "summary": "x", "tags": []}"#).score, 80);
    }

    #[test]
    fn missing_fields() {
        assert_eq!(
            parse_response(r#"{"summary": "x", "tags": []}"#),
            Err(ValidationError::MissingField("score"))
        );
        assert_eq!(
            parse_response(r#"{"score": 5, "tags": []}"#),
            Err(ValidationError::MissingField("summary"))
        );
        assert_eq!(
            parse_response(r#"{"score": 5, "summary": "x"}"#),
            Err(ValidationError::MissingField("tags"))
        );
        assert_eq!(
            parse_response("summary only\n|SCORE|50"),
            Err(ValidationError::MissingField("tags"))
        );
    }

    #[test]
    fn garbage_and_empty() {
        assert_eq!(parse_response("   "), Err(ValidationError::Empty));
        assert!(matches!(
            parse_response("I think this article is quite interesting overall."),
            Err(ValidationError::Unparsable(_))
        ));
        assert!(matches!(
            parse_response("{not json at all}"),
            Err(ValidationError::Unparsable(_))
        ));
    }

    #[test]
    fn tags_are_capped() {
        let tags: Vec<String> = (0..20).map(|i| format!("\"tag{i}\"")).collect();
        let raw = format!(
            r#"{{"score": 5, "summary": "x", "tags": [{}, "{}"]}}"#,
            tags.join(","),
            "y".repeat(50)
        );
        let r = accepted(&raw);
        assert_eq!(r.tags.len(), MAX_TAGS);
        assert!(r.tags.iter().all(|t| t.chars().count() <= MAX_TAG_CHARS));
    }
}
