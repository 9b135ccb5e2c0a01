// src/ingest/providers/json_api.rs
//! JSON endpoints adapted through a per-source field mapping.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::SourceFetchError;
use crate::ingest::fetch::HttpFetcher;
use crate::ingest::providers::rss::parse_feed_date;
use crate::ingest::types::{ParsedItem, SourceProvider};
use crate::strategy::JsonMapping;

/// Follow a dotted path (`data.items`); numeric segments index arrays.
fn lookup<'a>(v: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(v);
    }
    path.split('.').try_fold(v, |cur, seg| match cur {
        Value::Object(map) => map.get(seg),
        Value::Array(arr) => seg.parse::<usize>().ok().and_then(|i| arr.get(i)),
        _ => None,
    })
}

/// Strings as-is, numbers and bools stringified, everything else absent.
fn scalar_string(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Unix seconds, unix milliseconds, or an RFC 2822/3339 string.
fn parse_json_date(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // anything past year ~5000 in seconds is really milliseconds
            let secs = if raw > 100_000_000_000 { raw / 1000 } else { raw };
            DateTime::<Utc>::from_timestamp(secs, 0)
        }
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(n) => parse_json_date(&Value::from(n)),
            Err(_) => parse_feed_date(s),
        },
        _ => None,
    }
}

/// Map a JSON document to items using `mapping`.
pub fn parse_json_items(doc: &Value, mapping: &JsonMapping) -> Result<Vec<ParsedItem>, SourceFetchError> {
    let items = lookup(doc, &mapping.items)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SourceFetchError::Parse(format!("no array at `{}`", mapping.items))
        })?;

    let out = items
        .iter()
        .take(mapping.max_items)
        .map(|item| {
            let field = |name: &str| lookup(item, name).and_then(scalar_string);
            ParsedItem {
                external_id: mapping.id.as_deref().and_then(field),
                url: mapping.url.iter().find_map(|f| field(f.as_str())),
                title: field(mapping.title.as_str()),
                published_at: mapping
                    .published
                    .as_deref()
                    .and_then(|f| lookup(item, f))
                    .and_then(parse_json_date),
                content: mapping.content.as_deref().and_then(field),
            }
        })
        .collect();
    Ok(out)
}

pub struct JsonApiProvider {
    source_id: String,
    mapping: JsonMapping,
    mode: Mode,
}

enum Mode {
    Fixture(Value),
    Http { url: String, http: Arc<HttpFetcher> },
}

impl JsonApiProvider {
    pub fn from_fixture(source_id: impl Into<String>, doc: Value, mapping: JsonMapping) -> Self {
        Self {
            source_id: source_id.into(),
            mapping,
            mode: Mode::Fixture(doc),
        }
    }

    pub fn from_url(
        source_id: impl Into<String>,
        url: impl Into<String>,
        mapping: JsonMapping,
        http: Arc<HttpFetcher>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            mapping,
            mode: Mode::Http {
                url: url.into(),
                http,
            },
        }
    }
}

#[async_trait]
impl SourceProvider for JsonApiProvider {
    async fn fetch_latest(&self) -> Result<Vec<ParsedItem>, SourceFetchError> {
        match &self.mode {
            Mode::Fixture(doc) => parse_json_items(doc, &self.mapping),
            Mode::Http { url, http } => {
                let body = http.get_text(url).await?;
                let doc: Value = serde_json::from_str(&body)
                    .map_err(|e| SourceFetchError::Parse(e.to_string()))?;
                parse_json_items(&doc, &self.mapping)
            }
        }
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_mapping_reads_hot_lists() {
        let doc = json!({
            "data": [
                {"title": "Topic A", "url": "https://hot.test/a", "hot": 12345},
                {"title": "Topic B", "mobileUrl": "https://m.hot.test/b"},
                {"title": "No link"}
            ]
        });
        let items = parse_json_items(&doc, &JsonMapping::default()).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].content.as_deref(), Some("12345"));
        assert_eq!(items[1].url.as_deref(), Some("https://m.hot.test/b"));
        assert!(items[2].url.is_none());
    }

    #[test]
    fn custom_mapping_with_nested_path_and_dates() {
        let doc = json!({"result": {"list": [
            {"id": 7, "name": "Story", "link": "https://x.test/7", "ts": 1_718_000_000_000_i64, "body": "text"}
        ]}});
        let mapping = JsonMapping {
            items: "result.list".into(),
            title: "name".into(),
            url: vec!["link".into()],
            id: Some("id".into()),
            content: Some("body".into()),
            published: Some("ts".into()),
            max_items: 10,
        };
        let items = parse_json_items(&doc, &mapping).unwrap();
        assert_eq!(items[0].external_id.as_deref(), Some("7"));
        assert_eq!(
            items[0].published_at.map(|d| d.timestamp()),
            Some(1_718_000_000)
        );
    }

    #[test]
    fn respects_max_items() {
        let doc = json!({"data": (0..50).map(|i| json!({"title": format!("t{i}"), "url": format!("https://x.test/{i}")})).collect::<Vec<_>>()});
        let items = parse_json_items(&doc, &JsonMapping::default()).unwrap();
        assert_eq!(items.len(), 30);
    }

    #[test]
    fn missing_array_is_a_parse_error() {
        let doc = json!({"nope": []});
        assert!(parse_json_items(&doc, &JsonMapping::default()).is_err());
    }
}
