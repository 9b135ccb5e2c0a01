// src/ingest/providers/rss.rs
//! RSS 2.0 / RSS 1.0 (RDF) / Atom documents.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::error::SourceFetchError;
use crate::ingest::fetch::HttpFetcher;
use crate::ingest::types::{ParsedItem, SourceProvider};

#[derive(Debug, Default, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

fn text(t: Option<Text>) -> Option<String> {
    t.map(|t| t.value.trim().to_string()).filter(|s| !s.is_empty())
}

// ---- RSS 2.0 ----

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<Text>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<Text>,
    #[serde(alias = "dc:date")]
    date: Option<Text>,
    description: Option<Text>,
    #[serde(rename = "encoded", alias = "content:encoded")]
    content_encoded: Option<Text>,
}

// ---- RSS 1.0 (items are siblings of the channel) ----

#[derive(Debug, Deserialize)]
struct Rdf {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

// ---- Atom ----

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<Text>,
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<Text>,
    updated: Option<Text>,
    summary: Option<Text>,
    content: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedFormat {
    Rss,
    Rdf,
    Atom,
}

/// Look at the first root-ish tag to pick a schema.
fn detect_format(s: &str) -> Option<FeedFormat> {
    [
        ("<rss", FeedFormat::Rss),
        ("<rdf:RDF", FeedFormat::Rdf),
        ("<feed", FeedFormat::Atom),
    ]
    .into_iter()
    .filter_map(|(tag, f)| s.find(tag).map(|pos| (pos, f)))
    .min_by_key(|(pos, _)| *pos)
    .map(|(_, f)| f)
}

/// Feed dates: RFC 2822 (RSS) or RFC 3339 (Atom, dc:date).
pub fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let unix = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .map(|dt| dt.unix_timestamp())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .ok()
                .map(|dt| dt.timestamp())
        })?;
    DateTime::<Utc>::from_timestamp(unix, 0)
}

/// Parse a feed document into items in document order.
pub fn parse_feed(s: &str) -> Result<Vec<ParsedItem>, SourceFetchError> {
    let xml = scrub_html_entities_for_xml(s);
    let parse_err = |e: quick_xml::DeError| SourceFetchError::Parse(e.to_string());

    match detect_format(&xml) {
        Some(FeedFormat::Rss) => {
            let rss: Rss = from_str(&xml).map_err(parse_err)?;
            Ok(rss.channel.item.into_iter().map(rss_item).collect())
        }
        Some(FeedFormat::Rdf) => {
            let rdf: Rdf = from_str(&xml).map_err(parse_err)?;
            Ok(rdf.item.into_iter().map(rss_item).collect())
        }
        Some(FeedFormat::Atom) => {
            let feed: AtomFeed = from_str(&xml).map_err(parse_err)?;
            Ok(feed.entries.into_iter().map(atom_entry).collect())
        }
        None => Err(SourceFetchError::Parse(
            "document is neither RSS nor Atom".to_string(),
        )),
    }
}

fn rss_item(it: Item) -> ParsedItem {
    let url = it
        .links
        .into_iter()
        .map(|l| l.value.trim().to_string())
        .find(|l| !l.is_empty());
    let published_at = text(it.pub_date)
        .or_else(|| text(it.date))
        .as_deref()
        .and_then(parse_feed_date);
    ParsedItem {
        external_id: text(it.guid),
        url,
        title: text(it.title),
        published_at,
        content: text(it.content_encoded).or_else(|| text(it.description)),
    }
}

fn atom_entry(e: AtomEntry) -> ParsedItem {
    // rel="alternate" (or no rel) is the article; skip self/edit/enclosure links.
    let url = e
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")) && !l.href.trim().is_empty())
        .or_else(|| e.links.iter().find(|l| !l.href.trim().is_empty()))
        .map(|l| l.href.trim().to_string());
    let published_at = text(e.published)
        .or_else(|| text(e.updated))
        .as_deref()
        .and_then(parse_feed_date);
    ParsedItem {
        external_id: text(e.id),
        url,
        title: text(e.title),
        published_at,
        content: text(e.content).or_else(|| text(e.summary)),
    }
}

pub struct FeedProvider {
    source_id: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, http: Arc<HttpFetcher> },
}

impl FeedProvider {
    pub fn from_fixture(source_id: impl Into<String>, s: &str) -> Self {
        Self {
            source_id: source_id.into(),
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_url(source_id: impl Into<String>, url: impl Into<String>, http: Arc<HttpFetcher>) -> Self {
        Self {
            source_id: source_id.into(),
            mode: Mode::Http {
                url: url.into(),
                http,
            },
        }
    }

    fn parse_timed(s: &str) -> Result<Vec<ParsedItem>, SourceFetchError> {
        let t0 = std::time::Instant::now();
        let out = parse_feed(s);
        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        out
    }
}

#[async_trait]
impl SourceProvider for FeedProvider {
    async fn fetch_latest(&self) -> Result<Vec<ParsedItem>, SourceFetchError> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_timed(s),
            Mode::Http { url, http } => {
                let body = http.get_text(url).await?;
                Self::parse_timed(&body)
            }
        }
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

/// HTML entities are not defined in XML; feeds still ship them.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Example</title>
    <link>https://example.test/</link>
    <item>
      <title>First&nbsp;story</title>
      <link>https://example.test/a?utm_source=rss</link>
      <guid isPermaLink="false">guid-a</guid>
      <pubDate>Tue, 10 Jun 2025 04:00:00 GMT</pubDate>
      <description><![CDATA[<p>Body of <b>A</b></p>]]></description>
    </item>
    <item>
      <title>Second story</title>
      <link>https://example.test/b</link>
      <description>Plain body</description>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom example</title>
  <entry>
    <id>urn:uuid:1</id>
    <title type="html">Atom entry</title>
    <link rel="self" href="https://example.test/self"/>
    <link rel="alternate" href="https://example.test/post"/>
    <updated>2025-06-10T04:00:00Z</updated>
    <summary>Summary with $x^2$ inline</summary>
  </entry>
</feed>"#;

    #[test]
    fn rss_items_keep_document_order() {
        let items = parse_feed(RSS).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("First story"));
        assert_eq!(items[0].external_id.as_deref(), Some("guid-a"));
        assert!(items[0].published_at.is_some());
        assert!(items[0].content.as_deref().unwrap().contains("<b>A</b>"));
        assert_eq!(items[1].url.as_deref(), Some("https://example.test/b"));
        assert!(items[1].external_id.is_none());
    }

    #[test]
    fn atom_prefers_alternate_link() {
        let items = parse_feed(ATOM).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url.as_deref(), Some("https://example.test/post"));
        assert_eq!(items[0].external_id.as_deref(), Some("urn:uuid:1"));
        assert_eq!(
            items[0].published_at.map(|d| d.to_rfc3339()),
            Some("2025-06-10T04:00:00+00:00".to_string())
        );
        assert_eq!(items[0].content.as_deref(), Some("Summary with $x^2$ inline"));
    }

    #[test]
    fn non_feed_document_is_a_parse_error() {
        let err = parse_feed("<html><body>nope</body></html>").unwrap_err();
        assert!(matches!(err, SourceFetchError::Parse(_)));
    }

    #[test]
    fn dates_in_both_formats() {
        assert!(parse_feed_date("Tue, 10 Jun 2025 04:00:00 +0000").is_some());
        assert!(parse_feed_date("2025-06-10T04:00:00+02:00").is_some());
        assert!(parse_feed_date("yesterday").is_none());
    }
}
