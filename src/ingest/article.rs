// src/ingest/article.rs
//! Full-text extraction: fetch an entry's linked page and reduce it to article text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;

use super::fetch::HttpFetcher;
use super::normalize_text;
use crate::error::SourceFetchError;

/// Pages yielding less text than this are treated as failed extractions.
pub const MIN_ARTICLE_CHARS: usize = 50;

/// Elements that never carry article text.
const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "form", "nav", "header",
    "footer", "aside",
];

/// Turns a link into the article text behind it.
#[async_trait]
pub trait ArticleFetcher: Send + Sync {
    async fn full_text(&self, url: &str) -> Result<String, SourceFetchError>;
}

/// Fetches pages with the shared feed client.
pub struct HttpArticleFetcher {
    http: Arc<HttpFetcher>,
}

impl HttpArticleFetcher {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ArticleFetcher for HttpArticleFetcher {
    async fn full_text(&self, url: &str) -> Result<String, SourceFetchError> {
        let html = self.http.get_text(url).await?;
        extract_article_text(&html)
            .ok_or_else(|| SourceFetchError::Parse("no article text on page".into()))
    }
}

/// Main text of an HTML page: boilerplate elements removed, the `<article>`
/// (else `<main>`, else `<body>`) region kept, then normalized.
/// `None` when fewer than [`MIN_ARTICLE_CHARS`] characters remain.
pub fn extract_article_text(html: &str) -> Option<String> {
    static RE_DROP: OnceCell<Vec<Regex>> = OnceCell::new();
    let blocks = RE_DROP.get_or_init(|| {
        BOILERPLATE_TAGS
            .iter()
            .map(|t| Regex::new(&format!(r"(?is)<{t}\b[^>]*>.*?</{t}\s*>")).expect("block regex"))
            .collect()
    });
    static RE_REGIONS: OnceCell<Vec<Regex>> = OnceCell::new();
    let regions = RE_REGIONS.get_or_init(|| {
        ["article", "main", "body"]
            .iter()
            .map(|t| Regex::new(&format!(r"(?is)<{t}\b[^>]*>(.*)</{t}\s*>")).expect("region regex"))
            .collect()
    });

    let mut page = html.to_string();
    for re in blocks {
        page = re.replace_all(&page, " ").into_owned();
    }
    let region = regions
        .iter()
        .find_map(|re| re.captures(&page).and_then(|c| c.get(1)).map(|m| m.as_str()))
        .unwrap_or(page.as_str());

    let text = normalize_text(region);
    (text.chars().count() >= MIN_ARTICLE_CHARS).then_some(text)
}

/// Fetch the full text for each `(slot, url)` with at most `concurrency` pages
/// in flight, each bounded by `timeout`. Results come back in completion order.
pub async fn fetch_full_texts(
    fetcher: &dyn ArticleFetcher,
    jobs: Vec<(usize, String)>,
    concurrency: usize,
    timeout: Duration,
) -> Vec<(usize, Result<String, SourceFetchError>)> {
    stream::iter(jobs)
        .map(move |(slot, url)| async move {
            let result = match tokio::time::timeout(timeout, fetcher.full_text(&url)).await {
                Ok(r) => r,
                Err(_) => Err(SourceFetchError::Timeout(timeout)),
            };
            if let Err(e) = &result {
                counter!("ingest_full_text_failures_total").increment(1);
                tracing::debug!(target: "ingest", url = %url, error = %e, "full text unavailable");
            }
            (slot, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}
