// src/ingest/mod.rs
//! Feed Fetcher: concurrent per-source fetching and normalization to [`RawEntry`].

pub mod article;
pub mod fetch;
pub mod providers;
pub mod types;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::SourceFetchError;
use crate::ingest::types::{ParsedItem, RawEntry, SourceProvider};

/// Upper bound on stored content; prompts truncate further per category.
pub const MAX_CONTENT_CHARS: usize = 20_000;

/// One-time metrics registration (so series show up in the snapshot).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_entries_total", "Entries accepted from sources.");
        describe_counter!(
            "ingest_invalid_total",
            "Entries dropped for a missing url or title."
        );
        describe_counter!("ingest_stale_total", "Entries older than the age cutoff.");
        describe_counter!(
            "ingest_source_errors_total",
            "Sources skipped after a fetch/parse error or timeout."
        );
        describe_counter!(
            "ingest_full_text_failures_total",
            "Linked pages that yielded no article text; feed content kept."
        );
        describe_histogram!("ingest_fetch_ms", "Per-source fetch time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_counter!("dedup_skipped_total", "Entries already processed.");
        describe_counter!("analyze_attempts_total", "AI completion attempts.");
        describe_counter!(
            "analyze_transport_failures_total",
            "Entries dropped after exhausting AI retries."
        );
        describe_counter!(
            "analyze_validation_failures_total",
            "Entries dropped for a malformed AI response."
        );
        describe_counter!(
            "emit_filtered_total",
            "Entries below threshold, rejected, or over the per-category cap."
        );
        describe_counter!("emit_persisted_total", "Entries handed to persistence.");
        describe_counter!(
            "emit_persist_failures_total",
            "Entries the persistence boundary refused."
        );
        describe_gauge!("pipeline_last_run_ts", "Unix ts when the pipeline last ran.");
    });
}

/// Normalize text: decode entities, strip tags, fold quotes, collapse whitespace.
/// Formula markup (`$...$`, `\(...\)`) passes through untouched.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| {
        Regex::new(r"(?is)<!--.*?-->|</?[a-z][a-z0-9]*(?:\s[^>]*)?/?>").expect("tag regex")
    });
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > MAX_CONTENT_CHARS {
        out = out.chars().take(MAX_CONTENT_CHARS).collect();
    }

    out
}

/// Absolute http(s) URL or nothing.
fn usable_url(raw: &str) -> Option<String> {
    let u = url::Url::parse(raw.trim()).ok()?;
    matches!(u.scheme(), "http" | "https").then(|| u.to_string())
}

/// A source paired with the category it is fetched for.
pub struct FetchJob {
    pub category: String,
    pub provider: Box<dyn SourceProvider>,
}

#[derive(Debug)]
pub struct SourceOutcome {
    pub category: String,
    pub source_id: String,
    pub result: Result<Vec<ParsedItem>, SourceFetchError>,
    pub elapsed: Duration,
}

/// Fetch every job with at most `concurrency` in flight, each bounded by `per_source_timeout`.
/// Outcomes arrive in completion order; a failing source yields an `Err` outcome and
/// never affects the others.
pub fn fetch_sources(
    jobs: Vec<FetchJob>,
    concurrency: usize,
    per_source_timeout: Duration,
) -> BoxStream<'static, SourceOutcome> {
    ensure_metrics_described();
    stream::iter(jobs)
        .map(move |job| async move {
            let t0 = Instant::now();
            let result =
                match tokio::time::timeout(per_source_timeout, job.provider.fetch_latest()).await {
                    Ok(r) => r,
                    Err(_) => Err(SourceFetchError::Timeout(per_source_timeout)),
                };
            let elapsed = t0.elapsed();
            histogram!("ingest_fetch_ms").record(elapsed.as_secs_f64() * 1_000.0);

            let source_id = job.provider.source_id().to_string();
            match &result {
                Ok(items) => tracing::info!(
                    target: "ingest",
                    category = %job.category,
                    source_id = %source_id,
                    items = items.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "source fetched"
                ),
                Err(e) => {
                    counter!("ingest_source_errors_total").increment(1);
                    tracing::warn!(
                        target: "ingest",
                        category = %job.category,
                        source_id = %source_id,
                        error = %e,
                        "source skipped"
                    );
                }
            }

            SourceOutcome {
                category: job.category,
                source_id,
                result,
                elapsed,
            }
        })
        .buffer_unordered(concurrency.max(1))
        .boxed()
}

/// Counts from turning one source's items into entries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AcceptStats {
    pub accepted: usize,
    pub invalid: usize,
    pub stale: usize,
}

/// Validate and normalize one source's items, preserving their order.
/// `seq` is the run-wide fetch counter; each accepted entry takes the next value.
pub fn to_raw_entries(
    category: &str,
    source_id: &str,
    items: Vec<ParsedItem>,
    cutoff: Option<DateTime<Utc>>,
    seq: &mut u64,
) -> (Vec<RawEntry>, AcceptStats) {
    let mut stats = AcceptStats::default();
    let mut out = Vec::with_capacity(items.len());

    for it in items {
        let url = it.url.as_deref().and_then(usable_url);
        let title = it
            .title
            .as_deref()
            .map(normalize_text)
            .filter(|t| !t.is_empty());
        let (Some(url), Some(title)) = (url, title) else {
            stats.invalid += 1;
            tracing::debug!(
                target: "ingest",
                source_id,
                has_url = it.url.is_some(),
                has_title = it.title.is_some(),
                "entry dropped: missing url or title"
            );
            continue;
        };

        if let (Some(cut), Some(published)) = (cutoff, it.published_at) {
            if published < cut {
                stats.stale += 1;
                continue;
            }
        }

        let entry = RawEntry {
            source_id: source_id.to_string(),
            category: category.to_string(),
            external_id: it
                .external_id
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            url,
            title,
            published_at: it.published_at,
            raw_content: it.content.as_deref().map(normalize_text).unwrap_or_default(),
            fetch_seq: *seq,
        };
        *seq += 1;
        out.push(entry);
    }

    stats.accepted = out.len();
    counter!("ingest_entries_total").increment(stats.accepted as u64);
    counter!("ingest_invalid_total").increment(stats.invalid as u64);
    counter!("ingest_stale_total").increment(stats.stale as u64);
    (out, stats)
}
