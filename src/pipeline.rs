// src/pipeline.rs
//! One batch run: fetch → dedup → full text → analyze → rank → persist-then-mark.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::watch;

use crate::analyze::{AnalysisRequest, Analyzer, Prompt, Verdict};
use crate::config::FetchSettings;
use crate::dedup::{DedupFilter, EntryIdentity};
use crate::emit::{select_for_emission, AnalyzedEntry, EmitOutcome, Emitter, PersistenceSink};
use crate::error::{AnalysisError, RunError};
use crate::ingest::article::{fetch_full_texts, ArticleFetcher};
use crate::ingest::fetch::HttpFetcher;
use crate::ingest::providers::provider_for;
use crate::ingest::types::{RawEntry, SourceProvider};
use crate::ingest::{ensure_metrics_described, fetch_sources, to_raw_entries, FetchJob};
use crate::strategy::{SourceKind, SourceSpec, StrategyConfig, StrategyResolver};

/// Builds the provider for one configured source.
pub type ProviderFactory = Arc<dyn Fn(&SourceSpec) -> Box<dyn SourceProvider> + Send + Sync>;

/// Providers that fetch over HTTP with a shared client.
pub fn http_providers(http: Arc<HttpFetcher>) -> ProviderFactory {
    Arc::new(move |spec: &SourceSpec| provider_for(spec, http.clone()))
}

/// Counts for one run. Enough to spot silent data loss without verbose logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub sources: usize,
    pub source_failures: usize,
    pub fetched: usize,
    pub invalid: usize,
    pub stale: usize,
    pub deduplicated: usize,
    /// Full-text fetches that failed; the feed content was analyzed instead.
    pub full_text_failed: usize,
    pub analyzed: usize,
    pub transport_failed: usize,
    pub validation_failed: usize,
    /// Below threshold, plus outright AI rejections.
    pub filtered_by_score: usize,
    pub over_cap: usize,
    /// Analyzed but not emitted, and marked seen so later runs skip them.
    pub settled: usize,
    pub emitted: usize,
    pub persist_failed: usize,
    pub mark_failed: usize,
    /// AI jobs dropped by shutdown or an early abort.
    pub abandoned: usize,
    pub cancelled: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sources={} source_failures={} fetched={} invalid={} stale={} deduplicated={} \
             full_text_failed={} analyzed={} transport_failed={} validation_failed={} \
             filtered_by_score={} over_cap={} settled={} emitted={} persist_failed={} \
             mark_failed={} abandoned={} cancelled={}",
            self.sources,
            self.source_failures,
            self.fetched,
            self.invalid,
            self.stale,
            self.deduplicated,
            self.full_text_failed,
            self.analyzed,
            self.transport_failed,
            self.validation_failed,
            self.filtered_by_score,
            self.over_cap,
            self.settled,
            self.emitted,
            self.persist_failed,
            self.mark_failed,
            self.abandoned,
            self.cancelled
        )
    }
}

pub struct Pipeline {
    strategies: Arc<dyn StrategyResolver>,
    providers: ProviderFactory,
    dedup: DedupFilter,
    analyzer: Analyzer,
    sink: Arc<dyn PersistenceSink>,
    fetch: FetchSettings,
    articles: Option<Arc<dyn ArticleFetcher>>,
}

impl Pipeline {
    pub fn new(
        strategies: Arc<dyn StrategyResolver>,
        providers: ProviderFactory,
        dedup: DedupFilter,
        analyzer: Analyzer,
        sink: Arc<dyn PersistenceSink>,
        fetch: FetchSettings,
    ) -> Self {
        Self {
            strategies,
            providers,
            dedup,
            analyzer,
            sink,
            fetch,
            articles: None,
        }
    }

    /// Source of full article text for categories with `full_text` set.
    /// Without one, those categories analyze the feed content.
    pub fn with_article_fetcher(mut self, articles: Arc<dyn ArticleFetcher>) -> Self {
        self.articles = Some(articles);
        self
    }

    /// Run the pipeline once for `categories` (all known categories when empty).
    ///
    /// Per-source and per-entry failures are counted, never propagated. Returns
    /// `Err` only for run-level conditions. An identity is marked once its entry
    /// is persisted, or once a completed run has analyzed and dropped it; entries
    /// lost to transport or validation failures stay unmarked.
    pub async fn run_once(
        &self,
        categories: &[String],
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, RunError> {
        ensure_metrics_described();
        let started = Instant::now();
        let mut summary = RunSummary::default();

        let keys = if categories.is_empty() {
            self.strategies.categories()
        } else {
            categories.to_vec()
        };
        let strategies = keys
            .iter()
            .map(|k| self.strategies.strategy(k))
            .collect::<Result<Vec<StrategyConfig>, _>>()?;
        let by_category: HashMap<&str, &StrategyConfig> =
            strategies.iter().map(|s| (s.category.as_str(), s)).collect();

        // ---- fetch ----
        let jobs: Vec<FetchJob> = strategies
            .iter()
            .flat_map(|s| {
                s.sources.iter().map(|src| FetchJob {
                    category: s.category.clone(),
                    provider: (self.providers)(src),
                })
            })
            .collect();
        summary.sources = jobs.len();
        tracing::info!(
            target: "pipeline",
            categories = strategies.len(),
            sources = summary.sources,
            "run started"
        );

        let cutoff = self
            .fetch
            .max_age
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() - d);
        // JSON boards carry no reliable dates; only feeds are age-filtered.
        let json_sources: HashSet<&str> = strategies
            .iter()
            .flat_map(|s| &s.sources)
            .filter(|src| matches!(src.kind, SourceKind::Json(_)))
            .map(|src| src.source_id.as_str())
            .collect();
        let mut outcomes = fetch_sources(jobs, self.fetch.concurrency, self.fetch.timeout);
        let mut entries: Vec<RawEntry> = Vec::new();
        let mut seq = 0u64;
        while let Some(o) = outcomes.next().await {
            match o.result {
                Ok(items) => {
                    let cutoff = cutoff.filter(|_| !json_sources.contains(o.source_id.as_str()));
                    let (batch, stats) =
                        to_raw_entries(&o.category, &o.source_id, items, cutoff, &mut seq);
                    summary.fetched += stats.accepted;
                    summary.invalid += stats.invalid;
                    summary.stale += stats.stale;
                    entries.extend(batch);
                }
                Err(_) => summary.source_failures += 1,
            }
            if *shutdown.borrow() {
                return Ok(self.finish_cancelled(summary, started));
            }
        }
        drop(outcomes);

        // ---- dedup ----
        let mut in_run: HashSet<EntryIdentity> = HashSet::new();
        let mut fresh: Vec<(RawEntry, EntryIdentity)> = Vec::new();
        for entry in entries {
            let id = self.dedup.identity(&entry);
            if !in_run.insert(id.clone()) {
                summary.deduplicated += 1;
                counter!("dedup_skipped_total").increment(1);
                continue;
            }
            if self.dedup.is_new(&id).await? {
                fresh.push((entry, id));
            } else {
                summary.deduplicated += 1;
            }
        }

        // ---- full text ----
        if let Some(articles) = &self.articles {
            let jobs: Vec<(usize, String)> = fresh
                .iter()
                .enumerate()
                .filter(|(_, (e, _))| {
                    by_category
                        .get(e.category.as_str())
                        .is_some_and(|s| s.full_text)
                })
                .map(|(i, (e, _))| (i, e.url.clone()))
                .collect();
            if !jobs.is_empty() {
                let texts = fetch_full_texts(
                    articles.as_ref(),
                    jobs,
                    self.fetch.concurrency,
                    self.fetch.timeout,
                )
                .await;
                for (i, text) in texts {
                    match text {
                        Ok(t) => fresh[i].0.raw_content = t,
                        Err(_) => summary.full_text_failed += 1,
                    }
                }
            }
            if *shutdown.borrow() {
                return Ok(self.finish_cancelled(summary, started));
            }
        }

        // ---- content dedup ----
        let mut in_run_content: HashSet<EntryIdentity> = HashSet::new();
        let mut unique: Vec<(RawEntry, EntryIdentity)> = Vec::with_capacity(fresh.len());
        for (entry, id) in fresh {
            if let Some(key) = self.dedup.content_key(&entry) {
                if !in_run_content.insert(key.clone()) {
                    summary.deduplicated += 1;
                    counter!("dedup_skipped_total").increment(1);
                    continue;
                }
                if !self.dedup.is_new(&key).await? {
                    summary.deduplicated += 1;
                    continue;
                }
            }
            unique.push((entry, id));
        }
        let fresh = unique;

        // ---- analyze ----
        let requests: Vec<AnalysisRequest> = fresh
            .iter()
            .enumerate()
            .filter_map(|(i, (entry, _))| {
                by_category
                    .get(entry.category.as_str())
                    .map(|s| AnalysisRequest {
                        entry_ref: i,
                        category: entry.category.clone(),
                        prompt: Prompt::render(s, entry),
                    })
            })
            .collect();
        let report = self.analyzer.analyze(requests, shutdown.clone()).await;

        let mut slots: Vec<Option<(RawEntry, EntryIdentity)>> = fresh.into_iter().map(Some).collect();
        let mut buckets: HashMap<String, Vec<AnalyzedEntry>> = HashMap::new();
        let mut rejected: Vec<(EntryIdentity, RawEntry)> = Vec::new();
        let analyzed_at = Utc::now();
        for o in report.outcomes {
            let Some((entry, identity)) = slots.get_mut(o.entry_ref).and_then(Option::take) else {
                continue;
            };
            match o.result {
                Ok(Verdict::Accepted(analysis)) => {
                    summary.analyzed += 1;
                    buckets
                        .entry(entry.category.clone())
                        .or_default()
                        .push(AnalyzedEntry {
                            identity,
                            category: entry.category.clone(),
                            entry,
                            analysis,
                            analyzed_at,
                        });
                }
                Ok(Verdict::Rejected) => {
                    summary.analyzed += 1;
                    summary.filtered_by_score += 1;
                    counter!("emit_filtered_total").increment(1);
                    tracing::debug!(
                        target: "analyze",
                        source_id = %entry.source_id,
                        identity = %identity,
                        "rejected by model"
                    );
                    rejected.push((identity, entry));
                }
                Err(AnalysisError::Transport { attempts, last }) => {
                    summary.transport_failed += 1;
                    counter!("analyze_transport_failures_total").increment(1);
                    tracing::warn!(
                        target: "analyze",
                        source_id = %entry.source_id,
                        identity = %identity,
                        attempts,
                        error = %last,
                        "entry dropped: ai transport failure"
                    );
                }
                Err(AnalysisError::Validation(e)) => {
                    summary.validation_failed += 1;
                    counter!("analyze_validation_failures_total").increment(1);
                    tracing::warn!(
                        target: "analyze",
                        source_id = %entry.source_id,
                        identity = %identity,
                        error = %e,
                        "entry dropped: malformed ai response"
                    );
                }
                Err(AnalysisError::Cancelled) => summary.abandoned += 1,
            }
        }

        if let Some(reason) = report.aborted {
            tracing::error!(target: "pipeline", summary = %summary, "run aborted");
            return Err(RunError::AiUnavailable(reason));
        }
        if report.cancelled || *shutdown.borrow() {
            return Ok(self.finish_cancelled(summary, started));
        }

        // ---- rank + emit, per category in strategy order ----
        let emitter = Emitter::new(self.sink.as_ref(), &self.dedup);
        let mut settle: Vec<(EntryIdentity, RawEntry)> = rejected;
        'emit: for s in &strategies {
            let Some(candidates) = buckets.remove(&s.category) else {
                continue;
            };
            let selection = select_for_emission(candidates, s.score_threshold, s.max_items);
            summary.filtered_by_score += selection.below_threshold;
            summary.over_cap += selection.over_cap;
            settle.extend(
                selection
                    .dropped
                    .into_iter()
                    .map(|e| (e.identity, e.entry)),
            );

            for entry in &selection.kept {
                if *shutdown.borrow() {
                    summary.cancelled = true;
                    break 'emit;
                }
                match emitter.emit(entry).await {
                    EmitOutcome::Emitted => summary.emitted += 1,
                    EmitOutcome::PersistFailed => summary.persist_failed += 1,
                    EmitOutcome::MarkFailed => {
                        summary.emitted += 1;
                        summary.mark_failed += 1;
                    }
                }
            }
            tracing::info!(
                target: "emit",
                category = %s.category,
                kept = selection.kept.len(),
                below_threshold = selection.below_threshold,
                over_cap = selection.over_cap,
                "category emitted"
            );
        }

        // ---- settle analyzed-but-dropped entries ----
        if !summary.cancelled {
            for (identity, entry) in &settle {
                if emitter.settle(identity, entry).await {
                    summary.settled += 1;
                } else {
                    summary.mark_failed += 1;
                }
            }
        }

        gauge!("pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            target: "pipeline",
            elapsed_ms = started.elapsed().as_millis() as u64,
            summary = %summary,
            "run finished"
        );
        Ok(summary)
    }

    fn finish_cancelled(&self, mut summary: RunSummary, started: Instant) -> RunSummary {
        summary.cancelled = true;
        tracing::warn!(
            target: "pipeline",
            elapsed_ms = started.elapsed().as_millis() as u64,
            summary = %summary,
            "run cancelled; nothing further emitted or marked"
        );
        summary
    }
}
