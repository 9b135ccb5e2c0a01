// src/emit.rs
//! Filter & Emitter: threshold, rank, cap, then persist-then-mark.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::analyze::AnalysisResult;
use crate::dedup::{DedupFilter, EntryIdentity};
use crate::error::PersistenceError;
use crate::ingest::types::RawEntry;

/// RawEntry + AnalysisResult + category. What crosses the persistence boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedEntry {
    pub identity: EntryIdentity,
    pub category: String,
    pub entry: RawEntry,
    #[serde(flatten)]
    pub analysis: AnalysisResult,
    pub analyzed_at: DateTime<Utc>,
}

/// Ranking order: score desc, then earliest `published_at` (undated last), then fetch order.
pub fn rank(a: &AnalyzedEntry, b: &AnalyzedEntry) -> Ordering {
    b.analysis
        .score
        .cmp(&a.analysis.score)
        .then_with(|| match (a.entry.published_at, b.entry.published_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.entry.fetch_seq.cmp(&b.entry.fetch_seq))
}

#[derive(Debug, Default)]
pub struct Selection {
    /// In emission order.
    pub kept: Vec<AnalyzedEntry>,
    /// Below threshold or over the cap. Analyzed, so settled without emission.
    pub dropped: Vec<AnalyzedEntry>,
    pub below_threshold: usize,
    pub over_cap: usize,
}

/// Keep entries scoring at least `threshold`, best `max_items` of them.
pub fn select_for_emission(
    candidates: Vec<AnalyzedEntry>,
    threshold: u8,
    max_items: usize,
) -> Selection {
    let (mut kept, mut dropped): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|e| e.analysis.score >= threshold);
    let below_threshold = dropped.len();

    kept.sort_by(rank);
    let tail = kept.split_off(max_items.min(kept.len()));
    let over_cap = tail.len();
    dropped.extend(tail);

    counter!("emit_filtered_total").increment((below_threshold + over_cap) as u64);
    Selection {
        kept,
        dropped,
        below_threshold,
        over_cap,
    }
}

/// The external store. `Ok` means the entry is durably handed over.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn persist(&self, entry: &AnalyzedEntry) -> Result<(), PersistenceError>;
}

/// Appends one JSON object per line.
pub struct JsonlSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceSink for JsonlSink {
    async fn persist(&self, entry: &AnalyzedEntry) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }
}

/// In-memory sink; can be told to refuse specific urls.
#[derive(Debug, Default)]
pub struct MemorySink {
    stored: Mutex<Vec<AnalyzedEntry>>,
    refuse: Mutex<HashSet<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_url(&self, url: impl Into<String>) {
        if let Ok(mut r) = self.refuse.lock() {
            r.insert(url.into());
        }
    }

    pub fn accept_all(&self) {
        if let Ok(mut r) = self.refuse.lock() {
            r.clear();
        }
    }

    pub fn stored(&self) -> Vec<AnalyzedEntry> {
        self.stored.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn persist(&self, entry: &AnalyzedEntry) -> Result<(), PersistenceError> {
        let refused = self
            .refuse
            .lock()
            .map(|r| r.contains(&entry.entry.url))
            .unwrap_or(false);
        if refused {
            return Err(PersistenceError::Rejected(format!(
                "refused {}",
                entry.identity
            )));
        }
        self.stored
            .lock()
            .map_err(|_| PersistenceError::Rejected("memory sink poisoned".into()))?
            .push(entry.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Emitted,
    /// Not persisted; identity left unmarked.
    PersistFailed,
    /// Persisted, but the identity could not be marked. May be re-offered next run.
    MarkFailed,
}

/// Persist, and only on success mark the identity seen.
pub struct Emitter<'a> {
    sink: &'a dyn PersistenceSink,
    dedup: &'a DedupFilter,
}

impl<'a> Emitter<'a> {
    pub fn new(sink: &'a dyn PersistenceSink, dedup: &'a DedupFilter) -> Self {
        Self { sink, dedup }
    }

    pub async fn emit(&self, entry: &AnalyzedEntry) -> EmitOutcome {
        if let Err(e) = self.sink.persist(entry).await {
            counter!("emit_persist_failures_total").increment(1);
            tracing::warn!(
                target: "emit",
                category = %entry.category,
                source_id = %entry.entry.source_id,
                identity = %entry.identity,
                error = %e,
                "persist failed; identity stays unmarked"
            );
            return EmitOutcome::PersistFailed;
        }
        counter!("emit_persisted_total").increment(1);

        match self.dedup.mark_processed(&entry.identity, &entry.entry).await {
            Ok(()) => EmitOutcome::Emitted,
            Err(e) => {
                tracing::error!(
                    target: "emit",
                    identity = %entry.identity,
                    error = %e,
                    "persisted but could not mark seen"
                );
                EmitOutcome::MarkFailed
            }
        }
    }

    /// Mark an analyzed entry that will not be emitted (filtered, capped or
    /// rejected by the model) so later runs do not pay for it again.
    pub async fn settle(&self, identity: &EntryIdentity, entry: &RawEntry) -> bool {
        match self.dedup.mark_processed(identity, entry).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    target: "emit",
                    identity = %identity,
                    error = %e,
                    "could not mark settled entry seen"
                );
                false
            }
        }
    }
}
