// src/dedup/mod.rs
//! Dedup Filter: the only access path to the processed-identity set.
//!
//! `is_new` never marks. Identities are marked only after the entry has been
//! persisted, so a crash in between costs one extra AI call and nothing is lost.

pub mod identity;
pub mod store;

use std::sync::Arc;

use metrics::counter;

use crate::error::DedupError;
use crate::ingest::types::RawEntry;

pub use identity::{normalize_url, EntryIdentity, IdentityDeriver};
pub use store::{DedupStore, FileDedupStore, MemoryDedupStore};

/// Whether identities are namespaced by source or shared by the whole corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupScope {
    #[default]
    PerSource,
    Global,
}

#[derive(Clone)]
pub struct DedupFilter {
    deriver: IdentityDeriver,
    store: Arc<dyn DedupStore>,
}

impl DedupFilter {
    pub fn new(deriver: IdentityDeriver, store: Arc<dyn DedupStore>) -> Self {
        Self { deriver, store }
    }

    pub fn identity(&self, entry: &RawEntry) -> EntryIdentity {
        self.deriver.identity(entry)
    }

    pub fn scope(&self) -> DedupScope {
        self.deriver.scope()
    }

    pub async fn is_new(&self, id: &EntryIdentity) -> Result<bool, DedupError> {
        let seen = self.store.contains(id).await?;
        if seen {
            counter!("dedup_skipped_total").increment(1);
            tracing::debug!(target: "dedup", identity = %id, "already processed");
        }
        Ok(!seen)
    }

    pub fn content_key(&self, entry: &RawEntry) -> Option<EntryIdentity> {
        self.deriver.content_key(entry)
    }

    pub async fn mark_seen(&self, id: &EntryIdentity) -> Result<(), DedupError> {
        self.store.insert(id).await
    }

    /// Mark `id` and, when one is derived, the content key of `entry`.
    pub async fn mark_processed(&self, id: &EntryIdentity, entry: &RawEntry) -> Result<(), DedupError> {
        self.mark_seen(id).await?;
        if let Some(key) = self.content_key(entry) {
            self.mark_seen(&key).await?;
        }
        Ok(())
    }
}
