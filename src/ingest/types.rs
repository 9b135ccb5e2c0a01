// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceFetchError;

/// One feed item before analysis. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawEntry {
    /// `category/name` of the source that produced it.
    pub source_id: String,
    pub category: String,
    /// Feed-provided guid / id, when there is one.
    pub external_id: Option<String>,
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Normalized text, possibly truncated.
    pub raw_content: String,
    /// Position in the run's fetch order; breaks score/date ties.
    #[serde(default)]
    pub fetch_seq: u64,
}

/// An item as a provider parsed it, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedItem {
    pub external_id: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content: Option<String>,
}

/// Turns a fetched document into items, preserving document order.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<ParsedItem>, SourceFetchError>;
    fn source_id(&self) -> &str;
}
