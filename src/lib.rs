// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod config;
pub mod dedup;
pub mod emit;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod strategy;

// ---- Re-exports for stable public API ----
pub use crate::emit::AnalyzedEntry;
pub use crate::error::RunError;
pub use crate::ingest::types::RawEntry;
pub use crate::pipeline::{Pipeline, RunSummary};
pub use crate::strategy::{StrategyConfig, StrategyResolver};

use std::sync::Arc;

use anyhow::Context;

use crate::analyze::{build_client, Analyzer};
use crate::config::Settings;
use crate::dedup::{DedupFilter, FileDedupStore, IdentityDeriver};
use crate::emit::JsonlSink;
use crate::ingest::article::HttpArticleFetcher;
use crate::ingest::fetch::HttpFetcher;

/// Wire a [`Pipeline`] from settings: category files, file-backed dedup
/// store, JSONL output, HTTP sources and article pages.
pub async fn build_pipeline(settings: &Settings) -> anyhow::Result<Pipeline> {
    let strategies = strategy::load_categories_from_dir(
        &settings.categories_dir,
        &settings.rsshub_base_url,
    )
    .with_context(|| format!("load categories from {}", settings.categories_dir.display()))?;

    let store = FileDedupStore::open(&settings.dedup.store_path)
        .await
        .with_context(|| format!("open dedup store {}", settings.dedup.store_path.display()))?;
    let dedup = DedupFilter::new(
        IdentityDeriver::new(
            settings.dedup.scope,
            settings.dedup.extra_strip_params.clone(),
        )
        .with_content_keys(settings.dedup.content_keys),
        Arc::new(store),
    );

    let client = build_client(&settings.ai)?;
    let analyzer = Analyzer::new(client, &settings.ai);
    let http = Arc::new(HttpFetcher::new(&settings.fetch).context("build http client")?);

    Ok(Pipeline::new(
        Arc::new(strategies),
        pipeline::http_providers(http.clone()),
        dedup,
        analyzer,
        Arc::new(JsonlSink::new(&settings.output_path)),
        settings.fetch.clone(),
    )
    .with_article_fetcher(Arc::new(HttpArticleFetcher::new(http))))
}
