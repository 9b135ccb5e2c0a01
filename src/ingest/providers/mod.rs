pub mod json_api;
pub mod rss;

use std::sync::Arc;

use crate::ingest::fetch::HttpFetcher;
use crate::ingest::types::SourceProvider;
use crate::strategy::{SourceKind, SourceSpec};

/// Build the provider matching a source's kind.
pub fn provider_for(spec: &SourceSpec, http: Arc<HttpFetcher>) -> Box<dyn SourceProvider> {
    match &spec.kind {
        SourceKind::Feed => Box::new(rss::FeedProvider::from_url(
            spec.source_id.clone(),
            spec.url.clone(),
            http,
        )),
        SourceKind::Json(mapping) => Box::new(json_api::JsonApiProvider::from_url(
            spec.source_id.clone(),
            spec.url.clone(),
            mapping.clone(),
            http,
        )),
    }
}
