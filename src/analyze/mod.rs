// src/analyze/mod.rs
//! AI Analyzer: prompt construction, bounded dispatch with retry, response validation.

pub mod client;
pub mod pool;
pub mod prompt;
pub mod response;
pub mod retry;

use std::time::Duration;

use tokio::sync::watch;

use crate::config::AiSettings;

pub use client::{build_client, CompletionClient, DynCompletionClient, MockClient, OpenAiClient};
pub use pool::{JobOutcome, PoolConfig, PoolReport};
pub use prompt::{truncate_chars, Prompt};
pub use response::{parse_response, AnalysisResult, Verdict};
pub use retry::RetryPolicy;

/// One entry ready for the AI service. `entry_ref` points back into the caller's batch.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub entry_ref: usize,
    pub category: String,
    pub prompt: Prompt,
}

pub struct Analyzer {
    client: DynCompletionClient,
    cfg: PoolConfig,
}

impl Analyzer {
    pub fn new(client: DynCompletionClient, settings: &AiSettings) -> Self {
        Self {
            client,
            cfg: PoolConfig {
                workers: settings.max_workers.max(1),
                call_timeout: settings.timeout(),
                failure_budget: settings.failure_budget.max(1),
                policy: RetryPolicy::from_settings(settings),
            },
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.cfg.policy = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.call_timeout = timeout;
        self
    }

    pub fn workers(&self) -> usize {
        self.cfg.workers
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    /// Run all requests through the worker pool. Outcomes come back in completion order.
    pub async fn analyze(
        &self,
        requests: Vec<AnalysisRequest>,
        shutdown: watch::Receiver<bool>,
    ) -> PoolReport {
        tracing::info!(
            target: "analyze",
            provider = self.provider_name(),
            entries = requests.len(),
            workers = self.cfg.workers,
            "dispatching ai analysis"
        );
        let jobs = requests
            .into_iter()
            .map(|r| pool::Job::new(r.entry_ref, r.category, r.prompt))
            .collect();
        pool::run_pool(self.client.clone(), self.cfg.clone(), jobs, shutdown).await
    }
}
