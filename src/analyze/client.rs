// src/analyze/client.rs
//! AI completion clients: the OpenAI-compatible HTTP provider and a deterministic mock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::prompt::Prompt;
use crate::config::AiSettings;
use crate::error::TransportError;

/// One operation: prompt in, raw completion text out.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, TransportError>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynCompletionClient = Arc<dyn CompletionClient>;

/// Factory: mock when `AI_TEST_MODE=mock`, otherwise the HTTP provider (needs a key).
pub fn build_client(cfg: &AiSettings) -> anyhow::Result<DynCompletionClient> {
    if cfg.mock {
        return Ok(Arc::new(MockClient::default()));
    }
    if !cfg.has_credentials() {
        anyhow::bail!("AI_API_KEY is not set (use AI_TEST_MODE=mock for a dry run)");
    }
    Ok(Arc::new(OpenAiClient::new(cfg)?))
}

/// Chat Completions over any OpenAI-compatible endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(cfg: &AiSettings) -> anyhow::Result<Self> {
        let timeout = cfg.timeout();
        let http = reqwest::Client::builder()
            .user_agent(concat!("news-ingest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Connect(e.to_string())
        }
    }
}

/// `Retry-After` in seconds. HTTP-date values are ignored.
fn parse_retry_after(v: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    v.and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success status onto the transport taxonomy.
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> TransportError {
    match status.as_u16() {
        429 => TransportError::RateLimited { retry_after },
        401 | 403 => TransportError::Unauthorized(status.as_u16()),
        s if status.is_server_error() => TransportError::Server(s),
        s => TransportError::Rejected {
            status: s,
            message: body.chars().take(200).collect(),
        },
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, TransportError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = prompt.system.as_deref() {
            messages.push(Msg {
                role: "system",
                content: sys,
            });
        }
        messages.push(Msg {
            role: "user",
            content: &prompt.user,
        });
        let req = Req {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers().get(RETRY_AFTER));
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        let body: Resp = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Envelope(e.to_string())
            }
        })?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Envelope("no choices".to_string()))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Deterministic stand-in for dry runs: every entry gets the same score.
#[derive(Debug, Clone)]
pub struct MockClient {
    pub score: u8,
}

impl Default for MockClient {
    fn default() -> Self {
        Self { score: 75 }
    }
}

#[async_trait]
impl CompletionClient for MockClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, TransportError> {
        let headline: String = prompt
            .user
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(60)
            .collect();
        Ok(serde_json::json!({
            "score": self.score,
            "summary": format!("{headline} (mock)"),
            "tags": ["mock"],
        })
        .to_string())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
