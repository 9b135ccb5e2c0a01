// src/ingest/fetch.rs
//! Shared HTTP client for feed sources.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;

use crate::config::FetchSettings;
use crate::error::SourceFetchError;

/// Content types that are never feeds.
const BLOCKED_CONTENT_TYPES: &[&str] = &[
    "image/",
    "video/",
    "audio/",
    "application/pdf",
    "application/zip",
];

pub struct HttpFetcher {
    client: reqwest::Client,
    direct: reqwest::Client,
    max_body_bytes: u64,
}

impl HttpFetcher {
    pub fn new(cfg: &FetchSettings) -> anyhow::Result<Self> {
        let build = |proxy: Option<&str>| -> anyhow::Result<reqwest::Client> {
            let mut b = reqwest::Client::builder()
                .user_agent(cfg.user_agent.as_str())
                .connect_timeout(Duration::from_secs(10).min(cfg.timeout))
                .timeout(cfg.timeout)
                .redirect(reqwest::redirect::Policy::limited(5));
            if let Some(p) = proxy {
                b = b.proxy(reqwest::Proxy::all(p)?);
            }
            Ok(b.build()?)
        };
        Ok(Self {
            client: build(cfg.proxy_url.as_deref())?,
            direct: build(None)?,
            max_body_bytes: cfg.max_body_bytes,
        })
    }

    /// Local addresses never go through the proxy.
    fn client_for(&self, url: &str) -> &reqwest::Client {
        if url.contains("127.0.0.1") || url.contains("localhost") {
            &self.direct
        } else {
            &self.client
        }
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, SourceFetchError> {
        let mut resp = self
            .client_for(url)
            .get(url)
            .header(
                "Accept",
                "application/rss+xml, application/atom+xml, application/json, application/xml;q=0.9, */*;q=0.8",
            )
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceFetchError::Status(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if BLOCKED_CONTENT_TYPES.iter().any(|b| content_type.contains(b)) {
            return Err(SourceFetchError::ContentType(content_type));
        }

        if resp
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes)
        {
            return Err(SourceFetchError::TooLarge {
                limit: self.max_body_bytes,
            });
        }

        // Enforced while reading: chunked bodies have no Content-Length.
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(map_reqwest)? {
            if (body.len() + chunk.len()) as u64 > self.max_body_bytes {
                return Err(SourceFetchError::TooLarge {
                    limit: self.max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }
        // Feeds that lie about their charset are still mostly UTF-8.
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

fn map_reqwest(e: reqwest::Error) -> SourceFetchError {
    SourceFetchError::Transport(e.to_string())
}
