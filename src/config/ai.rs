// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use super::{env_f32, env_string, env_u32, env_u64, env_usize};

pub const DEFAULT_AI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";

fn default_url() -> String {
    DEFAULT_AI_URL.to_string()
}
fn default_model() -> String {
    DEFAULT_AI_MODEL.to_string()
}
fn default_max_workers() -> usize {
    2
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.3
}
fn default_failure_budget() -> u32 {
    5
}

/// Settings for the AI completion service and its dispatch limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    /// OpenAI-compatible base URL (`.../v1`).
    #[serde(default = "default_url")]
    pub base_url: String,
    /// "ENV" means: read from AI_API_KEY.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Ceiling on in-flight AI calls. Independent of the fetch ceiling.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Total attempts per entry, first call included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Consecutive entries lost to transport failures before the run gives up.
    #[serde(default = "default_failure_budget")]
    pub failure_budget: u32,
    /// Use the deterministic mock client instead of the network.
    #[serde(default)]
    pub mock: bool,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            base_url: default_url(),
            api_key: String::new(),
            model: default_model(),
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            failure_budget: default_failure_budget(),
            mock: false,
        }
    }
}

impl AiSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        let mut cfg = Self {
            base_url: env_string("AI_URL").unwrap_or(d.base_url),
            api_key: env_string("AI_API_KEY").unwrap_or_default(),
            model: env_string("AI_MODEL").unwrap_or(d.model),
            max_workers: env_usize("AI_MAX_WORKERS", d.max_workers),
            max_retries: env_u32("AI_MAX_RETRIES", d.max_retries),
            base_delay_ms: env_u64("AI_BASE_DELAY_MS", d.base_delay_ms),
            max_delay_ms: env_u64("AI_MAX_DELAY_MS", d.max_delay_ms),
            timeout_secs: env_u64("AI_TIMEOUT_SECS", d.timeout_secs),
            temperature: env_f32("AI_TEMPERATURE", d.temperature),
            failure_budget: env_u32("AI_FAILURE_BUDGET", d.failure_budget),
            mock: env_string("AI_TEST_MODE").as_deref() == Some("mock"),
        };
        cfg.sanitize();
        cfg
    }

    /// Load from a JSON file; an `api_key` of "ENV" is resolved from `AI_API_KEY`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: AiSettings = serde_json::from_str(&data)?;

        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = std::env::var("AI_API_KEY")
                .map_err(|_| anyhow::anyhow!("Missing AI_API_KEY env var"))?;
        }

        cfg.sanitize();
        Ok(cfg)
    }

    fn sanitize(&mut self) {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        self.max_workers = self.max_workers.max(1);
        self.max_retries = self.max_retries.max(1);
        if self.max_delay_ms < self.base_delay_ms {
            self.max_delay_ms = self.base_delay_ms;
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = default_temperature();
        }
        self.failure_budget = self.failure_budget.max(1);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("ai.json");
        fs::write(&p, r#"{"api_key": "ENV", "max_workers": 0}"#).unwrap();

        std::env::set_var("AI_API_KEY", "sk-test");
        let cfg = AiSettings::load_from_file(&p).unwrap();
        std::env::remove_var("AI_API_KEY");

        assert_eq!(cfg.api_key, "sk-test");
        assert_eq!(cfg.max_workers, 1, "ceiling is clamped to at least one");
        assert_eq!(cfg.model, DEFAULT_AI_MODEL);
    }

    #[serial_test::serial]
    #[test]
    fn env_key_missing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("ai.json");
        fs::write(&p, r#"{"api_key": "env"}"#).unwrap();
        std::env::remove_var("AI_API_KEY");
        assert!(AiSettings::load_from_file(&p).is_err());
    }
}
