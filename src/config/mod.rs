// src/config/mod.rs
//! Process settings, read from the environment (`.env` is loaded by the binary).
//! Unparsable numbers fall back to their defaults.

pub mod ai;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::dedup::DedupScope;
use crate::strategy::DEFAULT_RSSHUB_BASE_URL;

pub use ai::AiSettings;

pub const DEFAULT_CATEGORIES_DIR: &str = "config/categories";
pub const DEFAULT_DEDUP_STORE_PATH: &str = "data/seen_identities.jsonl";
pub const DEFAULT_OUTPUT_PATH: &str = "data/analyzed.jsonl";
pub const DEFAULT_USER_AGENT: &str = concat!("news-ingest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Ceiling on concurrent source fetches. Independent of the AI ceiling.
    pub concurrency: usize,
    pub timeout: Duration,
    /// Entries published earlier than `now - max_age` are stale.
    pub max_age: Option<Duration>,
    pub max_body_bytes: u64,
    pub user_agent: String,
    pub proxy_url: Option<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Duration::from_secs(20),
            max_age: Some(Duration::from_secs(48 * 3600)),
            max_body_bytes: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy_url: None,
        }
    }
}

impl FetchSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        let max_age_hours = env_u64("FETCH_MAX_AGE_HOURS", 48);
        Self {
            concurrency: env_usize("FETCH_CONCURRENCY", d.concurrency).max(1),
            timeout: Duration::from_secs(env_u64("FETCH_TIMEOUT_SECS", 20).max(1)),
            // 0 disables the age cutoff
            max_age: (max_age_hours > 0).then(|| Duration::from_secs(max_age_hours * 3600)),
            max_body_bytes: env_u64("FETCH_MAX_BODY_BYTES", d.max_body_bytes),
            user_agent: env_string("FETCH_USER_AGENT").unwrap_or(d.user_agent),
            proxy_url: env_string("HTTP_PROXY_URL"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupSettings {
    pub scope: DedupScope,
    pub store_path: PathBuf,
    /// Tracking query parameters stripped in addition to the built-in list.
    pub extra_strip_params: Vec<String>,
    /// Also skip entries whose article text was already processed.
    pub content_keys: bool,
}

impl DedupSettings {
    pub fn from_env() -> Self {
        let scope = match env_string("DEDUP_SCOPE")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "global" => DedupScope::Global,
            _ => DedupScope::PerSource,
        };
        let extra_strip_params = env_string("DEDUP_STRIP_PARAMS")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_ascii_lowercase())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            scope,
            store_path: env_string("DEDUP_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEDUP_STORE_PATH)),
            extra_strip_params,
            content_keys: env_bool("DEDUP_CONTENT_HASH", true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub ai: AiSettings,
    pub fetch: FetchSettings,
    pub dedup: DedupSettings,
    pub categories_dir: PathBuf,
    pub rsshub_base_url: String,
    pub output_path: PathBuf,
    pub metrics_textfile: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            ai: AiSettings::from_env(),
            fetch: FetchSettings::from_env(),
            dedup: DedupSettings::from_env(),
            categories_dir: env_string("CATEGORIES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CATEGORIES_DIR)),
            rsshub_base_url: env_string("RSSHUB_BASE_URL")
                .unwrap_or_else(|| DEFAULT_RSSHUB_BASE_URL.to_string()),
            output_path: env_string("OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH)),
            metrics_textfile: env_string("METRICS_TEXTFILE_PATH").map(PathBuf::from),
        }
    }

    /// [`Settings::from_env`], with the AI block read from the JSON file at
    /// `AI_CONFIG_PATH` when that is set.
    pub fn load() -> anyhow::Result<Self> {
        let mut settings = Self::from_env();
        if let Some(path) = env_string("AI_CONFIG_PATH") {
            settings.ai = AiSettings::load_from_file(&path)
                .with_context(|| format!("load AI settings from {path}"))?;
        }
        Ok(settings)
    }
}

/// Trimmed env value; empty counts as unset.
pub(crate) fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_string(name)
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// `1/true/yes/on` or `0/false/no/off`; anything else is the default.
pub(crate) fn env_bool(name: &str, default: bool) -> bool {
    match env_string(name).map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

pub(crate) fn env_usize(name: &str, default: usize) -> usize {
    env_parse(name, default)
}

pub(crate) fn env_u32(name: &str, default: u32) -> u32 {
    env_parse(name, default)
}

pub(crate) fn env_u64(name: &str, default: u64) -> u64 {
    env_parse(name, default)
}

pub(crate) fn env_f32(name: &str, default: f32) -> f32 {
    env_parse(name, default)
}
