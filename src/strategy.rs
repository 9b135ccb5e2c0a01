//! Category strategies: sources, prompt template, truncation limit, score threshold, cap.
//!
//! One TOML file per category (see `config/categories/`). The pipeline only
//! consumes the read-only [`StrategyResolver`] view; the loader below is one
//! way to build it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Legacy prefix marking a JSON API source in category files.
pub const JSON_PREFIX: &str = "JSON|";
pub const RSSHUB_PLACEHOLDER: &str = "{RSSHUB}";
pub const DEFAULT_RSSHUB_BASE_URL: &str = "http://127.0.0.1:1200";

const MIN_INPUT_CHARS: usize = 100;
const DEFAULT_INPUT_CHARS: usize = 2000;
const DEFAULT_MAX_ITEMS: usize = 10;
const DEFAULT_ORDER: i64 = 100;

/// Field mapping that adapts an arbitrary JSON endpoint to the common entry shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct JsonMapping {
    /// Dotted path to the array of items; empty means the document root.
    pub items: String,
    pub title: String,
    /// Candidate fields for the link; the first non-empty wins.
    pub url: Vec<String>,
    pub id: Option<String>,
    pub content: Option<String>,
    pub published: Option<String>,
    pub max_items: usize,
}

impl Default for JsonMapping {
    fn default() -> Self {
        Self {
            items: "data".to_string(),
            title: "title".to_string(),
            url: vec!["url".to_string(), "mobileUrl".to_string()],
            id: None,
            content: Some("hot".to_string()),
            published: None,
            max_items: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// RSS 2.0 or Atom document.
    Feed,
    Json(JsonMapping),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// `category/name`, unique across the corpus.
    pub source_id: String,
    pub url: String,
    pub kind: SourceKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    pub category: String,
    pub sources: Vec<SourceSpec>,
    pub prompt_template: String,
    pub max_input_chars: usize,
    /// Inclusive, 0..=100.
    pub score_threshold: u8,
    pub max_items: usize,
    /// Replace feed content with the text of the linked page before analysis.
    pub full_text: bool,
}

/// Read-only lookup of the per-category strategy.
pub trait StrategyResolver: Send + Sync {
    fn strategy(&self, category: &str) -> Result<StrategyConfig, ConfigError>;

    /// Category keys in processing order.
    fn categories(&self) -> Vec<String>;
}

/// In-memory resolver; also what the file loader produces.
#[derive(Debug, Clone, Default)]
pub struct StaticStrategies {
    order: Vec<String>,
    by_key: HashMap<String, StrategyConfig>,
}

impl StaticStrategies {
    pub fn new(strategies: Vec<StrategyConfig>) -> Result<Self, ConfigError> {
        let mut out = Self::default();
        for s in strategies {
            if out.by_key.contains_key(&s.category) {
                return Err(ConfigError::DuplicateCategory(s.category));
            }
            out.order.push(s.category.clone());
            out.by_key.insert(s.category.clone(), s);
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl StrategyResolver for StaticStrategies {
    fn strategy(&self, category: &str) -> Result<StrategyConfig, ConfigError> {
        self.by_key
            .get(category)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownCategory(category.to_string()))
    }

    fn categories(&self) -> Vec<String> {
        self.order.clone()
    }
}

/* ----------------------------
Category file schema (TOML)
---------------------------- */

#[derive(Debug, Deserialize)]
struct CategoryFile {
    category: CategorySection,
    #[serde(default)]
    rss: toml::Table,
    #[serde(default)]
    json: HashMap<String, JsonMapping>,
    ai: AiSection,
    #[serde(default)]
    report: ReportSection,
}

#[derive(Debug, Deserialize)]
struct CategorySection {
    key: String,
    order: Option<i64>,
    #[serde(default)]
    full_text: bool,
}

#[derive(Debug, Deserialize)]
struct AiSection {
    prompt: String,
    max_input_chars: Option<i64>,
    score_threshold: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReportSection {
    max_items: Option<i64>,
}

/// Load every `*.toml` in `dir` (skipping `_`-prefixed files), ordered by `(order, key)`.
pub fn load_categories_from_dir(
    dir: &Path,
    rsshub_base_url: &str,
) -> Result<StaticStrategies, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::MissingDir(dir.display().to_string()));
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("toml"))
        .filter(|p| {
            !p.file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|n| n.starts_with('_'))
        })
        .collect();
    paths.sort();

    let mut loaded = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs::read_to_string(&path)?;
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        loaded.push(parse_category(&content, &name, rsshub_base_url)?);
    }
    loaded.sort_by(|(oa, a), (ob, b)| oa.cmp(ob).then_with(|| a.category.cmp(&b.category)));

    let strategies = StaticStrategies::new(loaded.into_iter().map(|(_, s)| s).collect())?;
    tracing::info!(
        target: "strategy",
        dir = %dir.display(),
        categories = strategies.len(),
        "category strategies loaded"
    );
    Ok(strategies)
}

/// Parse one category file. Returns `(order, strategy)`.
pub fn parse_category(
    content: &str,
    file: &str,
    rsshub_base_url: &str,
) -> Result<(i64, StrategyConfig), ConfigError> {
    let invalid = |message: String| ConfigError::Invalid {
        file: file.to_string(),
        message,
    };

    let raw: CategoryFile = toml::from_str(content).map_err(|e| invalid(e.to_string()))?;

    let key = non_empty(&raw.category.key).ok_or_else(|| invalid("[category].key is empty".into()))?;
    let prompt =
        non_empty(&raw.ai.prompt).ok_or_else(|| invalid("[ai].prompt is empty".into()))?;

    let max_input_chars = match raw.ai.max_input_chars {
        None => DEFAULT_INPUT_CHARS,
        Some(v) if v >= MIN_INPUT_CHARS as i64 => v as usize,
        Some(v) => {
            return Err(invalid(format!(
                "[ai].max_input_chars must be >= {MIN_INPUT_CHARS}, got {v}"
            )))
        }
    };
    let score_threshold = match raw.ai.score_threshold {
        None => 0,
        Some(v) if (0..=100).contains(&v) => v as u8,
        Some(v) => {
            return Err(invalid(format!(
                "[ai].score_threshold must be within 0..=100, got {v}"
            )))
        }
    };
    let max_items = match raw.report.max_items {
        None => DEFAULT_MAX_ITEMS,
        Some(v) if v >= 1 => v as usize,
        Some(v) => return Err(invalid(format!("[report].max_items must be >= 1, got {v}"))),
    };

    let rsshub = rsshub_base_url.trim_end_matches('/');
    let mut sources = Vec::with_capacity(raw.rss.len());
    for (name, value) in &raw.rss {
        let name = non_empty(name).ok_or_else(|| invalid("[rss] has an empty source name".into()))?;
        let url = value
            .as_str()
            .and_then(non_empty)
            .ok_or_else(|| invalid(format!("[rss].{name} must be a non-empty string")))?;

        let (url, kind) = match url.strip_prefix(JSON_PREFIX) {
            Some(rest) => (
                rest.trim().to_string(),
                SourceKind::Json(raw.json.get(&name).cloned().unwrap_or_default()),
            ),
            None if raw.json.contains_key(&name) => {
                (url.clone(), SourceKind::Json(raw.json[&name].clone()))
            }
            None => (url.clone(), SourceKind::Feed),
        };

        sources.push(SourceSpec {
            source_id: format!("{key}/{name}"),
            url: url.replace(RSSHUB_PLACEHOLDER, rsshub),
            kind,
        });
    }

    let order = raw.category.order.unwrap_or(DEFAULT_ORDER);
    Ok((
        order,
        StrategyConfig {
            category: key,
            sources,
            prompt_template: prompt,
            max_input_chars,
            score_threshold,
            max_items,
            full_text: raw.category.full_text,
        },
    ))
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}
