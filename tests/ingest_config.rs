// tests/ingest_config.rs
use std::fs;
use std::path::Path;

use news_ingest::config::{AiSettings, Settings};
use news_ingest::error::ConfigError;
use news_ingest::strategy::{load_categories_from_dir, SourceKind, StrategyResolver};

fn write(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).unwrap();
}

const MINIMAL: &str = r#"
[category]
key = "{key}"
order = {order}

[rss]
main = "https://feeds.example.test/{key}.xml"

[ai]
prompt = "Rate it."
"#;

fn minimal(key: &str, order: i64) -> String {
    MINIMAL
        .replace("{key}", key)
        .replace("{order}", &order.to_string())
}

#[test]
fn shipped_categories_load() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/categories");
    let s = load_categories_from_dir(&dir, "http://rsshub.test").unwrap();

    assert_eq!(
        s.categories(),
        vec!["HotNews_CN", "NetTech_Hardcore", "AI_ML_Research"],
        "ordered by `order`, template skipped"
    );
    let hot = s.strategy("HotNews_CN").unwrap();
    assert!(hot
        .sources
        .iter()
        .all(|src| matches!(src.kind, SourceKind::Json(_))));
    assert_eq!(hot.score_threshold, 50);
    assert_eq!(hot.max_items, 15);
}

#[test]
fn order_then_key_and_defaults() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "b.toml", &minimal("Beta", 5));
    write(dir.path(), "a.toml", &minimal("Alpha", 5));
    write(dir.path(), "first.toml", &minimal("Zulu", 1));
    write(dir.path(), "_draft.toml", &minimal("Draft", 0));
    write(dir.path(), "notes.txt", "ignored");

    let s = load_categories_from_dir(dir.path(), "http://rsshub.test").unwrap();
    assert_eq!(s.categories(), vec!["Zulu", "Alpha", "Beta"]);

    let alpha = s.strategy("Alpha").unwrap();
    assert_eq!(alpha.score_threshold, 0);
    assert_eq!(alpha.max_items, 10);
    assert_eq!(alpha.max_input_chars, 2000);
    assert_eq!(alpha.sources[0].source_id, "Alpha/main");

    assert!(matches!(
        s.strategy("Draft"),
        Err(ConfigError::UnknownCategory(_))
    ));
}

#[test]
fn duplicate_keys_and_bad_values_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.toml", &minimal("Same", 1));
    write(dir.path(), "b.toml", &minimal("Same", 2));
    assert!(matches!(
        load_categories_from_dir(dir.path(), ""),
        Err(ConfigError::DuplicateCategory(k)) if k == "Same"
    ));

    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "bad.toml",
        &format!("{}score_threshold = 101\n", minimal("Bad", 1)),
    );
    match load_categories_from_dir(dir.path(), "") {
        Err(ConfigError::Invalid { file, message }) => {
            assert_eq!(file, "bad.toml");
            assert!(message.contains("score_threshold"), "{message}");
        }
        other => panic!("expected invalid config, got {other:?}"),
    }
}

#[test]
fn missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_categories_from_dir(&dir.path().join("nope"), ""),
        Err(ConfigError::MissingDir(_))
    ));
}

#[serial_test::serial]
#[test]
fn settings_from_env_with_fallbacks() {
    std::env::set_var("CATEGORIES_DIR", "/etc/news-ingest/categories");
    std::env::set_var("FETCH_MAX_AGE_HOURS", "0");
    std::env::set_var("AI_URL", "http://llm.local/v1/ ");
    std::env::set_var("AI_MAX_RETRIES", "0");
    std::env::remove_var("METRICS_TEXTFILE_PATH");

    let s = Settings::from_env();
    assert_eq!(s.categories_dir, Path::new("/etc/news-ingest/categories"));
    assert!(s.fetch.max_age.is_none(), "0 disables the age cutoff");
    assert_eq!(s.ai.base_url, "http://llm.local/v1");
    assert_eq!(s.ai.max_retries, 1, "at least one attempt");
    assert!(s.metrics_textfile.is_none());

    for k in ["CATEGORIES_DIR", "FETCH_MAX_AGE_HOURS", "AI_URL", "AI_MAX_RETRIES"] {
        std::env::remove_var(k);
    }
}

#[serial_test::serial]
#[test]
fn ai_settings_file_resolves_env_key() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("ai.json");
    fs::write(&p, r#"{"api_key": "ENV", "model": "local-model", "max_workers": 0}"#).unwrap();

    std::env::set_var("AI_API_KEY", "sk-test");
    let cfg = AiSettings::load_from_file(&p).unwrap();
    std::env::remove_var("AI_API_KEY");

    assert_eq!(cfg.api_key, "sk-test");
    assert_eq!(cfg.model, "local-model");
    assert_eq!(cfg.max_workers, 1);
    assert!(cfg.has_credentials());
}
