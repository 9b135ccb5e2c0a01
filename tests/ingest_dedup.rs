// tests/ingest_dedup.rs
use std::sync::Arc;

use news_ingest::dedup::{
    normalize_url, DedupFilter, DedupScope, DedupStore, FileDedupStore, IdentityDeriver,
};
use news_ingest::error::DedupError;
use news_ingest::RawEntry;

fn entry(source_id: &str, external_id: Option<&str>, url: &str, title: &str) -> RawEntry {
    RawEntry {
        source_id: source_id.into(),
        category: "Tech".into(),
        external_id: external_id.map(str::to_string),
        url: url.into(),
        title: title.into(),
        published_at: None,
        raw_content: String::new(),
        fetch_seq: 0,
    }
}

#[test]
fn tracking_variants_share_an_identity() {
    let d = IdentityDeriver::new(DedupScope::PerSource, vec![]);
    let a = entry("Tech/a", None, "https://News.Example.test/story/?utm_source=x&id=7#top", "T");
    let b = entry("Tech/a", None, "https://news.example.test/story?id=7&fbclid=abc", "T");
    assert_eq!(d.identity(&a), d.identity(&b));
    assert_eq!(
        normalize_url("https://News.Example.test/story/?utm_source=x&id=7#top", &[]),
        "https://news.example.test/story?id=7"
    );
}

#[test]
fn scope_decides_whether_sources_share_identities() {
    let a = entry("Tech/a", Some("guid-1"), "https://x.test/1", "T");
    let b = entry("Tech/b", Some("guid-1"), "https://x.test/1", "T");

    let per_source = IdentityDeriver::new(DedupScope::PerSource, vec![]);
    assert_ne!(per_source.identity(&a), per_source.identity(&b));

    let global = IdentityDeriver::new(DedupScope::Global, vec![]);
    assert_eq!(global.identity(&a), global.identity(&b));
}

#[test]
fn external_id_beats_url_and_title() {
    let d = IdentityDeriver::new(DedupScope::PerSource, vec![]);
    let before = entry("Tech/a", Some("guid-9"), "https://x.test/old", "Old title");
    let after = entry("Tech/a", Some("guid-9"), "https://x.test/new", "New title");
    assert_eq!(d.identity(&before), d.identity(&after));

    let no_id = entry("Tech/a", None, "https://x.test/old", "Old title");
    assert_ne!(d.identity(&before), d.identity(&no_id));
}

#[tokio::test]
async fn marks_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("seen.jsonl");
    let d = IdentityDeriver::new(DedupScope::PerSource, vec![]);
    let e = entry("Tech/a", None, "https://x.test/1", "One");

    {
        let filter = DedupFilter::new(d.clone(), Arc::new(FileDedupStore::open(&path).await.unwrap()));
        let id = filter.identity(&e);
        assert!(filter.is_new(&id).await.unwrap());
        filter.mark_seen(&id).await.unwrap();
        filter.mark_seen(&id).await.unwrap();
    }

    let store = FileDedupStore::open(&path).await.unwrap();
    assert_eq!(store.len().await, 1);
    let filter = DedupFilter::new(d, Arc::new(store));
    assert!(!filter.is_new(&filter.identity(&e)).await.unwrap());
}

#[tokio::test]
async fn corrupt_store_is_reported_not_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.jsonl");
    std::fs::write(
        &path,
        "{\"id\":\"aaaa\",\"seen_at\":\"2025-06-10T04:00:00Z\"}\nnot json\n{\"id\":\"bbbb\",\"seen_at\":\"2025-06-10T04:00:00Z\"}\n",
    )
    .unwrap();
    let err = FileDedupStore::open(&path).await.err().expect("corrupt line");
    assert!(matches!(err, DedupError::Corrupt { line: 2, .. }), "{err}");
}

#[tokio::test]
async fn torn_last_line_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.jsonl");
    std::fs::write(
        &path,
        "{\"id\":\"aaaa\",\"seen_at\":\"2025-06-10T04:00:00Z\"}\n{\"id\":\"bb",
    )
    .unwrap();
    let store = FileDedupStore::open(&path).await.unwrap();
    assert_eq!(store.len().await, 1);
    let id = news_ingest::dedup::EntryIdentity::from_stored("aaaa");
    assert!(store.contains(&id).await.unwrap());
}
