// src/dedup/identity.rs
//! Dedup keys: feed guid when present, otherwise a hash of (source, normalized url, title).
//! Optionally a second key over the article text catches reposts under a new link.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::DedupScope;
use crate::ingest::types::RawEntry;

/// Query parameters that only decorate a link.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "yclid", "igshid", "mc_cid", "mc_eid", "spm", "scm",
    "ref", "ref_src", "share_source", "share_medium", "_hsenc", "_hsmi",
];

/// Stable dedup key. Hex of a SHA-256 prefix, so raw ids and urls never reach logs or disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryIdentity(String);

impl EntryIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a stored key as-is.
    pub fn from_stored(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for EntryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn is_tracking_param(key: &str, extra: &[String]) -> bool {
    let k = key.to_ascii_lowercase();
    k.starts_with("utm_")
        || TRACKING_PARAMS.contains(&k.as_str())
        || extra.iter().any(|e| *e == k)
}

/// Canonical form of a link: lowercase scheme/host, no fragment, no tracking
/// parameters, no trailing slash. Unparsable input is only trimmed.
pub fn normalize_url(raw: &str, extra_strip: &[String]) -> String {
    let raw = raw.trim();
    let Ok(mut u) = url::Url::parse(raw) else {
        return raw.trim_end_matches('/').to_string();
    };
    u.set_fragment(None);

    let kept: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k, extra_strip))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        u.set_query(None);
    } else {
        u.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = u.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        u.set_path(path.trim_end_matches('/'));
    }

    let mut s = u.to_string();
    if u.query().is_none() && s.ends_with('/') {
        s.pop();
    }
    s
}

/// Shorter texts are too generic ("Read more", "Comments") to key on.
pub const MIN_CONTENT_KEY_CHARS: usize = 50;

/// Derives [`EntryIdentity`] values for one dedup scope.
#[derive(Debug, Clone)]
pub struct IdentityDeriver {
    scope: DedupScope,
    extra_strip: Vec<String>,
    content_keys: bool,
}

impl IdentityDeriver {
    pub fn new(scope: DedupScope, extra_strip: Vec<String>) -> Self {
        Self {
            scope,
            extra_strip,
            content_keys: false,
        }
    }

    /// Also derive a content key for each entry (see [`Self::content_key`]).
    pub fn with_content_keys(mut self, on: bool) -> Self {
        self.content_keys = on;
        self
    }

    pub fn scope(&self) -> DedupScope {
        self.scope
    }

    pub fn identity(&self, e: &RawEntry) -> EntryIdentity {
        // Global scope drops the source from the key so the same story from
        // two feeds collapses.
        let ns = match self.scope {
            DedupScope::PerSource => e.source_id.as_str(),
            DedupScope::Global => "",
        };
        match e.external_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => EntryIdentity(digest(&["id", ns, id])),
            _ => {
                let url = normalize_url(&e.url, &self.extra_strip);
                EntryIdentity(digest(&["h", ns, &url, e.title.trim()]))
            }
        }
    }

    /// Key over the normalized article text, shared by every source regardless
    /// of scope. `None` when content keys are off or the text is too short.
    pub fn content_key(&self, e: &RawEntry) -> Option<EntryIdentity> {
        let text = e.raw_content.trim();
        if !self.content_keys || text.chars().count() < MIN_CONTENT_KEY_CHARS {
            return None;
        }
        Some(EntryIdentity(digest(&["c", text])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, id: Option<&str>, url: &str, title: &str) -> RawEntry {
        RawEntry {
            source_id: source.into(),
            category: "Tech".into(),
            external_id: id.map(Into::into),
            url: url.into(),
            title: title.into(),
            published_at: None,
            raw_content: String::new(),
            fetch_seq: 0,
        }
    }

    #[test]
    fn strips_tracking_fragment_and_trailing_slash() {
        let a = normalize_url(
            "https://Example.TEST/post/?utm_source=rss&id=7&fbclid=x#comments",
            &[],
        );
        assert_eq!(a, "https://example.test/post?id=7");
        assert_eq!(normalize_url("https://example.test/", &[]), "https://example.test");
        assert_eq!(
            normalize_url("https://example.test/a?from=feed", &["from".into()]),
            "https://example.test/a"
        );
    }

    #[test]
    fn external_id_wins_over_content_drift() {
        let d = IdentityDeriver::new(DedupScope::PerSource, vec![]);
        let a = entry("Tech/hn", Some("guid-1"), "https://x.test/a", "Title");
        let b = entry("Tech/hn", Some("guid-1"), "https://x.test/a-edited", "Title (updated)");
        assert_eq!(d.identity(&a), d.identity(&b));
    }

    #[test]
    fn decorated_urls_share_identity() {
        let d = IdentityDeriver::new(DedupScope::PerSource, vec![]);
        let a = entry("Tech/hn", None, "https://x.test/a/", "Title");
        let b = entry("Tech/hn", None, "https://x.test/a?utm_medium=feed", "Title");
        assert_eq!(d.identity(&a), d.identity(&b));
    }

    #[test]
    fn scope_decides_whether_sources_collide() {
        let a = entry("Tech/hn", Some("g"), "https://x.test/a", "T");
        let b = entry("Tech/lobsters", Some("g"), "https://x.test/a", "T");

        let per_source = IdentityDeriver::new(DedupScope::PerSource, vec![]);
        assert_ne!(per_source.identity(&a), per_source.identity(&b));

        let global = IdentityDeriver::new(DedupScope::Global, vec![]);
        assert_eq!(global.identity(&a), global.identity(&b));
    }

    #[test]
    fn content_key_ignores_link_and_source() {
        let body = "A long enough article body that two aggregators copied word for word.";
        let mut a = entry("Tech/hn", None, "https://x.test/a", "T");
        let mut b = entry("Tech/lobsters", None, "https://mirror.test/b", "Other");
        a.raw_content = body.into();
        b.raw_content = body.into();

        let off = IdentityDeriver::new(DedupScope::PerSource, vec![]);
        assert!(off.content_key(&a).is_none());

        let on = off.with_content_keys(true);
        assert_eq!(on.content_key(&a), on.content_key(&b));
        assert_ne!(on.content_key(&a), Some(on.identity(&a)));

        b.raw_content = "Read more".into();
        assert!(on.content_key(&b).is_none());
    }

    #[test]
    fn blank_guid_falls_back_to_hash() {
        let d = IdentityDeriver::new(DedupScope::PerSource, vec![]);
        let a = entry("Tech/hn", Some("  "), "https://x.test/a", "T");
        let b = entry("Tech/hn", None, "https://x.test/a", "T");
        assert_eq!(d.identity(&a), d.identity(&b));
        assert_eq!(d.identity(&a).as_str().len(), 32);
    }
}
