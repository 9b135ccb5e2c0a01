// src/dedup/store.rs
//! Backing stores for the processed-identity set.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::identity::EntryIdentity;
use crate::error::DedupError;

/// Two operations, read-after-write consistent within a run.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn contains(&self, id: &EntryIdentity) -> Result<bool, DedupError>;
    async fn insert(&self, id: &EntryIdentity) -> Result<(), DedupError>;
}

/// Process-local set. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    seen: Mutex<HashSet<EntryIdentity>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn contains(&self, id: &EntryIdentity) -> Result<bool, DedupError> {
        let seen = self
            .seen
            .lock()
            .map_err(|_| DedupError::Unavailable("memory store poisoned".into()))?;
        Ok(seen.contains(id))
    }

    async fn insert(&self, id: &EntryIdentity) -> Result<(), DedupError> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| DedupError::Unavailable("memory store poisoned".into()))?;
        seen.insert(id.clone());
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SeenRecord {
    id: EntryIdentity,
    seen_at: DateTime<Utc>,
}

/// Append-only JSONL file, loaded fully at open.
/// A torn last line (crash mid-write) is cut off at open; corruption elsewhere is an error.
pub struct FileDedupStore {
    path: PathBuf,
    seen: tokio::sync::Mutex<HashSet<EntryIdentity>>,
}

impl FileDedupStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DedupError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut seen = HashSet::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let lines: Vec<&str> = content.lines().collect();
                let last = lines.len().saturating_sub(1);
                let mut torn = false;
                for (i, line) in lines.iter().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<SeenRecord>(line) {
                        Ok(rec) => {
                            seen.insert(rec.id);
                        }
                        Err(e) if i == last && !content.ends_with('\n') => {
                            tracing::warn!(
                                target: "dedup",
                                path = %path.display(),
                                error = %e,
                                "dropping torn last record"
                            );
                            torn = true;
                        }
                        Err(e) => {
                            return Err(DedupError::Corrupt {
                                line: i + 1,
                                message: e.to_string(),
                            })
                        }
                    }
                }
                if !content.is_empty() && !content.ends_with('\n') {
                    repair_tail(&path, &content, torn).await?;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            target: "dedup",
            path = %path.display(),
            identities = seen.len(),
            "dedup store opened"
        );
        Ok(Self {
            path,
            seen: tokio::sync::Mutex::new(seen),
        })
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

/// Leave the file ending on a record boundary before the next append:
/// a torn record is cut off, an intact one gets its newline.
async fn repair_tail(path: &Path, content: &str, torn: bool) -> Result<(), DedupError> {
    let mut f = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    if torn {
        let keep = content.rfind('\n').map_or(0, |i| i + 1);
        f.set_len(keep as u64).await?;
    } else {
        f.seek(std::io::SeekFrom::End(0)).await?;
        f.write_all(b"\n").await?;
    }
    f.flush().await?;
    Ok(())
}

#[async_trait]
impl DedupStore for FileDedupStore {
    async fn contains(&self, id: &EntryIdentity) -> Result<bool, DedupError> {
        Ok(self.seen.lock().await.contains(id))
    }

    async fn insert(&self, id: &EntryIdentity) -> Result<(), DedupError> {
        // Hold the lock across the append so records never interleave.
        let mut seen = self.seen.lock().await;
        if seen.contains(id) {
            return Ok(());
        }
        let rec = SeenRecord {
            id: id.clone(),
            seen_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&rec)
            .map_err(|e| DedupError::Unavailable(e.to_string()))?;
        line.push('\n');

        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;

        seen.insert(id.clone());
        Ok(())
    }
}
