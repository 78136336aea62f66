//! Persisted FileRecords.
//!
//! State lives in two files next to each other:
//! - `<state>`: a JSON snapshot `{version, records}`, replaced atomically
//!   (temp file, fsync, rename).
//! - `<state>.log`: a JSONL journal with one `put`/`remove` entry per mutation.
//!
//! A mutation appends one line instead of rewriting the whole set. Once the
//! journal holds `compact_after` entries it is folded into a new snapshot and
//! truncated. Opening replays the journal over the snapshot. A torn last line
//! from a crash mid-append is dropped; the reconciliation scan repairs the
//! lost mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_common::paths::is_within;
use sync_common::{FileStat, Fingerprint, Modality};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::errors::{Result, SyncError};

const STATE_VERSION: u32 = 1;

/// Journal entries folded into the snapshot at once.
const DEFAULT_COMPACT_AFTER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Vector upserted for `fingerprint`.
    Indexed,
    /// Modality cannot be embedded; nothing in the index.
    Unsupported,
    /// The embedding service refused the payload; retried only when the content changes.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub modality: Modality,
    /// Last fingerprint the pipeline settled on.
    pub fingerprint: Fingerprint,
    pub stat: FileStat,
    pub status: RecordStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    records: Vec<FileRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Put { record: FileRecord },
    Remove { path: String },
}

/// Append handle of `<state>.log`, opened on first use.
struct Journal {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    entries: usize,
}

impl Journal {
    async fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)
            .map_err(|e| SyncError::Records(format!("serialize journal entry: {e}")))?;
        line.push(b'\n');

        let file = match self.file.take() {
            Some(file) => file,
            None => {
                ensure_parent(&self.path).await?;
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await
                    .map_err(|e| SyncError::io(self.path.display().to_string(), e))?
            }
        };
        let file = self.file.insert(file);
        file.write_all(&line)
            .await
            .map_err(|e| SyncError::io(self.path.display().to_string(), e))?;
        file.flush()
            .await
            .map_err(|e| SyncError::io(self.path.display().to_string(), e))?;
        self.entries += 1;
        Ok(())
    }

    /// Drops the journal after its entries reached the snapshot.
    async fn clear(&mut self) -> Result<()> {
        self.file = None;
        self.entries = 0;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(self.path.display().to_string(), e)),
        }
    }
}

pub struct RecordStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, FileRecord>>,
    /// Serializes mutations so the journal order matches the map. The map
    /// lock itself is never held across I/O.
    journal: Mutex<Journal>,
    compact_after: usize,
}

impl RecordStore {
    /// Loads the state, or starts empty when none exists yet.
    ///
    /// # Errors
    /// A present but unreadable or malformed snapshot or journal is an error:
    /// starting empty would orphan index entries of files deleted while offline.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(path, DEFAULT_COMPACT_AFTER).await
    }

    pub async fn open_with(path: impl Into<PathBuf>, compact_after: usize) -> Result<Self> {
        let path = path.into();
        let mut records = load_snapshot(&path).await?;
        let journal_path = journal_path(&path);
        let replayed = replay_journal(&journal_path, &mut records).await?;

        let store = Self {
            path,
            records: RwLock::new(records),
            journal: Mutex::new(Journal {
                path: journal_path,
                file: None,
                entries: replayed,
            }),
            compact_after: compact_after.max(1),
        };
        if replayed > 0 {
            let mut journal = store.journal.lock().await;
            store.compact(&mut journal).await?;
        }

        info!(
            target: "index_sync::records",
            path = %store.path.display(),
            records = store.len().await,
            replayed,
            "file records loaded"
        );
        Ok(store)
    }

    pub async fn get(&self, path: &str) -> Option<FileRecord> {
        self.records.read().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<FileRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Record paths equal to or under `prefix`.
    pub async fn paths_under(&self, prefix: &str) -> Vec<String> {
        self.records
            .read()
            .await
            .keys()
            .filter(|p| is_within(p, prefix))
            .cloned()
            .collect()
    }

    /// Inserts or replaces a record and journals it.
    pub async fn put(&self, record: FileRecord) -> Result<()> {
        let mut journal = self.journal.lock().await;
        self.records
            .write()
            .await
            .insert(record.path.clone(), record.clone());
        self.commit(&mut journal, JournalEntry::Put { record }).await
    }

    /// Drops a record and journals it. Returns the removed record.
    pub async fn remove(&self, path: &str) -> Result<Option<FileRecord>> {
        let mut journal = self.journal.lock().await;
        let removed = self.records.write().await.remove(path);
        if removed.is_some() {
            let entry = JournalEntry::Remove {
                path: path.to_string(),
            };
            self.commit(&mut journal, entry).await?;
        }
        Ok(removed)
    }

    async fn commit(&self, journal: &mut Journal, entry: JournalEntry) -> Result<()> {
        journal.append(&entry).await?;
        if journal.entries >= self.compact_after {
            self.compact(journal).await?;
        }
        Ok(())
    }

    /// Folds the journal into a fresh snapshot. Replaying a journal over a
    /// snapshot that already contains it is harmless, so a crash between the
    /// two steps loses nothing.
    async fn compact(&self, journal: &mut Journal) -> Result<()> {
        let state = StateFile {
            version: STATE_VERSION,
            records: self.snapshot().await,
        };
        let bytes = serde_json::to_vec_pretty(&state)
            .map_err(|e| SyncError::Records(format!("serialize: {e}")))?;

        write_atomic(&self.path, &bytes).await?;
        let folded = journal.entries;
        journal.clear().await?;
        debug!(
            target: "index_sync::records",
            records = state.records.len(),
            folded,
            "file records compacted"
        );
        Ok(())
    }
}

fn journal_path(state: &Path) -> PathBuf {
    let mut p = state.as_os_str().to_owned();
    p.push(".log");
    PathBuf::from(p)
}

async fn load_snapshot(path: &Path) -> Result<BTreeMap<String, FileRecord>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(SyncError::io(path.display().to_string(), e)),
    };
    let state: StateFile = serde_json::from_slice(&bytes)
        .map_err(|e| SyncError::Records(format!("malformed {}: {e}", path.display())))?;
    if state.version != STATE_VERSION {
        return Err(SyncError::Records(format!(
            "unsupported state version {} in {}",
            state.version,
            path.display()
        )));
    }
    Ok(state
        .records
        .into_iter()
        .map(|r| (r.path.clone(), r))
        .collect())
}

/// Applies journal entries in order. Returns how many were applied.
async fn replay_journal(path: &Path, records: &mut BTreeMap<String, FileRecord>) -> Result<usize> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(SyncError::io(path.display().to_string(), e)),
    };

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut applied = 0;
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(JournalEntry::Put { record }) => {
                records.insert(record.path.clone(), record);
            }
            Ok(JournalEntry::Remove { path }) => {
                records.remove(&path);
            }
            Err(e) if i + 1 == lines.len() => {
                warn!(
                    target: "index_sync::records",
                    journal = %path.display(),
                    error = %e,
                    "dropping torn journal tail"
                );
                break;
            }
            Err(e) => {
                return Err(SyncError::Records(format!(
                    "malformed {} entry {}: {e}",
                    path.display(),
                    i + 1
                )));
            }
        }
        applied += 1;
    }
    Ok(applied)
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io(parent.display().to_string(), e))?;
    }
    Ok(())
}

/// Temp file, fsync, rename: the snapshot is either the old or the new one.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path).await?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let tmp_err = |e| SyncError::io(tmp.display().to_string(), e);

    let mut file = tokio::fs::File::create(&tmp).await.map_err(tmp_err)?;
    file.write_all(bytes).await.map_err(tmp_err)?;
    file.sync_all().await.map_err(tmp_err)?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| SyncError::io(path.display().to_string(), e))?;
    Ok(())
}
