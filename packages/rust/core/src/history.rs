//! Dedup history and its persistence backends.
//!
//! A [`HistoryStore`] exposes the history as one read-modify-write
//! transaction: [`HistoryStore::begin`] takes exclusive access and reads,
//! [`HistoryStore::commit`] writes back and releases. Only the
//! Deduplicator drives this sequence.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use curator_shared::{CuratorError, Result};
use curator_storage::{SeenEntry, SeenKind, Storage};

/// How long `begin` waits for another run to release the history lock.
const LOCK_WAIT: Duration = Duration::from_secs(10);

/// A lock file older than this is left over from a crashed run.
const STALE_LOCK_AGE: Duration = Duration::from_secs(600);

const LOCK_POLL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Append-only record of seen identities and when they were first seen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    /// Normalized URL key → first seen.
    #[serde(default)]
    pub urls: BTreeMap<String, DateTime<Utc>>,
    /// Title fingerprint → first seen.
    #[serde(default)]
    pub titles: BTreeMap<String, DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Entries added since `begin`.
    #[serde(skip)]
    added: Vec<SeenEntry>,
}

impl History {
    pub fn contains(&self, kind: SeenKind, key: &str) -> bool {
        match kind {
            SeenKind::Url => self.urls.contains_key(key),
            SeenKind::Title => self.titles.contains_key(key),
        }
    }

    /// Record a sighting. An existing entry keeps its timestamp.
    ///
    /// Returns `true` if the key was new.
    pub fn record(&mut self, kind: SeenKind, key: &str, seen_at: DateTime<Utc>) -> bool {
        let map = match kind {
            SeenKind::Url => &mut self.urls,
            SeenKind::Title => &mut self.titles,
        };
        if map.contains_key(key) {
            return false;
        }
        map.insert(key.to_string(), seen_at);
        self.added.push(SeenEntry {
            kind,
            key: key.to_string(),
            first_seen: seen_at,
        });
        true
    }

    pub fn first_seen(&self, kind: SeenKind, key: &str) -> Option<DateTime<Utc>> {
        match kind {
            SeenKind::Url => self.urls.get(key).copied(),
            SeenKind::Title => self.titles.get(key).copied(),
        }
    }

    /// Entries recorded since this history was loaded.
    pub fn added(&self) -> &[SeenEntry] {
        &self.added
    }

    pub fn len(&self) -> usize {
        self.urls.len() + self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn from_entries(entries: Vec<SeenEntry>) -> Self {
        let mut history = Self::default();
        for entry in entries {
            let map = match entry.kind {
                SeenKind::Url => &mut history.urls,
                SeenKind::Title => &mut history.titles,
            };
            map.entry(entry.key).or_insert(entry.first_seen);
        }
        history.last_updated = history
            .urls
            .values()
            .chain(history.titles.values())
            .max()
            .copied();
        history
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistence boundary for the dedup history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Acquire exclusive access and read the current history.
    ///
    /// On a read error the store may still hold the lock; callers must
    /// follow up with [`commit`](Self::commit) or [`release`](Self::release).
    async fn begin(&self) -> Result<History>;

    /// Persist `history` and release exclusive access.
    async fn commit(&self, history: &History) -> Result<()>;

    /// Release exclusive access without writing.
    async fn release(&self);

    /// Read without taking the lock (for reporting).
    async fn snapshot(&self) -> Result<History>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// A held lock file, removed on drop.
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove history lock");
        }
    }
}

/// History in a single JSON file, guarded by a sibling `.lock` file.
///
/// Writes go to a temp file in the same directory and are renamed over the
/// target, so a crash mid-write never leaves a half-written history.
pub struct JsonHistoryStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_wait: Duration,
    held: Mutex<Option<LockFile>>,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "history.json".into());
        let lock_path = path.with_file_name(format!("{file_name}.lock"));
        Self {
            path,
            lock_path,
            lock_wait: LOCK_WAIT,
            held: Mutex::new(None),
        }
    }

    /// Override how long `begin` waits for the lock.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_held(&self) -> bool {
        self.held.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    fn set_held(&self, lock: Option<LockFile>) {
        if let Ok(mut guard) = self.held.lock() {
            *guard = lock;
        }
    }

    async fn acquire(&self) -> Result<LockFile> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CuratorError::io(parent, e))?;
        }

        let deadline = tokio::time::Instant::now() + self.lock_wait;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    debug!(path = %self.lock_path.display(), "history lock acquired");
                    return Ok(LockFile {
                        path: self.lock_path.clone(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Some(stale) = self.stale_lock() {
                        // Another run may have replaced the lock since it was judged.
                        if self.lock_identity().as_ref() == Some(&stale) {
                            warn!(path = %self.lock_path.display(), "removing stale history lock");
                            let _ = std::fs::remove_file(&self.lock_path);
                        }
                        continue;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(CuratorError::HistoryUnavailable(format!(
                            "history is locked by another run ({})",
                            self.lock_path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(e) => return Err(CuratorError::io(&self.lock_path, e)),
            }
        }
    }

    /// Modification time and contents (the holder's pid) of the lock file.
    fn lock_identity(&self) -> Option<(SystemTime, String)> {
        let modified = std::fs::metadata(&self.lock_path)
            .and_then(|m| m.modified())
            .ok()?;
        let holder = std::fs::read_to_string(&self.lock_path).ok()?;
        Some((modified, holder))
    }

    /// The lock's identity if it is older than [`STALE_LOCK_AGE`].
    fn stale_lock(&self) -> Option<(SystemTime, String)> {
        let identity = self.lock_identity()?;
        let age = SystemTime::now().duration_since(identity.0).ok()?;
        (age > STALE_LOCK_AGE).then_some(identity)
    }

    fn read(&self) -> Result<History> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no history file, starting empty");
            return Ok(History::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            CuratorError::HistoryUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            CuratorError::HistoryUnavailable(format!("{}: {e}", self.path.display()))
        })
    }

    fn write(&self, history: &History) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CuratorError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(history)
            .map_err(|e| CuratorError::HistoryUnavailable(e.to_string()))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "history.json".into());
        let temp = self.path.with_file_name(format!(".{file_name}.tmp"));

        let mut file = std::fs::File::create(&temp).map_err(|e| CuratorError::io(&temp, e))?;
        file.write_all(json.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| CuratorError::io(&temp, e))?;
        drop(file);
        std::fs::rename(&temp, &self.path).map_err(|e| CuratorError::io(&self.path, e))?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for JsonHistoryStore {
    async fn begin(&self) -> Result<History> {
        let lock = self.acquire().await?;
        self.set_held(Some(lock));
        self.read()
    }

    async fn commit(&self, history: &History) -> Result<()> {
        if !self.is_held() {
            return Err(CuratorError::HistoryUnavailable(
                "commit without holding the history lock".into(),
            ));
        }
        let result = self.write(history);
        self.set_held(None);
        result?;
        info!(
            path = %self.path.display(),
            entries = history.len(),
            added = history.added().len(),
            "history saved"
        );
        Ok(())
    }

    async fn release(&self) {
        self.set_held(None);
    }

    async fn snapshot(&self) -> Result<History> {
        self.read()
    }

    async fn clear(&self) -> Result<()> {
        let lock = self.acquire().await?;
        let result = self.write(&History::default());
        drop(lock);
        result
    }
}

// ---------------------------------------------------------------------------
// libSQL store
// ---------------------------------------------------------------------------

/// History in the `seen_items` table.
///
/// `begin` opens an `IMMEDIATE` transaction and reads inside it; the
/// transaction stays open until `commit` or `release`, so a concurrent run
/// waits at `begin` instead of reading a history that is about to change.
pub struct SqliteHistoryStore {
    storage: Arc<Storage>,
    lock_wait: Duration,
}

impl SqliteHistoryStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            lock_wait: LOCK_WAIT,
        }
    }

    /// Override how long `begin` waits for the database write lock.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn begin(&self) -> Result<History> {
        let deadline = tokio::time::Instant::now() + self.lock_wait;
        loop {
            match self.storage.begin_seen().await {
                Ok(Some(entries)) => {
                    debug!(entries = entries.len(), "history transaction open");
                    return Ok(History::from_entries(entries));
                }
                Ok(None) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(CuratorError::HistoryUnavailable(
                            "history database is locked by another run".into(),
                        ));
                    }
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(e) => return Err(CuratorError::HistoryUnavailable(e.to_string())),
            }
        }
    }

    async fn commit(&self, history: &History) -> Result<()> {
        let inserted = self.storage.append_seen(history.added()).await?;
        info!(inserted, "history saved");
        Ok(())
    }

    async fn release(&self) {
        self.storage.rollback_seen().await;
    }

    async fn snapshot(&self) -> Result<History> {
        let entries = self
            .storage
            .load_seen()
            .await
            .map_err(|e| CuratorError::HistoryUnavailable(e.to_string()))?;
        Ok(History::from_entries(entries))
    }

    async fn clear(&self) -> Result<()> {
        self.storage.clear_seen().await
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local history, for embedding and tests.
#[derive(Default)]
pub struct MemoryHistoryStore {
    history: tokio::sync::Mutex<History>,
    unreadable: std::sync::atomic::AtomicBool,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next reads fail as if the backing file were corrupt.
    pub fn set_unreadable(&self, unreadable: bool) {
        self.unreadable
            .store(unreadable, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_readable(&self) -> Result<()> {
        if self.unreadable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CuratorError::HistoryUnavailable("store marked unreadable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn begin(&self) -> Result<History> {
        self.check_readable()?;
        let mut history = self.history.lock().await.clone();
        history.added.clear();
        Ok(history)
    }

    async fn commit(&self, history: &History) -> Result<()> {
        let mut stored = self.history.lock().await;
        for entry in history.added() {
            stored.record(entry.kind, &entry.key, entry.first_seen);
        }
        stored.last_updated = history.last_updated;
        Ok(())
    }

    async fn release(&self) {}

    async fn snapshot(&self) -> Result<History> {
        self.check_readable()?;
        Ok(self.history.lock().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.history.lock().await = History::default();
        Ok(())
    }
}
