//! libSQL storage layer (local file mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding the SQL-backed
//! dedup history, the deep-scoring cache, and the pipeline run log.
//!
//! **Access rules:**
//! - History updates are one read-modify-write transaction on a dedicated
//!   connection: [`Storage::begin_seen`] takes the database write lock with
//!   `BEGIN IMMEDIATE` and reads, [`Storage::append_seen`] inserts and
//!   commits, [`Storage::rollback_seen`] abandons. A second run blocks at
//!   `begin_seen` until the first one finishes.
//! - `curator history show` opens the file via [`Storage::open_readonly`].

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use curator_shared::{CuratorError, Result};
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Which identity a history row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeenKind {
    /// Normalized URL key.
    Url,
    /// Title fingerprint.
    Title,
}

impl SeenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Title => "title",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "url" => Ok(Self::Url),
            "title" => Ok(Self::Title),
            other => Err(CuratorError::Storage(format!("unknown seen kind '{other}'"))),
        }
    }
}

/// A single dedup history row.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenEntry {
    pub kind: SeenKind,
    pub key: String,
    pub first_seen: DateTime<Utc>,
}

/// A logged pipeline run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stats_json: Option<String>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
    /// Connection holding the open history transaction, if any.
    seen_tx: Mutex<Option<Connection>>,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> CuratorError {
    CuratorError::Storage(e.to_string())
}

fn is_busy(e: &libsql::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("database is locked") || msg.contains("busy")
}

async fn read_seen(conn: &Connection) -> Result<Vec<SeenEntry>> {
    let mut rows = conn
        .query(
            "SELECT kind, key, first_seen FROM seen_items ORDER BY first_seen, key",
            params![],
        )
        .await
        .map_err(storage_err)?;

    let mut entries = Vec::new();
    while let Some(row) = rows.next().await.map_err(storage_err)? {
        let kind: String = row.get(0).map_err(storage_err)?;
        let key: String = row.get(1).map_err(storage_err)?;
        let first_seen: String = row.get(2).map_err(storage_err)?;
        let first_seen = DateTime::parse_from_rfc3339(&first_seen)
            .map_err(|e| CuratorError::Storage(format!("bad first_seen '{first_seen}': {e}")))?
            .with_timezone(&Utc);
        entries.push(SeenEntry {
            kind: SeenKind::parse(&kind)?,
            key,
            first_seen,
        });
    }
    Ok(entries)
}

async fn rollback(conn: &Connection) {
    if let Err(e) = conn.execute_batch("ROLLBACK").await {
        tracing::debug!(error = %e, "history rollback failed");
    }
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CuratorError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            seen_tx: Mutex::new(None),
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            seen_tx: Mutex::new(None),
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CuratorError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(CuratorError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Dedup history
    // -----------------------------------------------------------------------

    /// Load every history row without taking the write lock.
    pub async fn load_seen(&self) -> Result<Vec<SeenEntry>> {
        read_seen(&self.conn).await
    }

    /// Open the history transaction and read every row inside it.
    ///
    /// Returns `Ok(None)` when another connection holds the write lock. If
    /// the read fails the transaction stays open; follow up with
    /// [`append_seen`](Self::append_seen) or [`rollback_seen`](Self::rollback_seen).
    pub async fn begin_seen(&self) -> Result<Option<Vec<SeenEntry>>> {
        self.check_writable()?;
        let mut slot = self.seen_tx.lock().await;
        if slot.is_some() {
            return Err(CuratorError::Storage(
                "history transaction already open".into(),
            ));
        }

        let conn = self.db.connect().map_err(storage_err)?;
        match conn.execute_batch("BEGIN IMMEDIATE").await {
            Ok(_) => {}
            Err(e) if is_busy(&e) => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        }
        let entries = read_seen(&conn).await;
        *slot = Some(conn);
        entries.map(Some)
    }

    /// Insert history rows and commit the open transaction.
    ///
    /// Existing keys keep their original `first_seen`. Returns the number of
    /// rows actually inserted. Any failure rolls the transaction back.
    pub async fn append_seen(&self, entries: &[SeenEntry]) -> Result<usize> {
        let Some(conn) = self.seen_tx.lock().await.take() else {
            return Err(CuratorError::Storage(
                "no open history transaction".into(),
            ));
        };

        let mut inserted = 0;
        for entry in entries {
            let first_seen = entry.first_seen.to_rfc3339();
            let result = conn
                .execute(
                    "INSERT OR IGNORE INTO seen_items (kind, key, first_seen) VALUES (?1, ?2, ?3)",
                    params![entry.kind.as_str(), entry.key.as_str(), first_seen.as_str()],
                )
                .await;
            match result {
                Ok(n) => inserted += n as usize,
                Err(e) => {
                    rollback(&conn).await;
                    return Err(storage_err(e));
                }
            }
        }

        if let Err(e) = conn.execute_batch("COMMIT").await {
            rollback(&conn).await;
            return Err(storage_err(e));
        }

        tracing::debug!(inserted, offered = entries.len(), "history rows recorded");
        Ok(inserted)
    }

    /// Abandon the open history transaction, if any.
    pub async fn rollback_seen(&self) {
        if let Some(conn) = self.seen_tx.lock().await.take() {
            rollback(&conn).await;
        }
    }

    /// Delete every history row.
    pub async fn clear_seen(&self) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM seen_items", params![])
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Score cache
    // -----------------------------------------------------------------------

    /// Get a cached scoring result.
    pub async fn get_score_cache(&self, prompt_hash: &str, model_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM score_cache WHERE prompt_hash = ?1 AND model_id = ?2",
                params![prompt_hash, model_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let result: String = row.get(0).map_err(storage_err)?;
                Ok(Some(result))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Store a scoring result in the cache (upserts).
    pub async fn set_score_cache(
        &self,
        prompt_hash: &str,
        model_id: &str,
        result_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO score_cache (id, prompt_hash, model_id, result_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(prompt_hash, model_id) DO UPDATE SET
                   result_json = excluded.result_json,
                   created_at = excluded.created_at",
                params![id.as_str(), prompt_hash, model_id, result_json, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run log
    // -----------------------------------------------------------------------

    /// Record the start of a pipeline run.
    pub async fn insert_run(&self, run_id: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, started_at) VALUES (?1, ?2)",
                params![run_id, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark a run finished with its stats.
    pub async fn finish_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, stats_json FROM runs
                 ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            runs.push(RunRecord {
                id: row.get(0).map_err(storage_err)?,
                started_at: row.get(1).map_err(storage_err)?,
                finished_at: row.get::<Option<String>>(2).map_err(storage_err)?,
                stats_json: row.get::<Option<String>>(3).map_err(storage_err)?,
            });
        }
        Ok(runs)
    }
}
