// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite snapshot backend.
//!
//! Stores one row per entity. A commit replaces every row inside a single
//! transaction, so WAL mode gives the same all-or-nothing guarantee as the
//! file backend's rename.
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended (e.g. an operator inspecting it with the sqlite3 shell). We
//! retry with exponential backoff before surfacing the error.
//!
//! ```text
//! snapshot_entries
//! ┌───────────┬───────────────────┬──────────────┬────────────┐
//! │ entity_id │ content_signature │ payload (JSON)│ updated_at │
//! └───────────┴───────────────────┴──────────────┴────────────┘
//! ```

use super::{Snapshot, SnapshotEntry, SnapshotStore};
use crate::entity::{ContentSignature, EntityId};
use crate::error::{BoxFuture, CdcError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Map an open-time error. A file that exists but is not a SQLite database
/// is corrupt state, not a generic database failure.
fn open_error(path: &str, e: sqlx::Error) -> CdcError {
    if is_not_a_database_error(&e) {
        return CdcError::corrupt(path, e);
    }
    CdcError::Sqlite(e)
}

fn is_not_a_database_error(e: &sqlx::Error) -> bool {
    match e {
        // SQLITE_NOTADB = 26
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("26")
                || db_err.message().to_lowercase().contains("file is not a database")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "SQLite operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::snapshot_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Snapshot stored in an embedded SQLite database.
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, "Opening SQLite snapshot store");

        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CdcError::persistence(&path_str, e))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path_str))
            .map_err(|e| CdcError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1) // single writer
            .connect_with(options)
            .await
            .map_err(|e| open_error(&path_str, e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_entries (
                entity_id TEXT PRIMARY KEY,
                content_signature TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| open_error(&path_str, e))?;

        Ok(Self { pool, path: path_str })
    }

    async fn load_inner(&self) -> Result<Snapshot> {
        let pool = &self.pool;
        let rows: Vec<(String, String, String)> = execute_with_retry("snapshot_load", || async {
            sqlx::query_as("SELECT entity_id, content_signature, payload FROM snapshot_entries")
                .fetch_all(pool)
                .await
        })
        .await?;

        let mut snapshot = Snapshot::new();
        for (entity_id, signature, payload) in rows {
            let payload = serde_json::from_str(&payload).map_err(|e| {
                CdcError::corrupt(&self.path, format!("entity {}: {}", entity_id, e))
            })?;
            snapshot.insert(
                EntityId::new(entity_id),
                SnapshotEntry {
                    content_signature: ContentSignature::from_hex(signature),
                    payload,
                },
            );
        }

        if snapshot.is_empty() {
            info!(path = %self.path, "Snapshot table empty, cold start");
        } else {
            info!(path = %self.path, entities = snapshot.len(), "Loaded snapshot");
        }
        Ok(snapshot)
    }

    async fn commit_inner(&self, snapshot: &Snapshot) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let rows: Vec<(String, String, String)> = snapshot
            .iter()
            .map(|(id, entry)| {
                (
                    id.as_str().to_string(),
                    entry.content_signature.as_str().to_string(),
                    entry.payload.to_string(),
                )
            })
            .collect();

        let pool = &self.pool;
        let rows = &rows;
        execute_with_retry("snapshot_commit", || async move {
            let mut tx = pool.begin().await?;
            sqlx::query("DELETE FROM snapshot_entries").execute(&mut *tx).await?;
            for (id, signature, payload) in rows {
                sqlx::query(
                    "INSERT INTO snapshot_entries (entity_id, content_signature, payload, updated_at) VALUES (?, ?, ?, ?)",
                )
                .bind(id)
                .bind(signature)
                .bind(payload)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await
        })
        .await
        .map_err(|e| CdcError::persistence(&self.path, e))?;

        debug!(path = %self.path, entities = rows.len(), "Snapshot committed");
        Ok(())
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn load(&self) -> BoxFuture<'_, Snapshot> {
        Box::pin(self.load_inner())
    }

    fn commit<'a>(&'a self, snapshot: &'a Snapshot) -> BoxFuture<'a, ()> {
        Box::pin(self.commit_inner(snapshot))
    }

    fn location(&self) -> &str {
        &self.path
    }

    /// Checkpoint the WAL and close the pool.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let pool = &self.pool;
            if let Err(e) = execute_with_retry("snapshot_checkpoint", || async {
                sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await
            })
            .await
            {
                warn!(error = %e, "Failed to checkpoint WAL on close");
            }
            self.pool.close().await;
            info!(path = %self.path, "Snapshot store closed");
            Ok(())
        })
    }
}
