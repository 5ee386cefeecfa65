// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dead-letter area for events the bus would not take.
//!
//! # Record Format
//!
//! One JSON file per failed event, named
//! `<stem>_<YYYYmmdd_HHMMSS_micros>.json`, where the stem is the event id
//! when it is filename-safe and a digest of it otherwise (see
//! [`file_stem`]). The file is the full event
//! envelope with three extra top-level fields:
//!
//! ```json
//! {
//!   "event_id": "cart_7_9f2c0d1e4b5a6c7d",
//!   "event_type": "modified",
//!   "entity_id": "7",
//!   "ordering_key": "cart_7",
//!   "content_signature": "…",
//!   "payload": { "id": 7, "...": "..." },
//!   "detected_at": "2026-01-05T10:00:00Z",
//!   "schema_version": "1.0",
//!   "source": "fake-store-api",
//!   "run_id": "1a2b3c4d",
//!   "reason": "Bus error (XADD): connection refused",
//!   "failed_at": "2026-01-05T10:00:09.123456Z",
//!   "attempts": 4
//! }
//! ```
//!
//! Stripping `reason`, `failed_at` and `attempts` yields the exact envelope
//! that would have been published, so a recovery tool can re-send it as-is.
//! The event id is unchanged, and consumers deduplicate replays.

use crate::error::{BoxFuture, CdcError, Result};
use crate::event::{file_stem, ChangeEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// A failed event plus why and when it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    #[serde(flatten)]
    pub event: ChangeEvent,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    /// Send attempts made before giving up (0 if the circuit was open).
    pub attempts: usize,
}

impl DeadLetterRecord {
    pub fn new(event: ChangeEvent, reason: impl Into<String>, attempts: usize) -> Self {
        Self {
            event,
            reason: reason.into(),
            failed_at: Utc::now(),
            attempts,
        }
    }
}

/// Where dead-letter records are kept.
pub trait DeadLetterStore: Send + Sync + 'static {
    /// Persist one record durably. Returns its location.
    fn append<'a>(&'a self, record: &'a DeadLetterRecord) -> BoxFuture<'a, String>;

    /// Read back every stored record, oldest first.
    fn list(&self) -> BoxFuture<'_, Vec<DeadLetterRecord>>;
}

/// One JSON file per record in a directory.
pub struct FileDeadLetterStore {
    dir: PathBuf,
}

impl FileDeadLetterStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(record: &DeadLetterRecord) -> String {
        format!(
            "{}_{}.json",
            file_stem(&record.event.event_id),
            record.failed_at.format("%Y%m%d_%H%M%S_%6f")
        )
    }

    async fn write(&self, record: &DeadLetterRecord) -> Result<String> {
        let err = |e: &dyn std::fmt::Display| CdcError::DeadLetter {
            event_id: record.event.event_id.clone(),
            message: e.to_string(),
        };

        let bytes = serde_json::to_vec_pretty(record).map_err(|e| err(&e))?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| err(&e))?;

        let path = self.dir.join(Self::file_name(record));
        let tmp = path.with_extension("json.tmp");

        let mut file = tokio::fs::File::create(&tmp).await.map_err(|e| err(&e))?;
        file.write_all(&bytes).await.map_err(|e| err(&e))?;
        file.sync_all().await.map_err(|e| err(&e))?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await.map_err(|e| err(&e))?;

        debug!(event_id = %record.event.event_id, path = %path.display(), "Dead-letter record written");
        Ok(path.display().to_string())
    }

    async fn read_all(&self) -> Result<Vec<DeadLetterRecord>> {
        let location = self.dir.display().to_string();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CdcError::persistence(location, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CdcError::persistence(&location, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| CdcError::persistence(path.display().to_string(), e))?;
            match serde_json::from_slice::<DeadLetterRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable dead-letter file"),
            }
        }

        records.sort_by(|a, b| a.failed_at.cmp(&b.failed_at));
        Ok(records)
    }
}

impl DeadLetterStore for FileDeadLetterStore {
    fn append<'a>(&'a self, record: &'a DeadLetterRecord) -> BoxFuture<'a, String> {
        Box::pin(self.write(record))
    }

    fn list(&self) -> BoxFuture<'_, Vec<DeadLetterRecord>> {
        Box::pin(self.read_all())
    }
}
