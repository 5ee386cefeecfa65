// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! JSON file snapshot backend.
//!
//! # Atomic Commit
//!
//! ```text
//! serialize ──► carts_state.json.tmp ──fsync──► rename ──► carts_state.json
//!                                                  │
//!                                             fsync(dir)  (best effort)
//! ```
//!
//! `rename` within one directory is atomic on POSIX filesystems, so a reader
//! sees either the old file or the new one. A crash before the rename leaves
//! a stray `.tmp` file, which the next `load` discards.

use super::{Snapshot, SnapshotStore};
use crate::error::{BoxFuture, CdcError, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Snapshot stored as a single JSON file.
pub struct FileSnapshotStore {
    path: PathBuf,
    tmp_path: PathBuf,
    display: String,
}

impl FileSnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            display: path.display().to_string(),
            tmp_path: PathBuf::from(tmp),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_inner(&self) -> Result<Snapshot> {
        match tokio::fs::remove_file(&self.tmp_path).await {
            Ok(()) => warn!(
                path = %self.tmp_path.display(),
                "Discarded incomplete snapshot write from a previous run"
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CdcError::persistence(self.tmp_path.display().to_string(), e)),
        }

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.display, "No snapshot file, cold start");
                return Ok(Snapshot::new());
            }
            Err(e) => return Err(CdcError::persistence(&self.display, e)),
        };

        let snapshot = Snapshot::from_json_slice(&bytes, &self.display)?;
        info!(path = %self.display, entities = snapshot.len(), "Loaded snapshot");
        Ok(snapshot)
    }

    async fn commit_inner(&self, snapshot: &Snapshot) -> Result<()> {
        let bytes = snapshot.to_json_vec()?;
        let err = |e: std::io::Error| CdcError::persistence(&self.display, e);

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await.map_err(err)?;

        let mut file = tokio::fs::File::create(&self.tmp_path).await.map_err(err)?;
        file.write_all(&bytes).await.map_err(err)?;
        file.sync_all().await.map_err(err)?;
        drop(file);

        tokio::fs::rename(&self.tmp_path, &self.path).await.map_err(err)?;

        // The new snapshot is in place from here on. A failed directory sync
        // only weakens durability of the rename, so it must not fail the commit.
        if let Err(e) = sync_dir(parent).await {
            warn!(
                path = %self.display,
                dir = %parent.display(),
                error = %e,
                "Snapshot renamed but directory sync failed"
            );
        }

        debug!(path = %self.display, entities = snapshot.len(), bytes = bytes.len(), "Snapshot committed");
        Ok(())
    }
}

/// Flush directory metadata so a completed rename survives power loss.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> BoxFuture<'_, Snapshot> {
        Box::pin(self.load_inner())
    }

    fn commit<'a>(&'a self, snapshot: &'a Snapshot) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let result = self.commit_inner(snapshot).await;
            if result.is_err() {
                // Leave no half-written temp file behind.
                let _ = tokio::fs::remove_file(&self.tmp_path).await;
            }
            result
        })
    }

    fn location(&self) -> &str {
        &self.display
    }
}
