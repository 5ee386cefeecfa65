// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Optional local archive of every generated event.
//!
//! Layout: `<dir>/<YYYY-MM-DD>/<stem>.json`, dated by `detected_at`. The
//! stem is the event id, or a digest of it when the id is not
//! filename-safe.
//! Because event ids are deterministic, re-archiving a republished event
//! overwrites the same file.
//!
//! The archive is a convenience copy for local inspection and replay. A
//! failed archive write is logged and never affects publication or commit.

use crate::event::{file_stem, ChangeEvent};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct EventArchive {
    dir: PathBuf,
}

impl EventArchive {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// File an event lands in.
    pub fn path_for(&self, event: &ChangeEvent) -> PathBuf {
        self.dir
            .join(event.detected_at.format("%Y-%m-%d").to_string())
            .join(format!("{}.json", file_stem(&event.event_id)))
    }

    /// Write the event. Returns false (after logging) on failure.
    pub async fn store(&self, event: &ChangeEvent) -> bool {
        let path = self.path_for(event);
        match self.try_store(&path, event).await {
            Ok(()) => {
                debug!(event_id = %event.event_id, path = %path.display(), "Event archived");
                true
            }
            Err(e) => {
                warn!(event_id = %event.event_id, path = %path.display(), error = %e, "Failed to archive event");
                false
            }
        }
    }

    async fn try_store(&self, path: &Path, event: &ChangeEvent) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(event)?;
        tokio::fs::write(path, bytes).await
    }
}
