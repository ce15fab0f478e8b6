//! On-disk snapshot cache and archive
//!
//! Layout:
//! - `current_path`: the latest snapshot (JSON)
//! - `archive_dir/data_YYYYMMDD_HHMMSS.json`: superseded snapshots, pruned
//!   by the timestamp embedded in the file name
//!
//! The store is the only component that touches these files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use spt_common::time;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::DashboardSnapshot;

const ARCHIVE_PREFIX: &str = "data_";
const ARCHIVE_SUFFIX: &str = ".json";

/// Snapshot persistence failures
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Snapshot I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Whether a snapshot is due for replacement at `now`.
///
/// Stale when absent, when `last_updated` is missing or unparsable, or when
/// its age is at least `refresh_interval_hours`.
pub fn needs_refresh_at(
    snapshot: Option<&DashboardSnapshot>,
    refresh_interval_hours: u64,
    now: DateTime<Utc>,
) -> bool {
    let Some(last_updated) = snapshot
        .and_then(|s| s.last_updated.as_deref())
        .and_then(time::parse_timestamp)
    else {
        return true;
    };

    let interval = Duration::hours(refresh_interval_hours.min(u32::MAX as u64) as i64);
    now - last_updated >= interval
}

/// [`needs_refresh_at`] against the current clock
pub fn needs_refresh(snapshot: Option<&DashboardSnapshot>, refresh_interval_hours: u64) -> bool {
    needs_refresh_at(snapshot, refresh_interval_hours, time::now())
}

/// Archive file name for a capture time
pub fn archive_file_name(captured_at: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        ARCHIVE_PREFIX,
        time::file_stamp(captured_at),
        ARCHIVE_SUFFIX
    )
}

/// Capture time embedded in an archive file name
pub fn parse_archive_file_name(name: &str) -> Option<DateTime<Utc>> {
    name.strip_prefix(ARCHIVE_PREFIX)
        .and_then(|rest| rest.strip_suffix(ARCHIVE_SUFFIX))
        .and_then(time::parse_file_stamp)
}

/// Snapshot file store
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    current_path: PathBuf,
    archive_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(current_path: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            current_path: current_path.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Latest snapshot; `None` when missing or unreadable
    pub async fn load_current(&self) -> Option<DashboardSnapshot> {
        let contents = match tokio::fs::read(&self.current_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.current_path.display(), "No current snapshot");
                return None;
            }
            Err(e) => {
                warn!(path = %self.current_path.display(), error = %e, "Failed to read snapshot");
                return None;
            }
        };

        match serde_json::from_slice(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %self.current_path.display(), error = %e, "Discarding unparsable snapshot");
                None
            }
        }
    }

    /// Replace the current snapshot (temp file + rename)
    pub async fn save_current(&self, snapshot: &DashboardSnapshot) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.current_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::io(parent, e))?;
        }

        let tmp_path = self.current_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| PersistenceError::io(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &self.current_path)
            .await
            .map_err(|e| PersistenceError::io(&self.current_path, e))?;

        info!(path = %self.current_path.display(), bytes = json.len(), "Snapshot saved");
        Ok(())
    }

    /// Copy the current snapshot into the archive; `None` when there is none
    pub async fn archive_current(&self) -> Result<Option<PathBuf>, PersistenceError> {
        self.archive_current_at(time::now()).await
    }

    pub async fn archive_current_at(
        &self,
        captured_at: DateTime<Utc>,
    ) -> Result<Option<PathBuf>, PersistenceError> {
        match tokio::fs::try_exists(&self.current_path).await {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => return Err(PersistenceError::io(&self.current_path, e)),
        }

        tokio::fs::create_dir_all(&self.archive_dir)
            .await
            .map_err(|e| PersistenceError::io(&self.archive_dir, e))?;

        let target = self.archive_dir.join(archive_file_name(captured_at));
        tokio::fs::copy(&self.current_path, &target)
            .await
            .map_err(|e| PersistenceError::io(&target, e))?;

        info!(path = %target.display(), "Previous snapshot archived");
        Ok(Some(target))
    }

    /// Delete archives older than `retention_days`; returns the count removed
    pub async fn prune_archive(&self, retention_days: u64) -> Result<usize, PersistenceError> {
        self.prune_archive_at(retention_days, time::now()).await
    }

    pub async fn prune_archive_at(
        &self,
        retention_days: u64,
        now: DateTime<Utc>,
    ) -> Result<usize, PersistenceError> {
        let mut entries = match tokio::fs::read_dir(&self.archive_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PersistenceError::io(&self.archive_dir, e)),
        };

        let days = Duration::days(retention_days.min(u32::MAX as u64) as i64);
        let Some(cutoff) = now.checked_sub_signed(days) else {
            return Ok(0);
        };
        let mut removed = 0;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(&self.archive_dir, e))?
        {
            let name = entry.file_name();
            let Some(captured_at) = name.to_str().and_then(parse_archive_file_name) else {
                continue;
            };
            if captured_at >= cutoff {
                continue;
            }

            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Pruned archived snapshot");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to prune archive"),
            }
        }

        if removed > 0 {
            info!(removed, retention_days, "Archive pruned");
        }
        Ok(removed)
    }
}
