//! Durable job records.
//!
//! [`FileJobStore`] keeps one JSON file per job under the cache directory.
//! Saves go to a temp file in the same directory, are fsynced, then renamed
//! over the old record, so once `save` returns the snapshot survives a crash
//! and a reader never sees a half-written record.
//!
//! The store only holds snapshots. It never touches the workspace files a
//! job refers to.

use crate::error::ChunkmarkError;
use crate::job::Job;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Persistence of job records, keyed by job id.
pub trait JobStore: Send + Sync {
    /// Overwrite the stored snapshot of `job`.
    fn save(&self, job: &Job) -> Result<(), ChunkmarkError>;

    /// Load a job, or `None` if there is no record for `id`.
    fn load(&self, id: &str) -> Result<Option<Job>, ChunkmarkError>;

    /// Remove a record. Returns false if there was nothing to remove.
    fn delete(&self, id: &str) -> Result<bool, ChunkmarkError>;

    /// Every stored job.
    fn list_all(&self) -> Result<Vec<Job>, ChunkmarkError>;
}

/// Save `job`, retrying once if the first write hits a storage error.
pub fn save_with_retry(store: &dyn JobStore, job: &Job) -> Result<(), ChunkmarkError> {
    match store.save(job) {
        Err(e @ ChunkmarkError::Storage { .. }) => {
            warn!("Saving job {} failed ({}); retrying once", job.id, e);
            store.save(job)
        }
        other => other,
    }
}

/// JSON-file-per-job store.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ChunkmarkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| ChunkmarkError::storage(&dir, e))?;
        debug!("Job store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, ChunkmarkError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ChunkmarkError::InvalidInput {
                input: id.to_string(),
                reason: "job ids may only contain ASCII letters, digits, '-' and '_'".into(),
            });
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    fn read_record(path: &Path) -> Result<Option<Job>, ChunkmarkError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChunkmarkError::storage(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ChunkmarkError::StoreCorrupt {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
    }
}

impl JobStore for FileJobStore {
    fn save(&self, job: &Job) -> Result<(), ChunkmarkError> {
        let path = self.record_path(&job.id)?;
        let json = serde_json::to_vec_pretty(job)
            .map_err(|e| ChunkmarkError::Internal(format!("serialise job {}: {e}", job.id)))?;

        let mut tmp =
            NamedTempFile::new_in(&self.dir).map_err(|e| ChunkmarkError::storage(&self.dir, e))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| ChunkmarkError::storage(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| ChunkmarkError::storage(&path, e.error))?;

        debug!("Saved job {} ({})", job.id, job.state);
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<Job>, ChunkmarkError> {
        let path = self.record_path(id)?;
        Self::read_record(&path)
    }

    fn delete(&self, id: &str) -> Result<bool, ChunkmarkError> {
        let path = self.record_path(id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ChunkmarkError::storage(&path, e)),
        }
    }

    fn list_all(&self) -> Result<Vec<Job>, ChunkmarkError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| ChunkmarkError::storage(&self.dir, e))?;

        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ChunkmarkError::storage(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => warn!("Skipping job record: {}", e),
            }
        }
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }
}
