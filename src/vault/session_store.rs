//! On-disk persistence for sealed session files.
//!
//! One file per target under `{state_dir}/sessions/`. Writes go through a
//! temp file and a rename so a crash mid-write never leaves a torn file.

use crate::util::{sanitize_filename, write_atomic};
use std::path::PathBuf;
use tokio::fs;

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, target_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.session.json", sanitize_filename(target_id)))
    }

    /// Read the stored bytes for a target. `Ok(None)` when nothing is stored.
    pub async fn load(&self, target_id: &str) -> std::io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(target_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn save(&self, target_id: &str, bytes: &[u8]) -> std::io::Result<()> {
        write_atomic(&self.path_for(target_id), bytes).await
    }

    /// Remove the stored file. Deleting a missing file is not an error.
    pub async fn delete(&self, target_id: &str) -> std::io::Result<()> {
        match fs::remove_file(self.path_for(target_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}
