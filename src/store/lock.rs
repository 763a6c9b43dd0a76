//! Inter-process lock on the state directory.
//!
//! The ledger and log assume one writer per target. An exclusive `flock` on
//! `{state_dir}/engage.lock` keeps a second orchestrator process from running
//! against the same state at the same time. Released when dropped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub struct StateLock {
    path: PathBuf,
    _file: File,
}

impl StateLock {
    pub fn acquire(state_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join("engage.lock");

        let mut open_opts = OpenOptions::new();
        open_opts.create(true).read(true).write(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open_opts.mode(0o600);
        }
        let file = open_opts.open(&path)?;

        fs2::FileExt::try_lock_exclusive(&file).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                format!(
                    "state directory is locked by another process ({}): {e}",
                    path.display()
                ),
            )
        })?;

        tracing::debug!("Acquired state lock {}", path.display());
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_drop() {
        let temp = tempfile::tempdir().expect("tempdir");

        let first = StateLock::acquire(temp.path()).unwrap();
        assert!(first.path().ends_with("engage.lock"));

        let second = StateLock::acquire(temp.path());
        assert_eq!(
            second.err().map(|e| e.kind()),
            Some(std::io::ErrorKind::WouldBlock)
        );

        drop(first);
        assert!(StateLock::acquire(temp.path()).is_ok());
    }
}
