use crate::error::{CaptureError, Result};
use crate::layout::container_log_path;
use crate::outcome::{LineOutcome, SkipReason};
use crate::types::ContainerKey;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{DirBuilder, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Open log files of a tail session, one per container, keyed by path.
///
/// Owned by the demultiplexing task for the whole session. Files are opened
/// lazily on their first line and stay open until [`close_all`](Self::close_all).
pub struct OpenFileRegistry {
    base_dir: PathBuf,
    files: HashMap<PathBuf, File>,
}

impl OpenFileRegistry {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            files: HashMap::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The open file for `path`, opening (and truncating) it on first use.
    async fn file_for(&mut self, path: PathBuf) -> Result<&mut File> {
        if !self.files.contains_key(&path) {
            let file = open_log_file(&path).await?;
            debug!("Opened log file {}", path.display());
            self.files.insert(path.clone(), file);
        }
        self.files
            .get_mut(&path)
            .ok_or_else(|| CaptureError::io(&path, std::io::ErrorKind::NotFound.into()))
    }

    /// Append `message` plus a newline to the container's file.
    pub async fn append(&mut self, key: &ContainerKey, message: &str) -> LineOutcome {
        let Some(path) = container_log_path(&self.base_dir, key) else {
            return LineOutcome::Skipped(SkipReason::NoTarget);
        };
        let file = match self.file_for(path).await {
            Ok(file) => file,
            Err(e) => return LineOutcome::Skipped(SkipReason::OpenFailed(e)),
        };
        let mut line = Vec::with_capacity(message.len() + 1);
        line.extend_from_slice(message.as_bytes());
        line.push(b'\n');
        match file.write_all(&line).await {
            Ok(()) => LineOutcome::Written,
            Err(e) => LineOutcome::Skipped(SkipReason::WriteFailed(e)),
        }
    }

    /// Flush and close every file. Returns how many were closed.
    pub async fn close_all(mut self) -> usize {
        let mut closed = 0;
        for (path, mut file) in self.files.drain() {
            if let Err(e) = file.flush().await {
                warn!("Error while flushing {}: {}", path.display(), e);
            }
            if let Err(e) = file.sync_all().await {
                warn!("Error while syncing {}: {}", path.display(), e);
            }
            closed += 1;
        }
        closed
    }
}

async fn open_log_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder
            .create(dir)
            .await
            .map_err(|e| CaptureError::io(dir, e))?;
    }
    let mut options = OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    options.mode(0o600);
    options
        .open(path)
        .await
        .map_err(|e| CaptureError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ns: &str, pod: &str, container: &str) -> ContainerKey {
        ContainerKey {
            namespace: ns.to_string(),
            pod_name: pod.to_string(),
            container_name: container.to_string(),
        }
    }

    #[tokio::test]
    async fn test_one_handle_per_container() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = OpenFileRegistry::new(dir.path());

        for (container, message) in [("postgres", "one"), ("postgres", "two"), ("bootstrap", "init")] {
            let outcome = registry.append(&key("ns", "pg-1", container), message).await;
            assert!(matches!(outcome, LineOutcome::Written));
        }
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.close_all().await, 2);
        let content = std::fs::read_to_string(dir.path().join("ns/pg-1/postgres.log")).unwrap();
        assert_eq!(content, "one\ntwo\n");
        let content = std::fs::read_to_string(dir.path().join("ns/pg-1/bootstrap.log")).unwrap();
        assert_eq!(content, "init\n");
    }

    #[tokio::test]
    async fn test_unsafe_key_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = OpenFileRegistry::new(dir.path());
        let outcome = registry.append(&key("..", "pod", "c"), "x").await;
        assert!(matches!(outcome, LineOutcome::Skipped(SkipReason::NoTarget)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_existing_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ns/pod/c.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale\n").unwrap();

        let mut registry = OpenFileRegistry::new(dir.path());
        registry.append(&key("ns", "pod", "c"), "fresh").await;
        registry.close_all().await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // a regular file where the namespace directory should be
        std::fs::write(dir.path().join("ns"), "").unwrap();
        let mut registry = OpenFileRegistry::new(dir.path());
        let outcome = registry.append(&key("ns", "pod", "c"), "x").await;
        assert!(matches!(
            outcome,
            LineOutcome::Skipped(SkipReason::OpenFailed(CaptureError::Io { .. }))
        ));
        assert!(registry.is_empty());
    }
}
