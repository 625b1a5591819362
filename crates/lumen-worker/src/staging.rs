//! Per-job staging of downloaded bytes.
//!
//! A `StagedFile` deletes its file when dropped, so staged bytes are cleaned
//! up on every exit path of a job, including failures.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use lumen_core::error::LumenError;

/// Directory where jobs stage their downloads.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `bytes` to a fresh file named after `label`.
    pub async fn stage(&self, label: &str, bytes: &[u8]) -> Result<StagedFile, LumenError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let name = format!("{}-{}", sanitize(label), Uuid::new_v4());
        let path = self.dir.join(name);
        // Guard first so a partial write is removed too.
        let staged = StagedFile { path };
        tokio::fs::write(&staged.path, bytes).await?;

        debug!(path = %staged.path.display(), size = bytes.len(), "Staged download");
        Ok(staged)
    }
}

/// Keep ASCII alphanumerics, `-` and `_`; everything else becomes `_`.
fn sanitize(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned
    }
}

/// A staged file, removed on drop.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<Vec<u8>, LumenError> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed staged file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove staged file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stage_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path().join("tmp"));

        let staged = area.stage("p1", b"image bytes").await.unwrap();
        assert!(staged.path().starts_with(dir.path().join("tmp")));
        assert_eq!(staged.read().await.unwrap(), b"image bytes");
    }

    #[tokio::test]
    async fn test_staged_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());

        let staged = area.stage("p1", b"x").await.unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_same_label_gets_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());

        let a = area.stage("p1", b"a").await.unwrap();
        let b = area.stage("p1", b"b").await.unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("IMG_0001"), "IMG_0001");
        assert_eq!(sanitize("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize(""), "job");
    }
}
