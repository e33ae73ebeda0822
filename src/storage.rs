//! On-disk storage for uploads and analyzer output.
//!
//! Layout under the data directory:
//!
//! ```text
//! {data_dir}/uploads/{task_id}/{sanitized filename}
//! {data_dir}/results/{task_id}/...
//! ```
//!
//! Artifacts are held in memory on the task record, so both directories are
//! scratch space and can be removed as soon as a task is terminal.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::tasks::TaskId;

/// Fallback name for uploads whose filename sanitizes to nothing.
pub const DEFAULT_UPLOAD_NAME: &str = "upload.bin";

const MAX_FILENAME_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Make an uploaded filename safe to use as a single path component.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // No hidden files, no "." or ".." components.
    let trimmed = sanitized.trim().trim_matches('_').trim_start_matches('.');
    if trimmed.is_empty() {
        DEFAULT_UPLOAD_NAME.to_string()
    } else {
        trimmed.chars().take(MAX_FILENAME_CHARS).collect()
    }
}

/// Detect the MIME type from magic bytes.
pub fn sniff_mime_type(bytes: &[u8]) -> Option<String> {
    infer::get(bytes).map(|kind| kind.mime_type().to_string())
}

/// Per-task upload and result directories.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn upload_dir(&self, id: &TaskId) -> PathBuf {
        self.root.join("uploads").join(id.to_string())
    }

    pub fn result_dir(&self, id: &TaskId) -> PathBuf {
        self.root.join("results").join(id.to_string())
    }

    /// Write the uploaded bytes and return the stored file path.
    pub async fn save_upload(
        &self,
        id: &TaskId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.upload_dir(id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::Write {
                path: dir.clone(),
                source,
            })?;

        let path = dir.join(sanitize_filename(filename));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Remove both directories for a task. Missing directories are fine.
    pub async fn remove(&self, id: &TaskId) -> Result<(), StorageError> {
        for dir in [self.upload_dir(id), self.result_dir(id)] {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(StorageError::Remove { path: dir, source }),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename(".."), DEFAULT_UPLOAD_NAME);
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("a\nb.pdf"), "a_b.pdf");
        assert_eq!(sanitize_filename("   "), DEFAULT_UPLOAD_NAME);
        assert_eq!(sanitize_filename(""), DEFAULT_UPLOAD_NAME);
        assert_eq!(sanitize_filename(&"é".repeat(300)).chars().count(), 100);
    }

    #[test]
    fn test_sniff_mime_type() {
        assert_eq!(
            sniff_mime_type(b"%PDF-1.7\n%....").as_deref(),
            Some("application/pdf")
        );
        assert_eq!(sniff_mime_type(b"plain text"), None);
    }

    #[tokio::test]
    async fn test_save_and_remove() {
        let dir = tempdir().unwrap();
        let store = UploadStore::new(dir.path());
        let id = TaskId::new();

        let path = store.save_upload(&id, "doc.pdf", b"%PDF").await.unwrap();
        assert!(path.starts_with(store.upload_dir(&id)));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF");

        std::fs::create_dir_all(store.result_dir(&id)).unwrap();
        store.remove(&id).await.unwrap();
        assert!(!store.upload_dir(&id).exists());
        assert!(!store.result_dir(&id).exists());

        // Second removal is a no-op.
        store.remove(&id).await.unwrap();
    }
}
