//! Disk-backed artifact storage.
//!
//! Cache files mirror the request path under a configured root. Existence
//! of a file is the sole validity signal; there is no expiry timestamp or
//! content hash. Writes go through a temp file in the same directory plus
//! a rename so a concurrent reader never observes a partial artifact.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request path escapes the storage root: {path}")]
    Traversal { path: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// File system store rooted at a configured directory.
#[derive(Debug, Clone)]
pub struct PageStore {
    root: PathBuf,
}

impl PageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Backing location for a request path, derived deterministically.
    ///
    /// Rejects paths with `..` or rooted segments so an artifact can never
    /// land outside the storage root.
    pub fn artifact_path(&self, request_path: &str) -> Result<PathBuf, StoreError> {
        let relative = request_path.trim_start_matches('/');
        let candidate = Path::new(relative);
        let escapes = candidate.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        });
        if relative.is_empty() || escapes {
            return Err(StoreError::Traversal {
                path: request_path.to_string(),
            });
        }
        Ok(self.root.join(candidate))
    }

    /// Full bytes of an artifact, or `None` when no file exists.
    pub async fn read(&self, artifact: &Path) -> Result<Option<Bytes>, StoreError> {
        match tokio::fs::read(artifact).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Persist an artifact atomically, creating parent directories.
    pub async fn write_atomic(&self, artifact: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let parent = artifact.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(parent).await?;

        let file_name = artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let staging = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        tokio::fs::write(&staging, bytes).await?;
        match tokio::fs::rename(&staging, artifact).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = tokio::fs::remove_file(&staging).await;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_path_mirrors_request_path() {
        let store = PageStore::new("/var/cache/pages");
        let path = store.artifact_path("/post/hello-world.html").unwrap();
        assert_eq!(path, PathBuf::from("/var/cache/pages/post/hello-world.html"));
    }

    #[test]
    fn traversal_is_rejected() {
        let store = PageStore::new("/var/cache/pages");
        assert!(matches!(
            store.artifact_path("/post/../../etc/passwd"),
            Err(StoreError::Traversal { .. })
        ));
        assert!(matches!(
            store.artifact_path("/"),
            Err(StoreError::Traversal { .. })
        ));
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PageStore::new(dir.path());
        let artifact = store.artifact_path("/post/2024/hello.html").unwrap();

        assert!(store.read(&artifact).await.unwrap().is_none());

        let body = "<html>\n<body>ciao</body>\n</html>\n";
        store.write_atomic(&artifact, body.as_bytes()).await.unwrap();

        let bytes = store.read(&artifact).await.unwrap().expect("artifact exists");
        assert_eq!(bytes, Bytes::from(body));
    }

    #[tokio::test]
    async fn write_leaves_no_staging_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PageStore::new(dir.path());
        let artifact = store.artifact_path("/post/solo.html").unwrap();
        store.write_atomic(&artifact, b"fine").await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path().join("post")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["solo.html".to_string()]);
    }
}
