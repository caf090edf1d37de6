//! File system abstraction for testability.

use std::path::Path;

use async_trait::async_trait;

/// State of a destination file compared to its expected size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// File exists with the expected size — fully downloaded.
    Complete,
    /// File exists with a different size.
    SizeMismatch(u64),
    /// Nothing at the path.
    Missing,
}

/// Abstraction over file system operations for testability.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Reads a whole file.
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;

    /// Size of a file; `Ok(None)` only when it does not exist.
    async fn file_size(&self, path: &Path) -> std::io::Result<Option<u64>>;

    /// Creates all directories in the given path.
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Creates (or truncates) a file for writing.
    async fn create_file(&self, path: &Path) -> std::io::Result<tokio::fs::File>;

    /// Moves a file, copying across file systems when a rename is not
    /// possible.
    async fn move_file(&self, from: &Path, to: &Path) -> std::io::Result<()>;

    /// Removes a file.
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;

    /// Classifies `path` against `expected_size`. I/O failures other than
    /// "not found" are returned, not treated as missing.
    async fn file_status(&self, path: &Path, expected_size: u64) -> std::io::Result<FileStatus> {
        Ok(match self.file_size(path).await? {
            Some(size) if size == expected_size => FileStatus::Complete,
            Some(size) => FileStatus::SizeMismatch(size),
            None => FileStatus::Missing,
        })
    }
}

/// Default file system implementation using `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    /// Creates a new `TokioFileSystem` instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn file_size(&self, path: &Path) -> std::io::Result<Option<u64>> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn create_file(&self, path: &Path) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::create(path).await
    }

    async fn move_file(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        if from == to {
            return Ok(());
        }
        if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::rename(from, to).await.is_ok() {
            return Ok(());
        }
        // Different mount points: fall back to copy + remove.
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await
    }

    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}
