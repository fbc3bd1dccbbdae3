//! Backing store for the serialized configuration

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use types::ConfigLoadError;

/// Cheap change indicator compared before hashing contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageFingerprint {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl StorageFingerprint {
    /// Whether the modification time is older than `granularity`
    ///
    /// Two writes inside one granularity step can share an mtime, so a recent
    /// fingerprint says nothing about the contents.
    pub fn is_settled(&self, granularity: Duration) -> bool {
        self.modified
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .map(|age| age > granularity)
            .unwrap_or(false)
    }
}

/// Configuration storage interface
#[async_trait]
pub trait ConfigStorage: Send + Sync {
    /// Raw contents, `None` when nothing is stored yet
    async fn read(&self) -> Result<Option<Vec<u8>>, ConfigLoadError>;

    /// Replace the contents atomically
    async fn write(&self, contents: &[u8]) -> Result<(), ConfigLoadError>;

    /// Fingerprint of the current contents, `None` when absent
    async fn fingerprint(&self) -> Result<Option<StorageFingerprint>, ConfigLoadError>;

    /// Human-readable location used in logs and errors
    fn describe(&self) -> String;
}

/// Single JSON file on the local filesystem
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, err: std::io::Error) -> ConfigLoadError {
        ConfigLoadError::Io {
            path: self.describe(),
            message: err.to_string(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        self.path.with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
    }
}

#[async_trait]
impl ConfigStorage for FileStorage {
    async fn read(&self) -> Result<Option<Vec<u8>>, ConfigLoadError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.io_error(err)),
        }
    }

    async fn write(&self, contents: &[u8]) -> Result<(), ConfigLoadError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let temp = self.temp_path();
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&temp).await.map_err(|e| self.io_error(e))?;
        file.write_all(contents).await.map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(file);

        if let Err(err) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.io_error(err));
        }
        Ok(())
    }

    async fn fingerprint(&self) -> Result<Option<StorageFingerprint>, ConfigLoadError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(Some(StorageFingerprint {
                modified: meta.modified().ok(),
                len: meta.len(),
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("absent.json"));
        assert!(storage.read().await.unwrap().is_none());
        assert!(storage.fingerprint().await.unwrap().is_none());
    }

    #[test]
    fn test_fingerprint_settles_after_granularity() {
        let fresh = StorageFingerprint {
            modified: Some(SystemTime::now()),
            len: 10,
        };
        assert!(!fresh.is_settled(Duration::from_secs(2)));

        let old = StorageFingerprint {
            modified: Some(SystemTime::now() - Duration::from_secs(10)),
            len: 10,
        };
        assert!(old.is_settled(Duration::from_secs(2)));

        let unknown = StorageFingerprint { modified: None, len: 10 };
        assert!(!unknown.is_settled(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_write_replaces_contents_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("nested").join("audit.json"));

        storage.write(b"{\"a\":1}").await.unwrap();
        storage.write(b"{\"a\":2}").await.unwrap();

        assert_eq!(storage.read().await.unwrap().unwrap(), b"{\"a\":2}");
        assert_eq!(storage.fingerprint().await.unwrap().unwrap().len, 7);

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("nested")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("audit.json"));
        storage.write(b"{}").await.unwrap();

        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
