use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Persistent key-value storage boundary used by [`super::CacheStore`].
///
/// Every method may fail; the cache layer treats any failure as a miss or
/// a no-op, never as a fatal error. Implementations must be safe for
/// concurrent use.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    async fn get_all_keys(&self) -> Result<Vec<String>, StorageError>;

    /// Remove a set of keys. Default implementation falls back to
    /// sequential removes; a missing key is not an error.
    async fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.remove_item(key).await?;
        }
        Ok(())
    }
}

mod memory {
    use dashmap::DashMap;

    use super::{async_trait, KeyValueStorage, StorageError};

    /// In-memory storage for tests and embeddings that do not need
    /// persistence across restarts.
    pub struct MemoryStorage {
        data: DashMap<String, String>,
    }

    impl MemoryStorage {
        #[must_use]
        pub fn new() -> Self {
            Self {
                data: DashMap::new(),
            }
        }

        /// Get current item count
        #[must_use]
        pub fn len(&self) -> usize {
            self.data.len()
        }

        /// Check if empty
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.data.is_empty()
        }
    }

    impl Default for MemoryStorage {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl KeyValueStorage for MemoryStorage {
        async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            Ok(self.data.get(key).map(|r| r.value().clone()))
        }

        async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.data.insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            self.data.remove(key);
            Ok(())
        }

        async fn get_all_keys(&self) -> Result<Vec<String>, StorageError> {
            Ok(self.data.iter().map(|r| r.key().clone()).collect())
        }
    }
}

mod file {
    use std::path::{Path, PathBuf};

    use tracing::debug;

    use super::{async_trait, KeyValueStorage, StorageError};

    /// File-backed storage: one file per key under a directory.
    ///
    /// Keys are hex-encoded into file names so arbitrary key characters
    /// (":" namespaces, unicode station names) stay filesystem-safe.
    pub struct FileStorage {
        dir: PathBuf,
    }

    impl FileStorage {
        /// Open (creating if needed) a storage directory.
        pub async fn new(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
            let dir = dir.as_ref().to_path_buf();
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
            debug!(dir = %dir.display(), "file storage opened");
            Ok(Self { dir })
        }

        fn path_for(&self, key: &str) -> PathBuf {
            self.dir.join(format!("{}.json", hex::encode(key.as_bytes())))
        }

        fn key_from_file_name(name: &str) -> Option<String> {
            let encoded = name.strip_suffix(".json")?;
            let bytes = hex::decode(encoded).ok()?;
            String::from_utf8(bytes).ok()
        }
    }

    #[async_trait]
    impl KeyValueStorage for FileStorage {
        async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            match tokio::fs::read_to_string(self.path_for(key)).await {
                Ok(raw) => Ok(Some(raw)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(StorageError::Io(e.to_string())),
            }
        }

        async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            tokio::fs::write(self.path_for(key), value)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))
        }

        async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            match tokio::fs::remove_file(self.path_for(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StorageError::Io(e.to_string())),
            }
        }

        async fn get_all_keys(&self) -> Result<Vec<String>, StorageError> {
            let mut entries = tokio::fs::read_dir(&self.dir)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
            let mut keys = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(key) = Self::key_from_file_name(name) {
                        keys.push(key);
                    }
                }
            }
            Ok(keys)
        }
    }
}

pub use file::FileStorage;
pub use memory::MemoryStorage;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_set_and_get() {
        let storage = MemoryStorage::new();

        storage.set_item("k1", "v1").await.unwrap();

        assert_eq!(storage.get_item("k1").await.unwrap(), Some("v1".to_string()));
        assert_eq!(storage.get_item("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_overwrite() {
        let storage = MemoryStorage::new();

        storage.set_item("k1", "v1").await.unwrap();
        storage.set_item("k1", "v2").await.unwrap();

        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get_item("k1").await.unwrap(), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn test_memory_remove_nonexistent_is_ok() {
        let storage = MemoryStorage::new();
        assert!(storage.remove_item("missing").await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_multi_remove() {
        let storage = MemoryStorage::new();

        for i in 0..5 {
            storage.set_item(&format!("k{}", i), "v").await.unwrap();
        }

        storage
            .multi_remove(&["k0".to_string(), "k2".to_string(), "k4".to_string()])
            .await
            .unwrap();

        let mut keys = storage.get_all_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k1".to_string(), "k3".to_string()]);
    }

    #[tokio::test]
    async fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();

        storage
            .set_item("@transit-cache:realtime:강남", r#"{"a":1}"#)
            .await
            .unwrap();

        assert_eq!(
            storage
                .get_item("@transit-cache:realtime:강남")
                .await
                .unwrap(),
            Some(r#"{"a":1}"#.to_string())
        );

        let keys = storage.get_all_keys().await.unwrap();
        assert_eq!(keys, vec!["@transit-cache:realtime:강남".to_string()]);
    }

    #[tokio::test]
    async fn test_file_storage_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();

        storage.set_item("k", "v").await.unwrap();
        storage.remove_item("k").await.unwrap();

        assert_eq!(storage.get_item("k").await.unwrap(), None);
        // Removing again is a no-op, not an error
        assert!(storage.remove_item("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_file_storage_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("not-hex.json"), "junk")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("README.txt"), "junk")
            .await
            .unwrap();

        let storage = FileStorage::new(dir.path()).await.unwrap();
        storage.set_item("real-key", "v").await.unwrap();

        let keys = storage.get_all_keys().await.unwrap();
        assert_eq!(keys, vec!["real-key".to_string()]);
    }
}
