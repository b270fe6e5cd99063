//! Directory-backed persistent store
//!
//! One file per key. File names are the hex encoding of the key so any key
//! (including `:` and `/`) maps to a valid file name.

use super::store::{PersistentStore, StoreResult};
use crate::core::error::StoreError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FILE_SUFFIX: &str = ".entry";

/// Persistent store writing each key to its own file
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Create or open a store rooted at `directory`
    pub async fn open(directory: impl Into<PathBuf>) -> StoreResult<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await?;
        info!("Opened file store at {}", directory.display());
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory
            .join(format!("{}{}", hex::encode(key.as_bytes()), FILE_SUFFIX))
    }

    fn key_for(file_name: &str) -> Option<String> {
        let encoded = file_name.strip_suffix(FILE_SUFFIX)?;
        let bytes = hex::decode(encoded).ok()?;
        String::from_utf8(bytes).ok()
    }
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".to_string()));
        }

        // Write-then-rename keeps readers from observing a torn file; each
        // writer gets its own temp file
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("File store SET {} ({} bytes)", key, value.len());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;

        while let Some(entry) = entries.next_entry().await? {
            if let Some(key) = entry.file_name().to_str().and_then(Self::key_for) {
                keys.push(key);
            }
        }

        Ok(keys)
    }
}
