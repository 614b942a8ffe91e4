//! JSON persistence for config entries under `.storage/`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::entry::ConfigEntry;

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 5;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported storage version for {key}: {found}")]
    UnsupportedVersion { key: String, found: u32 },
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct EntriesData {
    entries: Vec<ConfigEntry>,
}

/// Versioned envelope matching the `.storage/` file layout
#[derive(Debug, Serialize, Deserialize)]
struct StorageFile {
    version: u32,
    minor_version: u32,
    key: String,
    data: EntriesData,
}

/// Reads and writes `<config_dir>/.storage/core.config_entries`
///
/// Clones share one write lock, so saves never interleave on the temp file.
#[derive(Debug, Clone)]
pub struct EntryStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl EntryStore {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            path: config_dir.as_ref().join(".storage").join(STORAGE_KEY),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_file_name(format!("{}.tmp", STORAGE_KEY))
    }

    /// Load stored entries; a missing file yields no entries
    pub async fn load(&self) -> StorageResult<Vec<ConfigEntry>> {
        if !self.path.exists() {
            debug!(path = ?self.path, "No stored config entries");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let file: StorageFile = serde_json::from_str(&content)?;
        if file.version > STORAGE_VERSION {
            return Err(StorageError::UnsupportedVersion {
                key: file.key,
                found: file.version,
            });
        }

        debug!(
            "Loaded {} config entries (v{}.{})",
            file.data.entries.len(),
            file.version,
            file.minor_version
        );
        Ok(file.data.entries)
    }

    /// Write entries atomically (temp file, then rename)
    pub async fn save(&self, entries: Vec<ConfigEntry>) -> StorageResult<()> {
        self.save_with(move || entries).await
    }

    /// Like [`save`](Self::save), but takes the snapshot only once the write
    /// lock is held, so the last save always writes the latest entries.
    pub async fn save_with<F>(&self, snapshot: F) -> StorageResult<()>
    where
        F: FnOnce() -> Vec<ConfigEntry>,
    {
        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let entries = snapshot();
        let count = entries.len();
        let file = StorageFile {
            version: STORAGE_VERSION,
            minor_version: STORAGE_MINOR_VERSION,
            key: STORAGE_KEY.to_string(),
            data: EntriesData { entries },
        };
        let content = serde_json::to_string_pretty(&file)?;

        let temp_path = self.temp_path();
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!("Saved {} config entries", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = EntryStore::new(dir.path());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = EntryStore::new(dir.path());

        let entry = ConfigEntry::new("plugwise", "Smile Anna")
            .with_data_value("host", json!("192.168.1.10"))
            .with_unique_id("smile98765");
        store.save(vec![entry.clone()]).await.unwrap();

        assert!(dir.path().join(".storage").join(STORAGE_KEY).exists());
        assert!(!store.temp_path().exists());

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].entry_id, entry.entry_id);
        assert_eq!(loaded[0].unique_id.as_deref(), Some("smile98765"));
        assert_eq!(loaded[0].data_str("host"), Some("192.168.1.10"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = EntryStore::new(dir.path());

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    let entry = ConfigEntry::new("plugwise", format!("Smile {n}"));
                    store.save(vec![entry]).await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert!(!store.temp_path().exists());
        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let dir = TempDir::new().unwrap();
        let store = EntryStore::new(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            json!({
                "version": 9,
                "minor_version": 1,
                "key": STORAGE_KEY,
                "data": {"entries": []}
            })
            .to_string(),
        )
        .unwrap();

        assert!(matches!(
            store.load().await,
            Err(StorageError::UnsupportedVersion { found: 9, .. })
        ));
    }
}
