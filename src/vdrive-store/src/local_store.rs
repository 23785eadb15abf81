use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use vdrive_types::{DirectoryId, DriveError, DriveResult, Identity, VersionName};

use crate::{LocalStoreDB, ObjectStore};

const CONFIG_FILE_NAME: &str = "vdrive_store.json";
const DEFAULT_DB_FILE: &str = "store.db";
const BLOB_DIR_NAME: &str = "blobs";
const BLOB_FINAL_EXT: &str = "blob";
const BLOB_TMP_EXT: &str = "tmp";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    pub read_only: bool,
    pub db_path: Option<PathBuf>,
    pub blob_dir: Option<PathBuf>,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            db_path: None,
            blob_dir: None,
        }
    }
}

/// Disk-backed object store: blob payloads as content-named files under
/// `blobs/`, version chains and chunk reference counts in SQLite. A JSON
/// config file is dropped beside the DB on first open so a store directory
/// is self-describing.
pub struct LocalStore {
    base_dir: PathBuf,
    read_only: bool,
    db: Arc<LocalStoreDB>,
    blob_dir: PathBuf,
}

impl LocalStore {
    pub async fn open(root_path: PathBuf) -> DriveResult<Self> {
        if !root_path.exists() {
            debug!("LocalStore: create base dir: {}", root_path.display());
            fs::create_dir_all(&root_path)
                .await
                .map_err(|e| DriveError::IoError(format!("create base dir failed: {}", e)))?;
        }

        let config_file = root_path.join(CONFIG_FILE_NAME);
        let config = if !config_file.exists() {
            let config = LocalStoreConfig::default();
            let config_str = serde_json::to_string(&config)
                .map_err(|e| DriveError::IoError(e.to_string()))?;
            let mut file = File::create(&config_file)
                .await
                .map_err(|e| DriveError::IoError(format!("create config failed: {}", e)))?;
            file.write_all(config_str.as_bytes())
                .await
                .map_err(|e| DriveError::IoError(format!("write config failed: {}", e)))?;
            config
        } else {
            let config_str = fs::read_to_string(&config_file).await.map_err(|e| {
                warn!("LocalStore: read config failed! {}", e);
                DriveError::NotFound("store config not found".to_string())
            })?;
            serde_json::from_str::<LocalStoreConfig>(&config_str).map_err(|e| {
                warn!("LocalStore: parse config failed! {}", e);
                DriveError::ParsingError("store config invalid".to_string())
            })?
        };

        Self::from_config(root_path, config).await
    }

    pub async fn from_config(root_path: PathBuf, config: LocalStoreConfig) -> DriveResult<Self> {
        let db_path = config
            .db_path
            .clone()
            .unwrap_or_else(|| root_path.join(DEFAULT_DB_FILE));
        let blob_dir = config
            .blob_dir
            .clone()
            .unwrap_or_else(|| root_path.join(BLOB_DIR_NAME));

        if !config.read_only {
            fs::create_dir_all(&blob_dir)
                .await
                .map_err(|e| DriveError::IoError(format!("create blob dir failed: {}", e)))?;
        }

        let db = Arc::new(LocalStoreDB::new(db_path.to_string_lossy().to_string())?);

        Ok(Self {
            base_dir: root_path,
            read_only: config.read_only,
            db,
            blob_dir,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn blob_path(&self, key: &Identity) -> PathBuf {
        self.blob_dir
            .join(format!("{}.{}", key.to_hex(), BLOB_FINAL_EXT))
    }

    fn ensure_writable(&self) -> DriveResult<()> {
        if self.read_only {
            return Err(DriveError::InvalidState("store is read only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &Identity, bytes: &[u8]) -> DriveResult<()> {
        self.ensure_writable()?;
        let final_path = self.blob_path(key);
        if final_path.exists() {
            // Content-addressed: an existing blob with this name is this blob.
            return Ok(());
        }

        let tmp_path = self
            .blob_dir
            .join(format!("{}.{}", key.to_hex(), BLOB_TMP_EXT));
        let mut file = File::create(&tmp_path)
            .await
            .map_err(|e| DriveError::IoError(format!("create blob failed: {}", e)))?;
        file.write_all(bytes)
            .await
            .map_err(|e| DriveError::IoError(format!("write blob failed: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| DriveError::IoError(format!("sync blob failed: {}", e)))?;
        drop(file);

        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| DriveError::IoError(format!("finalise blob failed: {}", e)))?;
        Ok(())
    }

    async fn get(&self, key: &Identity) -> DriveResult<Vec<u8>> {
        let path = self.blob_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DriveError::NotFound(key.to_string()))
            }
            Err(e) => Err(DriveError::IoError(format!("read blob failed: {}", e))),
        }
    }

    async fn delete(&self, key: &Identity) -> DriveResult<()> {
        self.ensure_writable()?;
        let path = self.blob_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DriveError::IoError(format!("delete blob failed: {}", e))),
        }
    }

    async fn increment_references(&self, chunks: &[Identity]) -> DriveResult<()> {
        self.ensure_writable()?;
        self.db.increment_references(chunks)
    }

    async fn append_version(
        &self,
        directory_id: &DirectoryId,
        version: &VersionName,
        max_versions: u64,
    ) -> DriveResult<()> {
        self.ensure_writable()?;
        self.db.append_version(directory_id, version, max_versions)
    }

    async fn get_versions(&self, directory_id: &DirectoryId) -> DriveResult<Vec<VersionName>> {
        self.db.get_versions(directory_id)
    }

    async fn remove_versions(&self, directory_id: &DirectoryId) -> DriveResult<()> {
        self.ensure_writable()?;
        self.db.remove_versions(directory_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("store")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_open_writes_config() {
        let (tmp, store) = temp_store().await;
        assert!(tmp.path().join("store").join(CONFIG_FILE_NAME).exists());
        assert!(!store.read_only);
    }

    #[tokio::test]
    async fn test_blob_round_trip() {
        let (_tmp, store) = temp_store().await;
        let bytes = b"serialised directory".to_vec();
        let key = Identity::hash_of(&bytes);
        store.put(&key, &bytes).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), bytes);

        // Idempotent re-put of the same content.
        store.put(&key, &bytes).await.unwrap();

        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_version_chain_via_store_trait() {
        let (_tmp, store) = temp_store().await;
        let dir_id = Identity::random();
        for i in 0..4u64 {
            let v = VersionName::new(i, Identity::hash_of(&i.to_le_bytes()));
            store.append_version(&dir_id, &v, 2).await.unwrap();
        }
        let chain = store.get_versions(&dir_id).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].index, 3);

        store.remove_versions(&dir_id).await.unwrap();
        assert!(store.get_versions(&dir_id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let config = LocalStoreConfig {
            read_only: true,
            ..Default::default()
        };
        let root = dir.path().join("store");
        fs::create_dir_all(root.join(BLOB_DIR_NAME)).await.unwrap();
        let store = LocalStore::from_config(root, config).await.unwrap();
        let key = Identity::hash_of(b"x");
        assert!(store.put(&key, b"x").await.is_err());
    }
}
