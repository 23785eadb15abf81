use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use vdrive_types::{DirectoryId, DriveError, DriveResult, Identity, VersionName};

use crate::ObjectStore;

/// In-memory store used by the test suites and by ephemeral mounts. Can be
/// told to fail the next N operations transiently to exercise retry paths.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<Identity, Vec<u8>>>,
    versions: Mutex<HashMap<DirectoryId, Vec<VersionName>>>,
    references: Mutex<HashMap<Identity, u64>>,
    inject_busy: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` operations with `StoreBusy`.
    pub fn inject_busy(&self, count: u32) {
        self.inject_busy.store(count, Ordering::SeqCst);
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn reference_count(&self, chunk: &Identity) -> u64 {
        self.references
            .lock()
            .unwrap()
            .get(chunk)
            .copied()
            .unwrap_or(0)
    }

    fn check_busy(&self) -> DriveResult<()> {
        let remaining = self.inject_busy.load(Ordering::SeqCst);
        if remaining > 0 {
            self.inject_busy.store(remaining - 1, Ordering::SeqCst);
            return Err(DriveError::StoreBusy("injected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &Identity, bytes: &[u8]) -> DriveResult<()> {
        self.check_busy()?;
        self.blobs.lock().unwrap().insert(*key, bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &Identity) -> DriveResult<Vec<u8>> {
        self.check_busy()?;
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| DriveError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &Identity) -> DriveResult<()> {
        self.check_busy()?;
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }

    async fn increment_references(&self, chunks: &[Identity]) -> DriveResult<()> {
        self.check_busy()?;
        let mut references = self.references.lock().unwrap();
        for chunk in chunks {
            *references.entry(*chunk).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn append_version(
        &self,
        directory_id: &DirectoryId,
        version: &VersionName,
        max_versions: u64,
    ) -> DriveResult<()> {
        self.check_busy()?;
        let mut versions = self.versions.lock().unwrap();
        let chain = versions.entry(*directory_id).or_default();
        chain.insert(0, *version);
        chain.truncate(max_versions as usize);
        Ok(())
    }

    async fn get_versions(&self, directory_id: &DirectoryId) -> DriveResult<Vec<VersionName>> {
        self.check_busy()?;
        self.versions
            .lock()
            .unwrap()
            .get(directory_id)
            .cloned()
            .ok_or_else(|| DriveError::NotFound(directory_id.to_string()))
    }

    async fn remove_versions(&self, directory_id: &DirectoryId) -> DriveResult<()> {
        self.check_busy()?;
        self.versions.lock().unwrap().remove(directory_id);
        Ok(())
    }
}
