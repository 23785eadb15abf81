use std::sync::{Arc, Mutex, Weak};

use vdrive_types::{DataMap, DirectoryBlob, DirectoryId, DriveResult, Identity, MetaData};

use crate::{Directory, Path};

/// A directory child slot: the metadata of one entry plus, when the entry is
/// a file with content, the reference to its data map. Files are never
/// stored on their own: a change to a file is observed by its parent
/// directory, and that is what gets versioned.
#[derive(Debug)]
pub struct File {
    metadata: Mutex<MetaData>,
    parent: Mutex<Weak<Directory>>,
}

impl File {
    pub fn new(metadata: MetaData) -> Arc<Self> {
        Arc::new(Self {
            metadata: Mutex::new(metadata),
            parent: Mutex::new(Weak::new()),
        })
    }

    pub fn is_directory(&self) -> bool {
        self.metadata.lock().unwrap().is_directory()
    }

    /// The child's directory id; `Some` exactly iff this entry is a
    /// subdirectory.
    pub fn directory_id(&self) -> Option<DirectoryId> {
        self.metadata.lock().unwrap().directory_id().copied()
    }

    pub fn data_map(&self) -> Option<DataMap> {
        self.metadata.lock().unwrap().data_map().cloned()
    }

    /// Swap in the data map produced by the content engine after a close.
    pub fn set_data_map(&self, data_map: Option<DataMap>) {
        let mut meta = self.metadata.lock().unwrap();
        let size = data_map.as_ref().map(|m| m.content_size).unwrap_or(0);
        meta.set_data_map(data_map);
        meta.update_size(size);
    }

    pub fn set_name(&self, new_name: &str) -> DriveResult<()> {
        self.metadata.lock().unwrap().set_name(new_name)
    }

    pub fn update_last_modified_time(&self) {
        self.metadata.lock().unwrap().update_last_modified_time();
    }

    pub fn update_last_access_time(&self) {
        self.metadata.lock().unwrap().update_last_access_time();
    }

    pub fn update_size(&self, new_size: u64) {
        self.metadata.lock().unwrap().update_size(new_size);
    }

    /// A file is stored as part of its parent directory's listing.
    pub fn schedule_for_storing(&self) {
        if let Some(parent) = self.parent() {
            parent.schedule_for_storing();
        }
    }
}

impl Path for File {
    fn metadata(&self) -> MetaData {
        self.metadata.lock().unwrap().clone()
    }

    fn name(&self) -> String {
        self.metadata.lock().unwrap().name().to_string()
    }

    fn set_parent(&self, parent: Weak<Directory>) {
        *self.parent.lock().unwrap() = parent;
    }

    fn parent(&self) -> Option<Arc<Directory>> {
        self.parent.lock().unwrap().upgrade()
    }

    fn serialise_into(&self, blob: &mut DirectoryBlob, chunks: &mut Vec<Identity>) {
        let meta = self.metadata.lock().unwrap();
        if let Some(data_map) = meta.data_map() {
            chunks.extend(data_map.chunk_hashes().copied());
        }
        blob.children.push(meta.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdrive_types::ChunkRef;

    #[test]
    fn test_file_entry_has_no_directory_id() {
        let file = File::new(MetaData::new_file("a.txt").unwrap());
        assert!(!file.is_directory());
        assert!(file.directory_id().is_none());
        assert_eq!(file.name(), "a.txt");
    }

    #[test]
    fn test_set_data_map_updates_size() {
        let file = File::new(MetaData::new_file("a.txt").unwrap());
        let map = DataMap::new(
            2048,
            vec![ChunkRef {
                hash: Identity::hash_of(b"chunk"),
                size: 2048,
            }],
        );
        file.set_data_map(Some(map.clone()));
        assert_eq!(file.metadata().size(), 2048);
        assert_eq!(file.data_map(), Some(map));
    }

    #[test]
    fn test_serialise_into_collects_chunks() {
        let file = File::new(MetaData::new_file("a.txt").unwrap());
        let chunk_a = Identity::hash_of(b"a");
        let chunk_b = Identity::hash_of(b"b");
        file.set_data_map(Some(DataMap::new(
            100,
            vec![
                ChunkRef {
                    hash: chunk_a,
                    size: 60,
                },
                ChunkRef {
                    hash: chunk_b,
                    size: 40,
                },
            ],
        )));

        let mut blob = DirectoryBlob::new(Identity::random(), 100);
        let mut chunks = Vec::new();
        file.serialise_into(&mut blob, &mut chunks);
        assert_eq!(blob.children.len(), 1);
        assert_eq!(chunks, vec![chunk_a, chunk_b]);
    }

    #[test]
    fn test_parent_starts_unset() {
        let file = File::new(MetaData::new_file("a.txt").unwrap());
        assert!(file.parent().is_none());
        // No parent: scheduling is a no-op rather than a panic.
        file.schedule_for_storing();
    }
}
