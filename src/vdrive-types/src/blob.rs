use serde::{Deserialize, Serialize};

use crate::{DirectoryId, DriveError, DriveResult, Identity, MetaData};

/// On-store representation of a directory: its identity, its version cap and
/// the metadata of every child in name order. The encoding is canonical
/// (struct fields serialise in declaration order, serde_json sorts map keys)
/// so equal directories produce byte-identical output and therefore the same
/// content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryBlob {
    pub directory_id: DirectoryId,
    pub max_versions: u64,
    pub children: Vec<MetaData>,
}

impl DirectoryBlob {
    pub fn new(directory_id: DirectoryId, max_versions: u64) -> Self {
        Self {
            directory_id,
            max_versions,
            children: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> DriveResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DriveError::ParsingError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> DriveResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| DriveError::ParsingError(e.to_string()))
    }

    /// Content hash of the canonical bytes; becomes the version name of the
    /// snapshot these bytes describe.
    pub fn content_hash(bytes: &[u8]) -> Identity {
        Identity::hash_of(bytes)
    }
}
