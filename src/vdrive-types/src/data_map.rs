use serde::{Deserialize, Serialize};

use crate::Identity;

/// One immutable content-addressed block of a file's encrypted content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub hash: Identity,
    pub size: u64,
}

/// Index of the chunks that make up one file's content, produced and
/// consumed by the external self-encryption engine. Carried opaquely here;
/// the drive only needs the chunk hashes for reference counting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMap {
    pub content_size: u64,
    pub chunks: Vec<ChunkRef>,
}

impl DataMap {
    pub fn new(content_size: u64, chunks: Vec<ChunkRef>) -> Self {
        Self {
            content_size,
            chunks,
        }
    }

    pub fn chunk_hashes(&self) -> impl Iterator<Item = &Identity> {
        self.chunks.iter().map(|c| &c.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_hashes() {
        let chunks = vec![
            ChunkRef {
                hash: Identity::hash_of(b"a"),
                size: 1024,
            },
            ChunkRef {
                hash: Identity::hash_of(b"b"),
                size: 512,
            },
        ];
        let map = DataMap::new(1536, chunks.clone());
        let hashes: Vec<_> = map.chunk_hashes().cloned().collect();
        assert_eq!(hashes, vec![chunks[0].hash, chunks[1].hash]);
    }
}
