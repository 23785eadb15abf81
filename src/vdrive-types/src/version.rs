use serde::{Deserialize, Serialize};

use crate::Identity;

/// One persisted snapshot of a directory: a monotonically increasing index
/// paired with the content hash of the serialised directory bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionName {
    pub index: u64,
    pub content_hash: Identity,
}

impl VersionName {
    pub fn new(index: u64, content_hash: Identity) -> Self {
        Self {
            index,
            content_hash,
        }
    }
}
