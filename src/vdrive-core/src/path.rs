use std::cmp::Ordering;
use std::sync::{Arc, Weak};

use vdrive_types::{DirectoryBlob, Identity, MetaData};

use crate::Directory;

/// Capability set shared by anything a directory slot can address: files and
/// directories both expose metadata, a weak parent back-reference and the
/// ability to serialise themselves into a parent's blob. The total order on
/// paths compares by name only.
pub trait Path: Send + Sync {
    fn metadata(&self) -> MetaData;

    fn name(&self) -> String;

    /// Called by the handler when this entry is added to, moved under, or
    /// deserialised into a parent directory.
    fn set_parent(&self, parent: Weak<Directory>);

    fn parent(&self) -> Option<Arc<Directory>>;

    /// Append this entry's metadata to `blob` and the chunk hashes its
    /// content references to `chunks`.
    fn serialise_into(&self, blob: &mut DirectoryBlob, chunks: &mut Vec<Identity>);
}

pub fn compare_by_name(lhs: &dyn Path, rhs: &dyn Path) -> Ordering {
    lhs.name().cmp(&rhs.name())
}
