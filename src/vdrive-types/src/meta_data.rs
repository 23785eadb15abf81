use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{DataMap, DirectoryId, DriveError, DriveResult};

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    File,
    Directory,
}

/// Per-child record of a directory listing: the name, timestamps, size and
/// permissions of one entry, plus the child's directory id when the entry is
/// a subdirectory and its data map when it is a file with content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaData {
    name: String,
    kind: FileKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    directory_id: Option<DirectoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    data_map: Option<DataMap>,
    creation_time: u64,
    last_status_time: u64,
    last_write_time: u64,
    last_access_time: u64,
    size: u64,
    allocation_size: u64,
    permissions: u32,
}

impl MetaData {
    pub fn new_file(name: &str) -> DriveResult<Self> {
        Self::new(name, FileKind::File, None)
    }

    pub fn new_directory(name: &str, directory_id: DirectoryId) -> DriveResult<Self> {
        Self::new(name, FileKind::Directory, Some(directory_id))
    }

    fn new(name: &str, kind: FileKind, directory_id: Option<DirectoryId>) -> DriveResult<Self> {
        validate_component(name)?;
        let now = unix_timestamp();
        Ok(Self {
            name: name.to_string(),
            kind,
            directory_id,
            data_map: None,
            creation_time: now,
            last_status_time: now,
            last_write_time: now,
            last_access_time: now,
            size: 0,
            allocation_size: 0,
            permissions: match kind {
                FileKind::File => 0o644,
                FileKind::Directory => 0o755,
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, new_name: &str) -> DriveResult<()> {
        validate_component(new_name)?;
        self.name = new_name.to_string();
        Ok(())
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Non-empty exactly iff this child is a directory.
    pub fn directory_id(&self) -> Option<&DirectoryId> {
        self.directory_id.as_ref()
    }

    pub fn data_map(&self) -> Option<&DataMap> {
        self.data_map.as_ref()
    }

    pub fn set_data_map(&mut self, data_map: Option<DataMap>) {
        self.data_map = data_map;
    }

    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    pub fn last_status_time(&self) -> u64 {
        self.last_status_time
    }

    pub fn last_write_time(&self) -> u64 {
        self.last_write_time
    }

    pub fn last_access_time(&self) -> u64 {
        self.last_access_time
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn allocation_size(&self) -> u64 {
        self.allocation_size
    }

    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    pub fn set_permissions(&mut self, permissions: u32) {
        self.permissions = permissions;
        self.update_last_status_time();
    }

    /// Attributes changed: bump status and access times.
    pub fn update_last_status_time(&mut self) {
        let now = unix_timestamp();
        self.last_status_time = now;
        self.last_access_time = now;
    }

    /// Content changed: bump write, status and access times.
    pub fn update_last_modified_time(&mut self) {
        let now = unix_timestamp();
        self.last_write_time = now;
        self.last_status_time = now;
        self.last_access_time = now;
    }

    pub fn update_last_access_time(&mut self) {
        self.last_access_time = unix_timestamp();
    }

    /// New content size; allocation follows the size.
    pub fn update_size(&mut self, new_size: u64) {
        self.size = new_size;
        self.allocation_size = new_size;
        self.update_last_modified_time();
    }

    pub fn update_allocation_size(&mut self, new_size: u64) {
        self.allocation_size = new_size;
        self.update_last_modified_time();
    }
}

/// A child name is a single path component.
fn validate_component(name: &str) -> DriveResult<()> {
    if name.is_empty() {
        return Err(DriveError::InvalidParameter("empty name".to_string()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(DriveError::InvalidParameter(format!(
            "name is not a single path component: {}",
            name
        )));
    }
    Ok(())
}
