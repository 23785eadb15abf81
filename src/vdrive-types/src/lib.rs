mod blob;
mod data_map;
mod id;
mod meta_data;
mod version;

pub use blob::*;
pub use data_map::*;
pub use id::*;
pub use meta_data::*;
pub use version::*;

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriveError {
    #[error("no such file: {0}")]
    NoSuchFile(String),
    #[error("file exists: {0}")]
    FileExists(String),
    #[error("uninitialised: {0}")]
    Uninitialised(String),
    #[error("parsing error: {0}")]
    ParsingError(String),
    #[error("store failed: {0}")]
    StoreFailed(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("db error: {0}")]
    DbError(String),
    #[error("store busy: {0}")]
    StoreBusy(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl DriveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriveError::NoSuchFile(_) | DriveError::NotFound(_))
    }

    /// Transient store failures are retried by the handler; everything else
    /// surfaces to the caller unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriveError::StoreBusy(_))
    }
}

pub type DriveResult<T> = std::result::Result<T, DriveError>;

impl From<std::io::Error> for DriveError {
    fn from(err: std::io::Error) -> Self {
        DriveError::IoError(err.to_string())
    }
}

/// Upper bound on the per-directory version chain. Appending beyond this
/// drops the oldest version.
pub const MAX_VERSIONS: usize = 100;

/// Coalescing window between the last mutation of a directory and its store.
pub const DIRECTORY_INACTIVITY_DELAY: Duration = Duration::from_secs(2);

/// Name of the single entry the root-parent directory carries.
pub const ROOT_DIR_NAME: &str = "Root";
