use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use vdrive_types::{DirectoryId, DriveError, DriveResult, Identity, VersionName};

/// Backing key-value store for serialised directories, file chunks and
/// per-directory version chains. Blobs are keyed by content hash; the
/// version chain of a directory is one structured record keyed by its
/// directory id. Implementations may fail transiently (`StoreBusy`), in
/// which case callers retry through [`with_retry`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &Identity, bytes: &[u8]) -> DriveResult<()>;

    async fn get(&self, key: &Identity) -> DriveResult<Vec<u8>>;

    async fn delete(&self, key: &Identity) -> DriveResult<()>;

    /// Bump the reference count of each chunk, creating the counter at 1 for
    /// chunks not seen before. Applied transactionally with respect to a
    /// directory's version commit.
    async fn increment_references(&self, chunks: &[Identity]) -> DriveResult<()>;

    /// Append `version` to the directory's chain, pruning the oldest entries
    /// beyond `max_versions`. Creates the chain if it does not exist.
    async fn append_version(
        &self,
        directory_id: &DirectoryId,
        version: &VersionName,
        max_versions: u64,
    ) -> DriveResult<()>;

    /// The directory's version chain, newest first.
    async fn get_versions(&self, directory_id: &DirectoryId) -> DriveResult<Vec<VersionName>>;

    /// Drop the directory's entire version chain (directory deletion).
    async fn remove_versions(&self, directory_id: &DirectoryId) -> DriveResult<()>;
}

/// Bounded retry of transient store errors. Not-found passes through so
/// callers keep their lookup semantics; any other permanent failure, or an
/// exhausted retry budget, surfaces as `StoreFailed`.
pub async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> DriveResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = DriveResult<T>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut backoff = Duration::from_millis(100);
    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                warn!(
                    "store {} transient failure (attempt {}/{}): {}",
                    what, attempt, MAX_ATTEMPTS, e
                );
                last_err = Some(e);
                if attempt != MAX_ATTEMPTS {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
            Err(e) if e.is_not_found() => return Err(e),
            Err(DriveError::StoreFailed(msg)) => return Err(DriveError::StoreFailed(msg)),
            Err(e) => return Err(DriveError::StoreFailed(format!("{}: {}", what, e))),
        }
    }
    Err(DriveError::StoreFailed(format!(
        "{}: {}",
        what,
        last_err.expect("retry loop ran at least once")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient() {
        let calls = AtomicU32::new(0);
        let result = with_retry("put", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DriveError::StoreBusy("try later".to_string()))
            } else {
                Ok(42u32)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_as_store_failed() {
        let result: DriveResult<()> = with_retry("put", || async {
            Err(DriveError::StoreBusy("still busy".to_string()))
        })
        .await;
        assert!(matches!(result, Err(DriveError::StoreFailed(_))));
    }

    #[tokio::test]
    async fn test_with_retry_passes_permanent_through() {
        let calls = AtomicU32::new(0);
        let result: DriveResult<()> = with_retry("get", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DriveError::NotFound("gone".to_string()))
        })
        .await;
        assert!(matches!(result, Err(DriveError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
