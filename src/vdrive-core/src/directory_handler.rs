use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use vdrive_store::{with_retry, ObjectStore};
use vdrive_types::{
    DirectoryBlob, DirectoryId, DriveError, DriveResult, Identity, MetaData, ParentId,
    DIRECTORY_INACTIVITY_DELAY, ROOT_DIR_NAME,
};

use crate::{Directory, DirectoryListener, File, Path};

/// Split a relative path into its components. Empty segments from leading,
/// trailing or doubled separators are dropped. `.` and `..` are rejected;
/// the mount adapter resolves those before they reach the drive.
pub fn split_path(path: &str) -> DriveResult<Vec<String>> {
    let mut components = Vec::new();
    for part in path.split(['/', '\\']) {
        if part.is_empty() {
            continue;
        }
        if part == "." || part == ".." {
            return Err(DriveError::InvalidParameter(format!(
                "unsupported path component: {}",
                part
            )));
        }
        components.push(part.to_string());
    }
    Ok(components)
}

/// Resolves relative paths to live [`Directory`] instances and bridges them
/// to the backing store. Holds the only strong references to cached
/// directories; each directory talks back through the weak
/// [`DirectoryListener`] reference.
pub struct DirectoryHandler {
    storage: Arc<dyn ObjectStore>,
    unique_user_id: ParentId,
    root_parent_id: DirectoryId,
    inactivity_delay: Duration,
    cache: Mutex<BTreeMap<String, Arc<Directory>>>,
    weak_self: Weak<DirectoryHandler>,
}

impl DirectoryHandler {
    pub async fn new(
        storage: Arc<dyn ObjectStore>,
        unique_user_id: ParentId,
        root_parent_id: DirectoryId,
        create: bool,
    ) -> DriveResult<Arc<Self>> {
        Self::new_with_delay(
            storage,
            unique_user_id,
            root_parent_id,
            create,
            DIRECTORY_INACTIVITY_DELAY,
        )
        .await
    }

    pub async fn new_with_delay(
        storage: Arc<dyn ObjectStore>,
        unique_user_id: ParentId,
        root_parent_id: DirectoryId,
        create: bool,
        inactivity_delay: Duration,
    ) -> DriveResult<Arc<Self>> {
        let handler = Arc::new_cyclic(|weak_self| Self {
            storage,
            unique_user_id,
            root_parent_id,
            inactivity_delay,
            cache: Mutex::new(BTreeMap::new()),
            weak_self: weak_self.clone(),
        });
        handler.initialise(create).await?;
        Ok(handler)
    }

    async fn initialise(&self, create: bool) -> DriveResult<()> {
        if !create {
            match self
                .get_from_storage("", self.unique_user_id, self.root_parent_id)
                .await
            {
                Ok(root_parent) => {
                    self.cache
                        .lock()
                        .unwrap()
                        .insert(String::new(), root_parent);
                    return Ok(());
                }
                Err(e) => {
                    warn!("loading root directory failed ({}), creating a fresh drive", e);
                }
            }
        }

        let root_id = Identity::random();
        let root_entry = File::new(MetaData::new_directory(ROOT_DIR_NAME, root_id)?);
        let root_parent = Directory::create(
            self.unique_user_id,
            self.root_parent_id,
            self.listener(),
            "",
            self.inactivity_delay,
        );
        let root = Directory::create(
            self.root_parent_id,
            root_id,
            self.listener(),
            ROOT_DIR_NAME,
            self.inactivity_delay,
        );
        root_parent.add_child(root_entry)?;

        let mut cache = self.cache.lock().unwrap();
        cache.insert(String::new(), root_parent);
        cache.insert(ROOT_DIR_NAME.to_string(), root);
        Ok(())
    }

    fn listener(&self) -> Weak<dyn DirectoryListener> {
        self.weak_self.clone() as Weak<dyn DirectoryListener>
    }

    pub fn unique_user_id(&self) -> ParentId {
        self.unique_user_id
    }

    pub fn root_parent_id(&self) -> DirectoryId {
        self.root_parent_id
    }

    /// Resolve `path` to a live directory, walking down from the deepest
    /// cached antecedent and materialising the missing segments from the
    /// store. Fails with `NoSuchFile` for a missing segment and
    /// `InvalidParameter` when a segment names a file.
    pub async fn get(&self, path: &str) -> DriveResult<Arc<Directory>> {
        let components = split_path(path)?;
        let (mut parent, depth) = {
            let cache = self.cache.lock().unwrap();
            let key = components.join("/");
            if let Some(directory) = cache.get(&key) {
                return Ok(Arc::clone(directory));
            }
            let mut found = None;
            for depth in (0..components.len()).rev() {
                if let Some(directory) = cache.get(&components[..depth].join("/")) {
                    found = Some((Arc::clone(directory), depth));
                    break;
                }
            }
            found.ok_or_else(|| {
                DriveError::Uninitialised("drive root not initialised".to_string())
            })?
        };

        for index in depth..components.len() {
            let name = &components[index];
            let entry = parent.get_child(name)?;
            let directory_id = entry.directory_id().ok_or_else(|| {
                DriveError::InvalidParameter(format!("not a directory: {}", name))
            })?;
            let sub_key = components[..=index].join("/");
            let directory = self
                .get_from_storage(&sub_key, parent.directory_id(), directory_id)
                .await?;
            parent = {
                let mut cache = self.cache.lock().unwrap();
                // Another task may have resolved this segment meanwhile.
                Arc::clone(cache.entry(sub_key).or_insert(directory))
            };
        }
        Ok(parent)
    }

    /// Metadata of the entry at `path`, as a stat call sees it. Resolved
    /// from the parent's listing; the drive root answers for the empty path.
    pub async fn get_metadata(&self, path: &str) -> DriveResult<MetaData> {
        let components = split_path(path)?;
        match components.last() {
            None => {
                let root_parent = self.get("").await?;
                Ok(root_parent.metadata())
            }
            Some(name) => {
                let parent = self
                    .get(&components[..components.len() - 1].join("/"))
                    .await?;
                let entry = parent.get_child(name)?;
                entry.update_last_access_time();
                Ok(entry.metadata())
            }
        }
    }

    /// Add a new child at `path`. When the child is itself a directory, a
    /// fresh live [`Directory`] is registered and its initial store
    /// scheduled.
    pub async fn add(&self, path: &str, child: Arc<File>) -> DriveResult<()> {
        let components = split_path(path)?;
        let name = components
            .last()
            .ok_or_else(|| DriveError::InvalidParameter("empty path".to_string()))?;
        if child.name() != *name {
            return Err(DriveError::InvalidParameter(format!(
                "child named '{}' added at '{}'",
                child.name(),
                path
            )));
        }

        let (parent_dir, parent_entry) = self.get_parent(&components).await?;
        parent_dir.add_child(Arc::clone(&child))?;

        if let Some(directory_id) = child.directory_id() {
            let key = components.join("/");
            let directory = Directory::create(
                parent_dir.directory_id(),
                directory_id,
                self.listener(),
                &key,
                self.inactivity_delay,
            );
            self.cache.lock().unwrap().insert(key, directory);
        }

        /* The parent directory appears twice in the tree: as the Directory
           holding the new child, and as the File entry inside the
           grandparent carrying its metadata. Both must be refreshed. */
        if let Some(entry) = parent_entry {
            entry.update_last_modified_time();
            entry.schedule_for_storing();
        }
        Ok(())
    }

    /// Remove the child at `path`. Deleting a directory prunes its cached
    /// subtree and drops its version chain from the store.
    pub async fn delete(&self, path: &str) -> DriveResult<()> {
        let components = split_path(path)?;
        let name = components
            .last()
            .ok_or_else(|| DriveError::InvalidParameter("empty path".to_string()))?;
        let (parent_dir, parent_entry) = self.get_parent(&components).await?;

        let child = parent_dir.get_child(name)?;
        if child.is_directory() {
            self.remove_cached_subtree(&components.join("/"));
            if let Some(directory_id) = child.directory_id() {
                with_retry("remove_versions", || {
                    self.storage.remove_versions(&directory_id)
                })
                .await?;
            }
        }

        parent_dir.remove_child(name)?;
        if let Some(entry) = parent_entry {
            entry.update_last_modified_time();
            entry.schedule_for_storing();
        }
        Ok(())
    }

    /// Rename or move. Follows the usual filesystem rules for an existing
    /// target: a file or empty directory at the new path is replaced, a
    /// non-empty directory refuses with `FileExists`.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> DriveResult<()> {
        let old_components = split_path(old_path)?;
        let new_components = split_path(new_path)?;
        if old_components == new_components {
            return Ok(());
        }
        let old_name = old_components
            .last()
            .ok_or_else(|| DriveError::InvalidParameter("empty path".to_string()))?
            .clone();
        let new_name = new_components
            .last()
            .ok_or_else(|| DriveError::InvalidParameter("empty path".to_string()))?
            .clone();

        let old_parent_components = &old_components[..old_components.len() - 1];
        let new_parent_components = &new_components[..new_components.len() - 1];
        let new_parent = self.get(&new_parent_components.join("/")).await?;
        self.prepare_new_path(&new_components, &new_parent).await?;

        if old_parent_components == new_parent_components {
            new_parent.rename_child(&old_name, &new_name)?;
        } else {
            self.rename_different_parent(&old_components, &new_components, &new_parent)
                .await?;
        }

        self.rekey_cached_subtree(&old_components.join("/"), &new_components.join("/"));
        Ok(())
    }

    /// Clear the way at the rename target, matching rename(2): an existing
    /// file is removed, an existing empty directory is removed, a non-empty
    /// directory is an error.
    async fn prepare_new_path(
        &self,
        new_components: &[String],
        new_parent: &Arc<Directory>,
    ) -> DriveResult<()> {
        let new_name = new_components.last().expect("validated by caller");
        match new_parent.get_child(new_name) {
            Ok(existing) => {
                if existing.is_directory() {
                    let new_key = new_components.join("/");
                    let existing_dir = self.get(&new_key).await?;
                    if existing_dir.is_empty() {
                        new_parent.remove_child(new_name)?;
                        self.remove_cached_subtree(&new_key);
                    } else {
                        return Err(DriveError::FileExists(new_key));
                    }
                } else {
                    new_parent.remove_child(new_name)?;
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn rename_different_parent(
        &self,
        old_components: &[String],
        new_components: &[String],
        new_parent: &Arc<Directory>,
    ) -> DriveResult<()> {
        let (old_parent, old_entry) = self.get_parent(old_components).await?;
        let old_name = old_components.last().expect("validated by caller");
        let new_name = new_components.last().expect("validated by caller");

        let moved = Directory::move_child(&old_parent, new_parent, old_name, new_name)?;

        if moved.is_directory() {
            let old_key = old_components.join("/");
            let new_key = new_components.join("/");
            let cached = self.cache.lock().unwrap().get(&old_key).cloned();
            if let Some(directory) = cached {
                // The live object keeps its current identity until the next
                // store lands; then the recorded reparent applies.
                directory.set_new_parent(new_parent.directory_id(), &new_key);
                directory.schedule_for_storing();
            }
        }

        if let Some(entry) = old_entry {
            entry.update_last_modified_time();
            entry.schedule_for_storing();
        }
        Ok(())
    }

    /// The parent directory of `components` plus, when one exists, the File
    /// entry describing that parent inside the grandparent's listing.
    async fn get_parent(
        &self,
        components: &[String],
    ) -> DriveResult<(Arc<Directory>, Option<Arc<File>>)> {
        let parent_components = &components[..components.len() - 1];
        let parent = self.get(&parent_components.join("/")).await?;
        let entry = match parent_components.last() {
            Some(parent_name) => {
                let grandparent_key =
                    parent_components[..parent_components.len() - 1].join("/");
                let grandparent = self.get(&grandparent_key).await?;
                Some(grandparent.get_child(parent_name)?)
            }
            None => None,
        };
        Ok((parent, entry))
    }

    async fn get_from_storage(
        &self,
        relative_path: &str,
        parent_id: ParentId,
        directory_id: DirectoryId,
    ) -> DriveResult<Arc<Directory>> {
        let versions = with_retry("get_versions", || self.storage.get_versions(&directory_id))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    DriveError::NoSuchFile(relative_path.to_string())
                } else {
                    e
                }
            })?;
        let newest = versions
            .first()
            .copied()
            .ok_or_else(|| DriveError::NoSuchFile(relative_path.to_string()))?;
        let bytes = with_retry("get", || self.storage.get(&newest.content_hash)).await?;
        let directory = Directory::from_blob(
            parent_id,
            &bytes,
            versions,
            self.listener(),
            relative_path,
            self.inactivity_delay,
        )?;
        if directory.directory_id() != directory_id {
            return Err(DriveError::ParsingError(format!(
                "stored directory id mismatch for '{}'",
                relative_path
            )));
        }
        Ok(directory)
    }

    fn remove_cached_subtree(&self, key: &str) {
        let prefix = format!("{}/", key);
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|cached, _| cached != key && !cached.starts_with(&prefix));
    }

    fn rekey_cached_subtree(&self, old_key: &str, new_key: &str) {
        let prefix = format!("{}/", old_key);
        let mut cache = self.cache.lock().unwrap();
        let moved: Vec<String> = cache
            .keys()
            .filter(|k| *k == old_key || k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(directory) = cache.remove(&key) {
                let rekeyed = format!("{}{}", new_key, &key[old_key.len()..]);
                cache.insert(rekeyed, directory);
            }
        }
    }

    /// Ask every live directory to persist itself after its inactivity
    /// delay.
    pub fn flush_all(&self) {
        for directory in self.cache.lock().unwrap().values() {
            directory.schedule_for_storing();
        }
    }

    /// Synchronously flush every pending directory; the unmount path. Pair
    /// with [`Self::wait_idle`] to block until all bookkeeping has drained.
    pub async fn store_all(&self) {
        let directories: Vec<Arc<Directory>> =
            self.cache.lock().unwrap().values().cloned().collect();
        info!("storing all pending directories ({} live)", directories.len());
        for directory in directories {
            directory.store_immediately_if_pending().await;
        }
    }

    pub async fn wait_idle(&self) {
        loop {
            let pending = {
                self.cache
                    .lock()
                    .unwrap()
                    .values()
                    .any(|directory| directory.has_pending())
            };
            if !pending {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl DirectoryListener for DirectoryHandler {
    async fn put_directory(&self, directory: Arc<Directory>) -> DriveResult<()> {
        let bytes = directory.serialise().await?;
        let version_id = DirectoryBlob::content_hash(&bytes);
        with_retry("put", || self.storage.put(&version_id, &bytes)).await?;

        let max_versions = directory.max_versions();
        if directory.versions_count() == 0 {
            let (directory_id, version) = directory.initialise_versions(version_id)?;
            with_retry("append_version", || {
                self.storage
                    .append_version(&directory_id, &version, max_versions)
            })
            .await?;
        } else {
            let (directory_id, _previous, version) = directory.add_new_version(version_id);
            with_retry("append_version", || {
                self.storage
                    .append_version(&directory_id, &version, max_versions)
            })
            .await?;
        }
        Ok(())
    }

    async fn increment_chunks(&self, chunks: Vec<Identity>) -> DriveResult<()> {
        with_retry("increment_references", || {
            self.storage.increment_references(&chunks)
        })
        .await
    }
}
