use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use vdrive_types::{
    DirectoryBlob, DirectoryId, DriveError, DriveResult, Identity, MetaData, ParentId, VersionName,
    MAX_VERSIONS,
};

use crate::{File, Path};

/// Upward contract from a directory to its handler. The directory holds this
/// weakly; the handler owns the directory.
#[async_trait]
pub trait DirectoryListener: Send + Sync {
    /// Persist the directory: serialise, write the blob, commit the new
    /// version. Invoked off the directory's mutex.
    async fn put_directory(&self, directory: Arc<Directory>) -> DriveResult<()>;

    /// Bump the store-side reference counts of `chunks` before the
    /// serialised bytes that reference them are written.
    async fn increment_chunks(&self, chunks: Vec<Identity>) -> DriveResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// No store scheduled or running.
    Complete,
    /// The inactivity timer is armed.
    Pending,
    /// Serialisation has started; completes when the new version is added.
    Ongoing,
}

#[derive(Debug)]
struct NewParent {
    parent_id: ParentId,
    path: String,
}

#[derive(Debug)]
struct DirectoryState {
    parent_id: ParentId,
    directory_id: DirectoryId,
    path: String,
    children: Vec<Arc<File>>,
    children_count_position: usize,
    versions: VecDeque<VersionName>,
    max_versions: u64,
    store_state: StoreState,
    /// Counter of armings: +1 per timer arming and per brought-forward
    /// store, -1 when the armed task fires, is cancelled or superseded.
    pending_count: u64,
    /// Applied at the end of the next successful store so the in-flight
    /// snapshot keeps its pre-move identity.
    new_parent: Option<NewParent>,
    /// Armed timer: arming generation plus its cancellation token.
    timer: Option<(u64, CancellationToken)>,
    next_arming: u64,
}

/// In-memory representation of one filesystem directory: its ordered
/// children, its version chain and the deferred-store timer that coalesces
/// bursts of mutations into a single stored version.
#[derive(Debug)]
pub struct Directory {
    state: Mutex<DirectoryState>,
    listener: Mutex<Weak<dyn DirectoryListener>>,
    inactivity_delay: Duration,
    self_ref: Weak<Directory>,
}

impl Directory {
    /// A brand-new directory (explicit creation). Schedules its initial
    /// store immediately.
    pub fn create(
        parent_id: ParentId,
        directory_id: DirectoryId,
        listener: Weak<dyn DirectoryListener>,
        path: &str,
        inactivity_delay: Duration,
    ) -> Arc<Self> {
        let dir = Self::build(
            parent_id,
            directory_id,
            Vec::new(),
            Vec::new(),
            MAX_VERSIONS as u64,
            listener,
            path,
            inactivity_delay,
        );
        dir.schedule_for_storing();
        dir
    }

    /// A directory materialised from its serialised bytes and stored version
    /// chain. Does not schedule a store.
    pub fn from_blob(
        parent_id: ParentId,
        bytes: &[u8],
        versions: Vec<VersionName>,
        listener: Weak<dyn DirectoryListener>,
        path: &str,
        inactivity_delay: Duration,
    ) -> DriveResult<Arc<Self>> {
        let blob = DirectoryBlob::from_bytes(bytes)?;
        let children: Vec<Arc<File>> = blob.children.into_iter().map(File::new).collect();
        let dir = Self::build(
            parent_id,
            blob.directory_id,
            children,
            versions,
            blob.max_versions,
            listener,
            path,
            inactivity_delay,
        );
        {
            let mut state = dir.state.lock().unwrap();
            for child in &state.children {
                child.set_parent(dir.self_ref.clone());
            }
            Self::sort_and_reset_children_counter(&mut state);
        }
        Ok(dir)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        parent_id: ParentId,
        directory_id: DirectoryId,
        children: Vec<Arc<File>>,
        versions: Vec<VersionName>,
        max_versions: u64,
        listener: Weak<dyn DirectoryListener>,
        path: &str,
        inactivity_delay: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            state: Mutex::new(DirectoryState {
                parent_id,
                directory_id,
                path: path.to_string(),
                children,
                children_count_position: 0,
                versions: versions.into(),
                max_versions,
                store_state: StoreState::Complete,
                pending_count: 0,
                new_parent: None,
                timer: None,
                next_arming: 0,
            }),
            listener: Mutex::new(listener),
            inactivity_delay,
            self_ref: self_ref.clone(),
        })
    }

    fn get_listener(&self) -> Option<Arc<dyn DirectoryListener>> {
        self.listener.lock().unwrap().upgrade()
    }

    pub fn parent_id(&self) -> ParentId {
        self.state.lock().unwrap().parent_id
    }

    pub fn directory_id(&self) -> DirectoryId {
        self.state.lock().unwrap().directory_id
    }

    pub fn relative_path(&self) -> String {
        self.state.lock().unwrap().path.clone()
    }

    pub fn max_versions(&self) -> u64 {
        self.state.lock().unwrap().max_versions
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().children.is_empty()
    }

    pub fn has_child(&self, name: &str) -> bool {
        let state = self.state.lock().unwrap();
        Self::find_index(&state.children, name).is_some()
    }

    pub fn get_child(&self, name: &str) -> DriveResult<Arc<File>> {
        let state = self.state.lock().unwrap();
        match Self::find_index(&state.children, name) {
            Some(index) => Ok(Arc::clone(&state.children[index])),
            None => Err(DriveError::NoSuchFile(name.to_string())),
        }
    }

    /// The child at the enumeration cursor, advancing the cursor. Empty once
    /// the cursor reaches the end; the cursor stays at the end until reset.
    pub fn get_child_and_increment_counter(&self) -> Option<Arc<dyn Path>> {
        let mut state = self.state.lock().unwrap();
        if state.children_count_position < state.children.len() {
            let child = Arc::clone(&state.children[state.children_count_position]);
            state.children_count_position += 1;
            Some(child)
        } else {
            None
        }
    }

    pub fn reset_children_counter(&self) {
        self.state.lock().unwrap().children_count_position = 0;
    }

    pub fn add_child(&self, child: Arc<File>) -> DriveResult<()> {
        let mut state = self.state.lock().unwrap();
        let name = child.name();
        if Self::find_index(&state.children, &name).is_some() {
            return Err(DriveError::FileExists(name));
        }
        child.set_parent(self.self_ref.clone());
        state.children.push(child);
        Self::sort_and_reset_children_counter(&mut state);
        self.do_schedule_for_storing(&mut state);
        Ok(())
    }

    pub fn remove_child(&self, name: &str) -> DriveResult<Arc<File>> {
        let mut state = self.state.lock().unwrap();
        let index = Self::find_index(&state.children, name)
            .ok_or_else(|| DriveError::NoSuchFile(name.to_string()))?;
        let child = state.children.remove(index);
        Self::sort_and_reset_children_counter(&mut state);
        self.do_schedule_for_storing(&mut state);
        Ok(child)
    }

    /// Precondition (enforced at tree level by the handler): no existing
    /// child is named `new_name`.
    pub fn rename_child(&self, old_name: &str, new_name: &str) -> DriveResult<()> {
        let mut state = self.state.lock().unwrap();
        debug_assert!(Self::find_index(&state.children, new_name).is_none());
        let index = Self::find_index(&state.children, old_name)
            .ok_or_else(|| DriveError::NoSuchFile(old_name.to_string()))?;
        state.children[index].set_name(new_name)?;
        Self::sort_and_reset_children_counter(&mut state);
        self.do_schedule_for_storing(&mut state);
        Ok(())
    }

    /// Move a child between two parents, holding both parents' state locks
    /// for the duration so either both listings reflect the move or neither
    /// does. Locks are taken in directory-id order.
    pub fn move_child(
        old_parent: &Arc<Directory>,
        new_parent: &Arc<Directory>,
        old_name: &str,
        new_name: &str,
    ) -> DriveResult<Arc<File>> {
        debug_assert!(!Arc::ptr_eq(old_parent, new_parent));
        let (mut old_state, mut new_state) =
            if old_parent.directory_id() <= new_parent.directory_id() {
                let old_guard = old_parent.state.lock().unwrap();
                let new_guard = new_parent.state.lock().unwrap();
                (old_guard, new_guard)
            } else {
                let new_guard = new_parent.state.lock().unwrap();
                let old_guard = old_parent.state.lock().unwrap();
                (old_guard, new_guard)
            };

        if Self::find_index(&new_state.children, new_name).is_some() {
            return Err(DriveError::FileExists(new_name.to_string()));
        }
        let index = Self::find_index(&old_state.children, old_name)
            .ok_or_else(|| DriveError::NoSuchFile(old_name.to_string()))?;

        old_state.children[index].set_name(new_name)?;
        let child = old_state.children.remove(index);
        child.set_parent(new_parent.self_ref.clone());
        new_state.children.push(Arc::clone(&child));

        Self::sort_and_reset_children_counter(&mut old_state);
        Self::sort_and_reset_children_counter(&mut new_state);
        old_parent.do_schedule_for_storing(&mut old_state);
        new_parent.do_schedule_for_storing(&mut new_state);
        Ok(child)
    }

    fn find_index(children: &[Arc<File>], name: &str) -> Option<usize> {
        children.iter().position(|child| child.name() == name)
    }

    fn sort_and_reset_children_counter(state: &mut MutexGuard<'_, DirectoryState>) {
        state
            .children
            .sort_by(|lhs, rhs| crate::compare_by_name(lhs.as_ref(), rhs.as_ref()));
        state.children_count_position = 0;
    }

    /// Record a pending reparent; applied at the end of the next successful
    /// store so the snapshot in flight stays consistent.
    pub fn set_new_parent(&self, parent_id: ParentId, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.new_parent = Some(NewParent {
            parent_id,
            path: path.to_string(),
        });
    }

    pub fn versions_count(&self) -> usize {
        self.state.lock().unwrap().versions.len()
    }

    /// First version of a fresh directory. Fails if a version chain already
    /// exists.
    pub fn initialise_versions(
        &self,
        version_id: Identity,
    ) -> DriveResult<(DirectoryId, VersionName)> {
        let mut state = self.state.lock().unwrap();
        if state.store_state == StoreState::Ongoing {
            state.store_state = StoreState::Complete;
        }
        if !state.versions.is_empty() {
            return Err(DriveError::Uninitialised(format!(
                "directory {} already has versions",
                state.directory_id
            )));
        }
        let version = VersionName::new(0, version_id);
        state.versions.push_back(version);
        Ok((state.directory_id, version))
    }

    /// Push a new version at the front of the chain, dropping the oldest
    /// beyond `max_versions`. Returns the directory id, the previous version
    /// (empty for the first one) and the new version.
    pub fn add_new_version(
        &self,
        version_id: Identity,
    ) -> (DirectoryId, Option<VersionName>, VersionName) {
        let mut state = self.state.lock().unwrap();
        if state.store_state == StoreState::Ongoing {
            state.store_state = StoreState::Complete;
        }
        match state.versions.front().copied() {
            None => {
                let version = VersionName::new(0, version_id);
                state.versions.push_back(version);
                (state.directory_id, None, version)
            }
            Some(previous) => {
                let version = VersionName::new(previous.index + 1, version_id);
                state.versions.push_front(version);
                if state.versions.len() > state.max_versions as usize {
                    state.versions.pop_back();
                }
                (state.directory_id, Some(previous), version)
            }
        }
    }

    /// Serialise the directory into its canonical bytes. Collects the chunk
    /// references of all file children and asks the listener to increment
    /// them before the transition to `Ongoing`.
    pub async fn serialise(&self) -> DriveResult<Vec<u8>> {
        let (mut blob, chunks) = {
            let state = self.state.lock().unwrap();
            let mut blob = DirectoryBlob::new(state.directory_id, state.max_versions);
            let mut chunks = Vec::new();
            for child in &state.children {
                child.serialise_into(&mut blob, &mut chunks);
            }
            (blob, chunks)
        };
        blob.children.sort_by(|lhs, rhs| lhs.name().cmp(rhs.name()));

        if !chunks.is_empty() {
            if let Some(listener) = self.get_listener() {
                listener.increment_chunks(chunks).await?;
            }
        }

        self.state.lock().unwrap().store_state = StoreState::Ongoing;
        blob.to_bytes()
    }

    pub fn store_state(&self) -> StoreState {
        self.state.lock().unwrap().store_state
    }

    /// True while any armed or in-flight store has not finished its
    /// bookkeeping.
    pub fn has_pending(&self) -> bool {
        self.state.lock().unwrap().pending_count != 0
    }

    /// Arm (or re-arm) the inactivity timer; any outstanding arming is
    /// cancelled.
    pub fn schedule_for_storing(&self) {
        let mut state = self.state.lock().unwrap();
        self.do_schedule_for_storing(&mut state);
    }

    fn do_schedule_for_storing(&self, state: &mut MutexGuard<'_, DirectoryState>) {
        if let Some((generation, token)) = state.timer.take() {
            token.cancel();
            if state.store_state != StoreState::Complete {
                debug!(
                    "cancelled store arming {} for '{}'",
                    generation, state.path
                );
            }
        }

        let generation = state.next_arming;
        state.next_arming += 1;
        let token = CancellationToken::new();
        state.timer = Some((generation, token.clone()));
        state.pending_count += 1;
        state.store_state = StoreState::Pending;

        let Some(dir) = self.self_ref.upgrade() else {
            return;
        };
        let delay = self.inactivity_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    dir.on_timer_cancelled();
                }
                _ = tokio::time::sleep(delay) => {
                    dir.process_timer(Some(generation)).await;
                }
            }
        });
    }

    fn on_timer_cancelled(&self) {
        let mut state = self.state.lock().unwrap();
        debug!("store timer cancelled - not storing '{}'", state.path);
        debug_assert!(state.pending_count > 0);
        state.pending_count = state.pending_count.saturating_sub(1);
    }

    /// The store path shared by timer expiry and brought-forward stores.
    /// `generation` identifies a fired timer arming; `None` forces the store
    /// (used by [`Self::store_immediately_if_pending`]). Errors never
    /// propagate: failures are logged and leave the directory pending so a
    /// later flush retries.
    async fn process_timer(&self, generation: Option<u64>) {
        let listener = {
            let mut state = self.state.lock().unwrap();
            if let Some(generation) = generation {
                match state.timer {
                    Some((current, _)) if current == generation => {
                        state.timer = None;
                    }
                    _ => {
                        // Superseded between expiry and lock acquisition.
                        debug!("store arming {} superseded for '{}'", generation, state.path);
                        debug_assert!(state.pending_count > 0);
                        state.pending_count = state.pending_count.saturating_sub(1);
                        return;
                    }
                }
            }
            info!("storing '{}'", state.path);
            self.get_listener()
        };

        if let (Some(listener), Some(dir)) = (listener, self.self_ref.upgrade()) {
            if let Err(e) = listener.put_directory(dir).await {
                let mut state = self.state.lock().unwrap();
                warn!("storing '{}' failed: {}", state.path, e);
                state.store_state = StoreState::Pending;
            }
        }

        let mut state = self.state.lock().unwrap();
        if let Some(new_parent) = state.new_parent.take() {
            state.parent_id = new_parent.parent_id;
            state.path = new_parent.path;
        }
        debug_assert!(state.pending_count > 0);
        state.pending_count = state.pending_count.saturating_sub(1);
    }

    /// Bring the store deadline forward: if a store is pending, cancel its
    /// timer and run the store path synchronously; otherwise do nothing.
    /// Used at unmount.
    pub async fn store_immediately_if_pending(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.store_state != StoreState::Pending {
                debug!("no store pending for '{}'", state.path);
                return;
            }
            let Some((_, token)) = state.timer.take() else {
                warn!("pending store for '{}' has no armed timer", state.path);
                return;
            };
            token.cancel();
            state.pending_count += 1;
        }
        self.process_timer(None).await;
    }
}

impl Path for Directory {
    fn metadata(&self) -> MetaData {
        let state = self.state.lock().unwrap();
        let name = match state.path.rsplit('/').next() {
            Some("") | None => ".",
            Some(component) => component,
        };
        MetaData::new_directory(name, state.directory_id)
            .expect("directory path components are validated on entry")
    }

    fn name(&self) -> String {
        self.metadata().name().to_string()
    }

    fn set_parent(&self, _parent: Weak<Directory>) {
        // A directory's parent is tracked by id; reparenting goes through
        // set_new_parent so it lands with the next stored snapshot.
    }

    fn parent(&self) -> Option<Arc<Directory>> {
        None
    }

    fn serialise_into(&self, blob: &mut DirectoryBlob, _chunks: &mut Vec<Identity>) {
        blob.children.push(self.metadata());
    }
}

impl Drop for Directory {
    fn drop(&mut self) {
        // An armed task holds a strong reference, so a live timer here means
        // the runtime dropped it without running; nothing left to flush.
        let state = self.state.get_mut().unwrap();
        if let Some((_, token)) = state.timer.take() {
            token.cancel();
        }
        if state.store_state == StoreState::Pending {
            warn!("directory '{}' dropped with a store pending", state.path);
        }
    }
}
