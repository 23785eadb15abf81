use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use vdrive_core::{DirectoryHandler, Path as DrivePath};
use vdrive_store::{LocalStore, ObjectStore};
use vdrive_types::{DirectoryBlob, DriveError, DriveResult, Identity};

pub const DEFAULT_DRIVE_CONFIG_PATH: &str = "/opt/vdrive/etc/vdrive.json";

#[derive(Debug, Clone)]
pub struct DriveRunOptions {
    pub mount_point: PathBuf,
    pub config_path: PathBuf,
    pub create: bool,
    pub check_data: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    #[serde(alias = "name")]
    pub drive_name: String,
    #[serde(alias = "store_path", alias = "storage_dir")]
    pub store_dir: PathBuf,
    /// Hex identity of the drive owner; generated on first run.
    pub unique_user_id: Option<String>,
    /// Hex identity of the root directory; generated on first run.
    pub root_parent_id: Option<String>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            drive_name: "vdrive".to_string(),
            store_dir: PathBuf::from("/opt/vdrive/var/store"),
            unique_user_id: None,
            root_parent_id: None,
        }
    }
}

/// Launcher/drive handshake: the launcher returns to its caller once
/// `mounted` flips true, and requests teardown by raising `unmount`. Models
/// the shared-memory protocol between the launcher and the drive process.
pub struct MountHandshake {
    mounted: AtomicBool,
    unmount: AtomicBool,
    notify: Notify,
}

impl MountHandshake {
    pub fn new() -> Self {
        Self {
            mounted: AtomicBool::new(false),
            unmount: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub fn set_mounted(&self, mounted: bool) {
        self.mounted.store(mounted, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn request_unmount(&self) {
        self.unmount.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn unmount_requested(&self) -> bool {
        self.unmount.load(Ordering::SeqCst)
    }

    pub async fn wait_unmount(&self) {
        loop {
            // Register for the notification before checking the flag so a
            // request landing in between is not lost.
            let notified = self.notify.notified();
            if self.unmount_requested() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for MountHandshake {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone)]
pub struct CheckDataReport {
    pub directories_checked: usize,
    pub corrupt_directories: Vec<String>,
}

impl CheckDataReport {
    pub fn is_clean(&self) -> bool {
        self.corrupt_directories.is_empty()
    }
}

pub async fn load_or_create_config(path: &Path) -> DriveResult<DriveConfig> {
    if path.exists() {
        let config_str = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DriveError::IoError(format!("read config failed: {}", e)))?;
        return serde_json::from_str(&config_str).map_err(|e| {
            warn!("parse drive config failed! {}", e);
            DriveError::ParsingError("drive config invalid".to_string())
        });
    }

    let config = DriveConfig {
        unique_user_id: Some(Identity::random().to_hex()),
        root_parent_id: Some(Identity::random().to_hex()),
        ..Default::default()
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DriveError::IoError(format!("create config dir failed: {}", e)))?;
    }
    let config_str =
        serde_json::to_string_pretty(&config).map_err(|e| DriveError::IoError(e.to_string()))?;
    tokio::fs::write(path, config_str)
        .await
        .map_err(|e| DriveError::IoError(format!("write config failed: {}", e)))?;
    info!("wrote fresh drive config to {}", path.display());
    Ok(config)
}

fn config_identity(value: &Option<String>, what: &str) -> DriveResult<Identity> {
    match value {
        Some(hex_str) => Identity::from_hex(hex_str),
        None => Err(DriveError::InvalidParameter(format!(
            "drive config is missing {}",
            what
        ))),
    }
}

/// Walk every reachable directory and verify its stored blob parses and
/// hashes to its newest version name.
pub async fn check_data(
    handler: &Arc<DirectoryHandler>,
    storage: Arc<dyn ObjectStore>,
) -> DriveResult<CheckDataReport> {
    let mut report = CheckDataReport::default();
    let mut queue = vec![String::new()];
    while let Some(path) = queue.pop() {
        let directory = handler.get(&path).await?;
        report.directories_checked += 1;

        let versions = match storage.get_versions(&directory.directory_id()).await {
            Ok(versions) => versions,
            Err(e) if e.is_not_found() => {
                // Never stored yet (still within its inactivity window).
                continue;
            }
            Err(e) => return Err(e),
        };
        if let Some(newest) = versions.first() {
            match storage.get(&newest.content_hash).await {
                Ok(bytes) => {
                    let hash_ok = DirectoryBlob::content_hash(&bytes) == newest.content_hash;
                    if !hash_ok || DirectoryBlob::from_bytes(&bytes).is_err() {
                        report.corrupt_directories.push(path.clone());
                    }
                }
                Err(_) => report.corrupt_directories.push(path.clone()),
            }
        }

        directory.reset_children_counter();
        while let Some(child) = directory.get_child_and_increment_counter() {
            let meta = child.metadata();
            if meta.is_directory() {
                if path.is_empty() {
                    queue.push(meta.name().to_string());
                } else {
                    queue.push(format!("{}/{}", path, meta.name()));
                }
            }
        }
    }
    Ok(report)
}

pub async fn run_drive(options: DriveRunOptions) -> DriveResult<()> {
    let create = options.create || !options.config_path.exists();
    let config = load_or_create_config(&options.config_path).await?;
    let unique_user_id = config_identity(&config.unique_user_id, "unique_user_id")?;
    let root_parent_id = config_identity(&config.root_parent_id, "root_parent_id")?;

    let storage: Arc<dyn ObjectStore> =
        Arc::new(LocalStore::open(config.store_dir.clone()).await?);
    let handler =
        DirectoryHandler::new(storage.clone(), unique_user_id, root_parent_id, create).await?;

    if options.check_data {
        let report = check_data(&handler, storage.clone()).await?;
        if report.is_clean() {
            info!("check-data: {} directories clean", report.directories_checked);
        } else {
            warn!(
                "check-data: {} of {} directories corrupt: {:?}",
                report.corrupt_directories.len(),
                report.directories_checked,
                report.corrupt_directories
            );
        }
    }

    let handshake = Arc::new(MountHandshake::new());
    handshake.set_mounted(true);
    info!(
        "drive '{}' ready for mounting at {}",
        config.drive_name,
        options.mount_point.display()
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("waiting for interrupt failed: {}", e);
            }
            info!("interrupt received, unmounting");
        }
        _ = handshake.wait_unmount() => {
            info!("unmount requested, tearing down");
        }
    }

    handshake.set_mounted(false);
    handler.store_all().await;
    handler.wait_idle().await;
    info!("all directories stored, drive '{}' down", config.drive_name);
    Ok(())
}
