#[cfg(test)]
mod tests {
    use crate::daemon::{check_data, load_or_create_config, DriveConfig, MountHandshake};
    use crate::parse_args;
    use std::sync::Arc;
    use std::time::Duration;
    use vdrive_core::DirectoryHandler;
    use vdrive_store::{MemoryStore, ObjectStore};
    use vdrive_types::{Identity, MetaData};

    // ==================== Argument Parsing Tests ====================

    #[test]
    fn test_parse_args_defaults() {
        let options = parse_args(vec!["/mnt/vdrive".to_string()]).unwrap();
        assert_eq!(options.mount_point.to_str().unwrap(), "/mnt/vdrive");
        assert!(!options.create);
        assert!(!options.check_data);
    }

    #[test]
    fn test_parse_args_flags() {
        let options = parse_args(
            ["/mnt/vdrive", "--config", "/tmp/vdrive.json", "--create", "--check-data"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap();
        assert_eq!(options.config_path.to_str().unwrap(), "/tmp/vdrive.json");
        assert!(options.create);
        assert!(options.check_data);
    }

    #[test]
    fn test_parse_args_rejects_unknown_and_empty() {
        assert!(parse_args(vec![]).is_err());
        assert!(parse_args(vec!["/mnt".to_string(), "--bogus".to_string()]).is_err());
        assert!(parse_args(vec!["/mnt".to_string(), "--config".to_string()]).is_err());
    }

    // ==================== Config Tests ====================

    #[tokio::test]
    async fn test_load_or_create_config_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("etc").join("vdrive.json");

        let created = load_or_create_config(&path).await.unwrap();
        assert!(path.exists());
        assert!(created.unique_user_id.is_some());
        assert!(created.root_parent_id.is_some());

        let reloaded = load_or_create_config(&path).await.unwrap();
        assert_eq!(reloaded.unique_user_id, created.unique_user_id);
        assert_eq!(reloaded.root_parent_id, created.root_parent_id);
    }

    #[tokio::test]
    async fn test_config_accepts_aliases() {
        let json = r#"{"name": "mydrive", "store_path": "/tmp/store"}"#;
        let config: DriveConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.drive_name, "mydrive");
        assert_eq!(config.store_dir.to_str().unwrap(), "/tmp/store");
        assert!(config.unique_user_id.is_none());
    }

    // ==================== Handshake Tests ====================

    #[tokio::test]
    async fn test_handshake_mount_then_unmount() {
        let handshake = Arc::new(MountHandshake::new());
        assert!(!handshake.is_mounted());
        handshake.set_mounted(true);
        assert!(handshake.is_mounted());

        let waiter = {
            let handshake = handshake.clone();
            tokio::spawn(async move {
                handshake.wait_unmount().await;
            })
        };
        handshake.request_unmount();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(handshake.unmount_requested());
    }

    // ==================== Check Data Tests ====================

    #[tokio::test]
    async fn test_check_data_clean_tree() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let handler = DirectoryHandler::new_with_delay(
            store.clone(),
            Identity::random(),
            Identity::random(),
            true,
            Duration::from_millis(20),
        )
        .await
        .unwrap();

        let sub_id = Identity::random();
        handler
            .add(
                "/Root/Sub",
                vdrive_core::File::new(MetaData::new_directory("Sub", sub_id).unwrap()),
            )
            .await
            .unwrap();
        handler.store_all().await;
        handler.wait_idle().await;

        let report = check_data(&handler, store.clone() as Arc<dyn ObjectStore>)
            .await
            .unwrap();
        // Root parent, Root and Sub.
        assert_eq!(report.directories_checked, 3);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_check_data_flags_corrupt_blob() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let handler = DirectoryHandler::new_with_delay(
            store.clone(),
            Identity::random(),
            Identity::random(),
            true,
            Duration::from_millis(20),
        )
        .await
        .unwrap();
        handler.store_all().await;
        handler.wait_idle().await;

        // Overwrite the root parent's newest blob with garbage.
        let versions = store
            .get_versions(&handler.root_parent_id())
            .await
            .unwrap();
        store
            .put(&versions[0].content_hash, b"corrupted")
            .await
            .unwrap();

        let report = check_data(&handler, store.clone() as Arc<dyn ObjectStore>)
            .await
            .unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.corrupt_directories, vec![String::new()]);
    }
}
