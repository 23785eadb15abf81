use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use rusqlite::{params, Connection};
use vdrive_types::{DirectoryId, DriveError, DriveResult, Identity, VersionName};

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// SQLite side of the local store: per-directory version chains and chunk
/// reference counts. Blob payloads live as files beside this DB.
pub struct LocalStoreDB {
    pub db_path: String,
    conn: Mutex<Connection>,
}

impl LocalStoreDB {
    pub fn new(db_path: String) -> DriveResult<Self> {
        debug!("LocalStoreDB: new db path: {}", db_path);
        let conn = Connection::open(&db_path).map_err(|e| {
            warn!("LocalStoreDB: open db failed! {}", e);
            DriveError::DbError(e.to_string())
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS directory_versions (
                directory_id TEXT NOT NULL,
                version_index INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                create_time INTEGER NOT NULL,
                PRIMARY KEY (directory_id, version_index)
            )",
            [],
        )
        .map_err(|e| {
            warn!(
                "LocalStoreDB: create table directory_versions failed! {}",
                e
            );
            DriveError::DbError(e.to_string())
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunk_references (
                chunk_id TEXT PRIMARY KEY,
                ref_count INTEGER NOT NULL,
                update_time INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            warn!("LocalStoreDB: create table chunk_references failed! {}", e);
            DriveError::DbError(e.to_string())
        })?;

        Ok(Self {
            db_path,
            conn: Mutex::new(conn),
        })
    }

    pub fn append_version(
        &self,
        directory_id: &DirectoryId,
        version: &VersionName,
        max_versions: u64,
    ) -> DriveResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(|e| {
            warn!("LocalStoreDB: transaction failed! {}", e);
            DriveError::DbError(e.to_string())
        })?;

        tx.execute(
            "INSERT OR REPLACE INTO directory_versions
             (directory_id, version_index, content_hash, create_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                directory_id.to_string(),
                version.index as i64,
                version.content_hash.to_string(),
                unix_timestamp() as i64,
            ],
        )
        .map_err(|e| {
            warn!("LocalStoreDB: insert version failed! {}", e);
            DriveError::DbError(e.to_string())
        })?;

        // Prune the tail beyond max_versions, oldest first.
        tx.execute(
            "DELETE FROM directory_versions
             WHERE directory_id = ?1 AND version_index NOT IN (
                 SELECT version_index FROM directory_versions
                 WHERE directory_id = ?1
                 ORDER BY version_index DESC LIMIT ?2
             )",
            params![directory_id.to_string(), max_versions as i64],
        )
        .map_err(|e| {
            warn!("LocalStoreDB: prune versions failed! {}", e);
            DriveError::DbError(e.to_string())
        })?;

        tx.commit().map_err(|e| {
            warn!("LocalStoreDB: commit failed! {}", e);
            DriveError::DbError(e.to_string())
        })?;
        Ok(())
    }

    pub fn get_versions(&self, directory_id: &DirectoryId) -> DriveResult<Vec<VersionName>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT version_index, content_hash FROM directory_versions
                 WHERE directory_id = ?1 ORDER BY version_index DESC",
            )
            .map_err(|e| DriveError::DbError(e.to_string()))?;

        let rows = stmt
            .query_map(params![directory_id.to_string()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| {
                warn!("LocalStoreDB: query versions failed! {}", e);
                DriveError::DbError(e.to_string())
            })?;

        let mut versions = Vec::new();
        for row in rows {
            let (index, hash_hex) = row.map_err(|e| DriveError::DbError(e.to_string()))?;
            let content_hash = Identity::from_hex(&hash_hex)
                .map_err(|e| DriveError::DbError(format!("corrupt version row: {}", e)))?;
            versions.push(VersionName::new(index as u64, content_hash));
        }

        if versions.is_empty() {
            return Err(DriveError::NotFound(format!(
                "no versions for directory: {}",
                directory_id
            )));
        }
        Ok(versions)
    }

    pub fn remove_versions(&self, directory_id: &DirectoryId) -> DriveResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM directory_versions WHERE directory_id = ?1",
            params![directory_id.to_string()],
        )
        .map_err(|e| {
            warn!("LocalStoreDB: remove versions failed! {}", e);
            DriveError::DbError(e.to_string())
        })?;
        Ok(())
    }

    pub fn increment_references(&self, chunks: &[Identity]) -> DriveResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(|e| {
            warn!("LocalStoreDB: transaction failed! {}", e);
            DriveError::DbError(e.to_string())
        })?;

        let now = unix_timestamp() as i64;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunk_references (chunk_id, ref_count, update_time)
                 VALUES (?1, 1, ?2)
                 ON CONFLICT(chunk_id)
                 DO UPDATE SET ref_count = ref_count + 1, update_time = ?2",
                params![chunk.to_string(), now],
            )
            .map_err(|e| {
                warn!("LocalStoreDB: increment reference failed! {}", e);
                DriveError::DbError(e.to_string())
            })?;
        }

        tx.commit().map_err(|e| {
            warn!("LocalStoreDB: commit failed! {}", e);
            DriveError::DbError(e.to_string())
        })?;
        Ok(())
    }

    pub fn get_reference_count(&self, chunk: &Identity) -> DriveResult<u64> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT ref_count FROM chunk_references WHERE chunk_id = ?1")
            .map_err(|e| DriveError::DbError(e.to_string()))?;

        match stmt.query_row(params![chunk.to_string()], |row| row.get::<_, i64>(0)) {
            Ok(count) => Ok(count as u64),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => {
                warn!("LocalStoreDB: get reference count failed! {}", e);
                Err(DriveError::DbError(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, LocalStoreDB) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("store.db");
        let db = LocalStoreDB::new(db_path.to_string_lossy().to_string()).unwrap();
        (dir, db)
    }

    #[test]
    fn test_version_chain_append_and_prune() {
        let (_tmp, db) = temp_db();
        let dir_id = Identity::random();
        for i in 0..5u64 {
            let v = VersionName::new(i, Identity::hash_of(&i.to_le_bytes()));
            db.append_version(&dir_id, &v, 3).unwrap();
        }
        let chain = db.get_versions(&dir_id).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].index, 4);
        assert_eq!(chain[2].index, 2);
    }

    #[test]
    fn test_get_versions_not_found() {
        let (_tmp, db) = temp_db();
        let err = db.get_versions(&Identity::random()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_remove_versions() {
        let (_tmp, db) = temp_db();
        let dir_id = Identity::random();
        db.append_version(&dir_id, &VersionName::new(0, Identity::hash_of(b"v0")), 10)
            .unwrap();
        db.remove_versions(&dir_id).unwrap();
        assert!(db.get_versions(&dir_id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_reference_counts_accumulate() {
        let (_tmp, db) = temp_db();
        let a = Identity::hash_of(b"a");
        let b = Identity::hash_of(b"b");
        db.increment_references(&[a, b]).unwrap();
        db.increment_references(&[a]).unwrap();
        assert_eq!(db.get_reference_count(&a).unwrap(), 2);
        assert_eq!(db.get_reference_count(&b).unwrap(), 1);
        assert_eq!(db.get_reference_count(&Identity::hash_of(b"c")).unwrap(), 0);
    }
}
