//! Backup & version manager (§4.E): snapshots the configuration tree and
//! maintains a monotonic config-version history alongside it.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use devex_schema::BackupMeta;

use crate::error::{CoreError, CoreResult};
use crate::store::Repository;

const CURRENT_VERSION_KEY: &str = "current_version";
const VERSION_LOG_LIMIT: usize = 50;

/// One entry in the version log (§4.E "Version").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    /// The version number this entry bumped to.
    pub version: u64,
    /// Human-readable description of the change.
    pub description: String,
    /// Free-form list of changed item names.
    pub changes: Vec<String>,
    /// Backup id this version's state is recoverable from.
    pub backup_id: String,
    /// When the bump happened.
    pub timestamp: chrono::DateTime<Utc>,
}

/// On-disk index of backups and the version log, stored as
/// `backups/index.json` (§6 persisted layout).
#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    backups: Vec<BackupMeta>,
    versions: Vec<VersionEntry>,
}

/// Manages configuration-tree snapshots and the monotonic version counter (§4.E).
pub struct BackupManager {
    config_dir: PathBuf,
    backups_dir: PathBuf,
    repo: Repository,
}

impl BackupManager {
    /// Builds a manager rooted at `config_dir` (the tree snapshots cover)
    /// with backup payloads and the index under `backups_dir`.
    pub fn new(config_dir: PathBuf, backups_dir: PathBuf, repo: Repository) -> Self {
        Self {
            config_dir,
            backups_dir,
            repo,
        }
    }

    fn index_path(&self) -> PathBuf {
        self.backups_dir.join("index.json")
    }

    fn load_index(&self) -> CoreResult<Index> {
        match std::fs::read_to_string(self.index_path()) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| CoreError::Internal(format!("backup index: {e}")))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Index::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_index(&self, index: &Index) -> CoreResult<()> {
        std::fs::create_dir_all(&self.backups_dir)?;
        let contents = serde_json::to_string_pretty(index)
            .map_err(|e| CoreError::Internal(format!("serializing backup index: {e}")))?;
        // Atomic write-and-rename, matching the undo history's durability rule (§4.F, §5).
        let tmp = self.index_path().with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, self.index_path())?;
        Ok(())
    }

    /// Snapshots the configuration directory, recording it under `tag`
    /// (typically the undo-op id or `"pre-undo"`), optionally compressed.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the configuration directory cannot be read
    /// or the snapshot cannot be written.
    pub fn create_backup(&self, description: &str, tag: &str, compressed: bool) -> CoreResult<BackupMeta> {
        let now = Utc::now();
        let id = BackupMeta::make_id("config", now);
        std::fs::create_dir_all(&self.backups_dir)?;

        let path = if compressed {
            let archive_name = format!("{id}.tar.zst");
            self.write_compressed_snapshot(&self.backups_dir.join(&archive_name))?;
            archive_name
        } else {
            let dir_name = id.clone();
            self.write_directory_snapshot(&self.backups_dir.join(&dir_name))?;
            dir_name
        };

        let meta = BackupMeta {
            id: id.clone(),
            created_at: now,
            description: description.to_string(),
            tag: tag.to_string(),
            compressed,
            path,
        };

        let mut index = self.load_index()?;
        index.backups.push(meta.clone());
        self.save_index(&index)?;
        Ok(meta)
    }

    fn write_directory_snapshot(&self, dest: &Path) -> CoreResult<()> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(dest)?;
            return Ok(());
        }
        let mut options = fs_extra::dir::CopyOptions::new();
        options.copy_inside = true;
        fs_extra::dir::copy(&self.config_dir, dest, &options)
            .map_err(|e| CoreError::Internal(format!("copying config tree: {e}")))?;
        Ok(())
    }

    fn write_compressed_snapshot(&self, dest: &Path) -> CoreResult<()> {
        let file = std::fs::File::create(dest)?;
        let encoder = zstd::stream::Encoder::new(file, 0)?.auto_finish();
        let mut builder = tar::Builder::new(encoder);
        if self.config_dir.exists() {
            builder.append_dir_all(".", &self.config_dir)?;
        }
        builder.finish()?;
        Ok(())
    }

    /// Extracts the snapshot for `backup_id` atomically: writes to a sibling
    /// path, then renames over `dest` (§4.E "RestoreBackup").
    pub fn restore_backup(&self, backup_id: &str, dest: &Path) -> CoreResult<()> {
        let index = self.load_index()?;
        let meta = index
            .backups
            .iter()
            .find(|b| b.id == backup_id)
            .ok_or_else(|| CoreError::NotFound(format!("backup '{backup_id}'")))?;

        let staging = dest.with_extension("restore-staging");
        let _ = std::fs::remove_dir_all(&staging);

        if meta.compressed {
            let archive_path = self.backups_dir.join(&meta.path);
            let file = std::fs::File::open(&archive_path)?;
            let decoder = zstd::stream::Decoder::new(file)?;
            let mut archive = tar::Archive::new(decoder);
            std::fs::create_dir_all(&staging)?;
            archive.unpack(&staging)?;
        } else {
            let source = self.backups_dir.join(&meta.path);
            let mut options = fs_extra::dir::CopyOptions::new();
            options.copy_inside = true;
            fs_extra::dir::copy(&source, &staging, &options)
                .map_err(|e| CoreError::Internal(format!("staging restore: {e}")))?;
        }

        if dest.exists() {
            std::fs::remove_dir_all(dest)?;
        }
        std::fs::rename(&staging, dest)?;
        Ok(())
    }

    /// Removes a backup's metadata and payload (§4.E "DeleteBackup").
    ///
    /// Cleanup failures on the payload are tolerated (best-effort), matching
    /// the undo log's "cleanup failures are warnings" posture (§4.F).
    pub fn delete_backup(&self, backup_id: &str) -> CoreResult<()> {
        let mut index = self.load_index()?;
        let Some(pos) = index.backups.iter().position(|b| b.id == backup_id) else {
            return Err(CoreError::NotFound(format!("backup '{backup_id}'")));
        };
        let meta = index.backups.remove(pos);
        let payload = self.backups_dir.join(&meta.path);
        if meta.compressed {
            let _ = std::fs::remove_file(&payload);
        } else {
            let _ = std::fs::remove_dir_all(&payload);
        }
        self.save_index(&index)?;
        Ok(())
    }

    /// Reads the current version from the state store, defaulting to `0`.
    pub async fn current_version(&self) -> CoreResult<u64> {
        match self.repo.get(CURRENT_VERSION_KEY).await {
            Ok(value) => Ok(value.parse().unwrap_or(0)),
            Err(CoreError::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Bumps the version counter, appends a version-log entry tied to a
    /// fresh backup, and ring-buffers the log to [`VERSION_LOG_LIMIT`].
    pub async fn update_version(&self, description: &str, changes: Vec<String>) -> CoreResult<u64> {
        let backup = self.create_backup(description, "version-bump", false)?;
        let next = self.current_version().await? + 1;
        self.repo.set(CURRENT_VERSION_KEY, next.to_string()).await?;

        let mut index = self.load_index()?;
        index.versions.push(VersionEntry {
            version: next,
            description: description.to_string(),
            changes,
            backup_id: backup.id,
            timestamp: Utc::now(),
        });
        if index.versions.len() > VERSION_LOG_LIMIT {
            let evicted: Vec<VersionEntry> = index
                .versions
                .drain(..index.versions.len() - VERSION_LOG_LIMIT)
                .collect();
            for entry in evicted {
                let _ = self.delete_backup(&entry.backup_id);
            }
        }
        self.save_index(&index)?;
        Ok(next)
    }

    /// Restores the snapshot associated with version `v` (§4.E "RollbackToVersion").
    pub fn rollback_to_version(&self, version: u64, dest: &Path) -> CoreResult<()> {
        let index = self.load_index()?;
        let entry = index
            .versions
            .iter()
            .find(|v| v.version == version)
            .ok_or_else(|| CoreError::NotFound(format!("version {version}")))?;
        self.restore_backup(&entry.backup_id, dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(root: &Path) -> BackupManager {
        let config_dir = root.join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("settings.toml"), "theme = \"dark\"").unwrap();
        let repo = Repository::open_in_memory().unwrap();
        BackupManager::new(config_dir, root.join("backups"), repo)
    }

    #[test]
    fn create_and_restore_uncompressed_backup() {
        let root = tempdir().unwrap();
        let mgr = manager(root.path());
        let meta = mgr.create_backup("initial snapshot", "test", false).unwrap();

        std::fs::write(mgr.config_dir.join("settings.toml"), "theme = \"light\"").unwrap();

        let dest = root.path().join("restored");
        mgr.restore_backup(&meta.id, &dest).unwrap();
        let restored = std::fs::read_to_string(dest.join("settings.toml")).unwrap();
        assert_eq!(restored, "theme = \"dark\"");
    }

    #[test]
    fn create_and_restore_compressed_backup() {
        let root = tempdir().unwrap();
        let mgr = manager(root.path());
        let meta = mgr.create_backup("compressed snapshot", "test", true).unwrap();
        assert!(meta.compressed);

        let dest = root.path().join("restored");
        mgr.restore_backup(&meta.id, &dest).unwrap();
        assert!(dest.join("settings.toml").exists());
    }

    #[test]
    fn delete_backup_removes_metadata_and_payload() {
        let root = tempdir().unwrap();
        let mgr = manager(root.path());
        let meta = mgr.create_backup("snapshot", "test", false).unwrap();
        mgr.delete_backup(&meta.id).unwrap();
        assert!(mgr.delete_backup(&meta.id).is_err());
    }

    #[tokio::test]
    async fn update_version_increments_and_persists() {
        let root = tempdir().unwrap();
        let mgr = manager(root.path());
        assert_eq!(mgr.current_version().await.unwrap(), 0);
        let v1 = mgr.update_version("first change", vec!["a".into()]).await.unwrap();
        assert_eq!(v1, 1);
        let v2 = mgr.update_version("second change", vec!["b".into()]).await.unwrap();
        assert_eq!(v2, 2);
        assert_eq!(mgr.current_version().await.unwrap(), 2);
    }
}
