//! Undo log (§4.F): an append-only operation journal referencing the
//! backup manager and state store, with rollback support.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use devex_schema::undo::assess_risks;
use devex_schema::{UndoKind, UndoOperation};

use crate::backup::BackupManager;
use crate::error::{CoreError, CoreResult};

/// Where the restore landed, returned by [`UndoLog::undo`] (§3 "Undo(id, force)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoredFrom {
    /// The undo entry's own `backup_id` was restorable directly.
    Backup,
    /// The backup restore failed; a version-based rollback succeeded instead.
    Version,
}

/// Result of an undo attempt (§4.F "Undo(id, force)" return shape).
#[derive(Debug)]
pub struct UndoOutcome {
    /// Whether the undo succeeded.
    pub success: bool,
    /// Which mechanism the restore used.
    pub restored_from: RestoredFrom,
    /// A fresh backup taken immediately before undoing, if that step succeeded.
    pub new_backup_id: Option<String>,
    /// Non-fatal warnings accumulated along the way.
    pub warnings: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct History {
    operations: Vec<UndoOperation>,
}

/// Append-only operation journal (§4.F).
pub struct UndoLog {
    history_path: PathBuf,
    history_limit: usize,
    backups: BackupManager,
}

impl UndoLog {
    /// Builds an undo log backed by `history_path` (typically
    /// `config/.undo-history.json`), retaining at most `history_limit`
    /// entries.
    pub fn new(history_path: PathBuf, history_limit: usize, backups: BackupManager) -> Self {
        Self {
            history_path,
            history_limit,
            backups,
        }
    }

    fn load(&self) -> CoreResult<History> {
        match std::fs::read_to_string(&self.history_path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| CoreError::Internal(format!("undo history: {e}")))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(History::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, history: &History) -> CoreResult<()> {
        if let Some(parent) = self.history_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(history)
            .map_err(|e| CoreError::Internal(format!("serializing undo history: {e}")))?;
        let tmp = self.history_path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.history_path)?;
        Ok(())
    }

    /// Step 1, "Record": snapshots via the backup manager, reads the current
    /// version, and persists a new entry at the head of the history.
    pub async fn record_operation(
        &self,
        kind: UndoKind,
        description: &str,
        target: &str,
        metadata: std::collections::HashMap<String, String>,
    ) -> CoreResult<UndoOperation> {
        let backup = self.backups.create_backup(description, target, false)?;
        let version_from = self.backups.current_version().await.ok();
        let risks = assess_risks(kind, target, &metadata);

        let entry = UndoOperation {
            id: format!("{}-{}", kind_tag(kind), Utc::now().format("%Y%m%d%H%M%S%3f")),
            timestamp: Utc::now(),
            kind,
            description: description.to_string(),
            target: target.to_string(),
            backup_id: backup.id,
            version_from,
            version_to: None,
            can_undo: true,
            risks,
            metadata,
            last_undo: None,
        };

        let mut history = self.load()?;
        history.operations.insert(0, entry.clone());
        self.evict_if_needed(&mut history)?;
        self.save(&history)?;
        Ok(entry)
    }

    /// Step 3, "Finalize": sets `version_to` by reading the store again, or
    /// marks the entry non-undoable if the version cannot be determined.
    pub async fn finalize_operation(&self, id: &str) -> CoreResult<()> {
        let mut history = self.load()?;
        let Some(entry) = history.operations.iter_mut().find(|e| e.id == id) else {
            return Err(CoreError::NotFound(format!("undo operation '{id}'")));
        };
        match self.backups.current_version().await {
            Ok(version) => entry.version_to = Some(version),
            Err(_) => entry.can_undo = false,
        }
        self.save(&history)?;
        Ok(())
    }

    fn evict_if_needed(&self, history: &mut History) -> CoreResult<()> {
        while history.operations.len() > self.history_limit {
            if let Some(evicted) = history.operations.pop() {
                // Cascade-delete the referenced backup; cleanup failures are warnings (§4.F).
                let _ = self.backups.delete_backup(&evicted.backup_id);
            }
        }
        Ok(())
    }

    /// `Undo(id, force)` (§4.F).
    ///
    /// Refuses an entry carrying risks unless `force` is set; restores the
    /// recorded backup, falling back to a version-based rollback if that
    /// fails; records the undo in history and bumps the version counter.
    pub async fn undo(&self, id: &str, force: bool, dest: &Path) -> CoreResult<UndoOutcome> {
        let mut history = self.load()?;
        let index = history
            .operations
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("undo operation '{id}'")))?;

        if !history.operations[index].can_undo {
            return Err(CoreError::ValidationFailed(format!("'{id}' cannot be undone")));
        }
        if !history.operations[index].risks.is_empty() && !force {
            return Err(CoreError::ValidationFailed(format!(
                "'{id}' carries risks: {}; re-run with force to proceed",
                history.operations[index].risks.join(", ")
            )));
        }

        let mut warnings = Vec::new();
        let pre_undo_backup = match self.backups.create_backup("pre-undo snapshot", "pre-undo", false) {
            Ok(meta) => Some(meta.id),
            Err(e) => {
                warnings.push(format!("pre-undo backup failed: {e}"));
                None
            }
        };

        let backup_id = history.operations[index].backup_id.clone();
        let version_from = history.operations[index].version_from;

        let restored_from = match self.backups.restore_backup(&backup_id, dest) {
            Ok(()) => RestoredFrom::Backup,
            Err(e) => {
                warnings.push(format!("backup restore failed ({e}); attempting version rollback"));
                let version = version_from.ok_or_else(|| {
                    CoreError::Internal("no recorded version to roll back to".into())
                })?;
                self.backups.rollback_to_version(version, dest)?;
                RestoredFrom::Version
            }
        };

        history.operations[index].can_undo = false;
        history.operations[index].last_undo = Some(Utc::now());
        self.save(&history)?;

        self.backups
            .update_version(&format!("undo of {id}"), vec![id.to_string()])
            .await?;

        Ok(UndoOutcome {
            success: true,
            restored_from,
            new_backup_id: pre_undo_backup,
            warnings,
        })
    }

    /// Returns the most recent undo-log entry, if any.
    pub fn last(&self) -> CoreResult<Option<UndoOperation>> {
        Ok(self.load()?.operations.into_iter().next())
    }

    /// Returns the full (bounded) history, most recent first.
    pub fn list(&self) -> CoreResult<Vec<UndoOperation>> {
        Ok(self.load()?.operations)
    }
}

fn kind_tag(kind: UndoKind) -> &'static str {
    match kind {
        UndoKind::Install => "install",
        UndoKind::Uninstall => "uninstall",
        UndoKind::Init => "init",
        UndoKind::ConfigChange => "config-change",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Repository;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn log(root: &Path) -> UndoLog {
        let config_dir = root.join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("apps.toml"), "installed = []").unwrap();
        let repo = Repository::open_in_memory().unwrap();
        let backups = BackupManager::new(config_dir, root.join("backups"), repo);
        UndoLog::new(root.join("config/.undo-history.json"), 20, backups)
    }

    #[tokio::test]
    async fn record_and_finalize_round_trip() {
        let root = tempdir().unwrap();
        let undo = log(root.path());
        let entry = undo
            .record_operation(UndoKind::Install, "install curl", "curl", HashMap::new())
            .await
            .unwrap();
        assert!(entry.can_undo);
        assert!(entry.risks.is_empty());

        undo.finalize_operation(&entry.id).await.unwrap();
        let last = undo.last().unwrap().unwrap();
        assert_eq!(last.id, entry.id);
        assert!(last.version_to.is_some());
    }

    #[tokio::test]
    async fn undo_refuses_risky_without_force() {
        let root = tempdir().unwrap();
        let undo = log(root.path());
        let entry = undo
            .record_operation(UndoKind::Init, "reinit", "", HashMap::new())
            .await
            .unwrap();
        let dest = root.path().join("restored");
        let err = undo.undo(&entry.id, false, &dest).await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn undo_round_trip_restores_snapshot_and_marks_terminal() {
        let root = tempdir().unwrap();
        let undo = log(root.path());
        let entry = undo
            .record_operation(UndoKind::Install, "install curl", "curl", HashMap::new())
            .await
            .unwrap();

        std::fs::write(root.path().join("config/apps.toml"), "installed = [\"curl\"]").unwrap();
        undo.finalize_operation(&entry.id).await.unwrap();

        let dest = root.path().join("config");
        let outcome = undo.undo(&entry.id, false, &dest).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.restored_from, RestoredFrom::Backup);

        let contents = std::fs::read_to_string(dest.join("apps.toml")).unwrap();
        assert_eq!(contents, "installed = []");

        let last = undo.last().unwrap().unwrap();
        assert!(!last.can_undo);
        assert!(last.last_undo.is_some());
    }
}
