//! Shared per-invocation state, grouped the way the teacher's `ops::Context`
//! groups database/index/client/reporter handles to cut argument fatigue.

use anyhow::{Context, Result};
use devex_core::{BackupManager, Config, Repository, SecurityValidator, UndoLog};

/// Everything a command needs once `Config::load` and the state store are
/// open: the config itself, a store handle, the security validator, the
/// undo log, and a second backup-manager handle for read-only queries
/// (§2 data flow).
pub struct RunEnv {
    /// Loaded once at process start, environment overrides already applied.
    pub config: Config,
    /// Handle to the settings/installed-apps/metrics store.
    pub repo: Repository,
    /// Validates every external-origin string before a command acts on it.
    pub validator: SecurityValidator,
    /// The append-only undo log backing `undo last`/`undo list`/`undo <id>`.
    pub undo: UndoLog,
    /// A second handle for read-only backup/version queries (`system`).
    pub backups: BackupManager,
}

impl RunEnv {
    /// Loads configuration and opens the state store at its configured path,
    /// creating `$DEVEX_HOME` on first run.
    pub async fn open() -> Result<Self> {
        let config = Config::load().context("loading configuration")?;
        std::fs::create_dir_all(&config.devex_home)
            .with_context(|| format!("creating {}", config.devex_home.display()))?;
        std::fs::create_dir_all(config.config_dir())
            .with_context(|| format!("creating {}", config.config_dir().display()))?;

        let repo = Repository::open(config.db_path()).context("opening state store")?;
        let validator = SecurityValidator::new(config.trusted_domains.clone());

        let undo_backups = BackupManager::new(config.config_dir(), config.backups_dir(), repo.clone());
        let undo = UndoLog::new(config.undo_history_path(), config.history_limit, undo_backups);
        let backups = BackupManager::new(config.config_dir(), config.backups_dir(), repo.clone());

        Ok(Self {
            config,
            repo,
            validator,
            undo,
            backups,
        })
    }
}
