//! Typed runtime configuration, loaded from `config.toml` with environment
//! overrides applied last (§2.1, §6).

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

/// Default trusted-domain bootstrap set (§6).
pub const DEFAULT_TRUSTED_DOMAINS: &[&str] = &[
    "mise.run",
    "mise.jdx.dev",
    "get.docker.com",
    "download.docker.com",
    "raw.githubusercontent.com",
];

const DEFAULT_HISTORY_LIMIT: usize = 20;
const DEFAULT_APT_REFRESH_HOURS: u64 = 24;

/// Optional on-disk shape of `$DEVEX_HOME/config.toml`; every field is
/// optional so an absent or partial file falls back to [`Config::default`].
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    devex_home: Option<PathBuf>,
    noninteractive: Option<bool>,
    no_color: Option<bool>,
    trusted_domains: Option<Vec<String>>,
    history_limit: Option<usize>,
    apt_refresh_hours: Option<u64>,
}

/// Process-wide runtime configuration (§2.1 "Config").
#[derive(Debug, Clone)]
pub struct Config {
    /// Home directory for all persisted state (`$DEVEX_HOME`, default `~/.devex`).
    pub devex_home: PathBuf,
    /// Suppress the TUI and use non-interactive defaults for prompts.
    pub noninteractive: bool,
    /// Strip ANSI color from UI sink output.
    pub no_color: bool,
    /// Domains eligible for outbound fetches, beyond the built-in bootstrap set.
    pub trusted_domains: Vec<String>,
    /// Number of undo-log entries retained before eviction (§3 "Undo operation").
    pub history_limit: usize,
    /// Cooldown window for APT-style repository refreshes (§4.G).
    pub apt_refresh_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devex_home: default_devex_home(),
            noninteractive: false,
            no_color: false,
            trusted_domains: DEFAULT_TRUSTED_DOMAINS.iter().map(|s| (*s).to_string()).collect(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            apt_refresh_interval: Duration::from_secs(DEFAULT_APT_REFRESH_HOURS * 3600),
        }
    }
}

fn default_devex_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".devex")
}

impl Config {
    /// Loads configuration the way the core does it at process start: defaults,
    /// then an optional `config.toml` under `$DEVEX_HOME`, then environment
    /// variables, which win over both (§2.1, §6).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] if a present `config.toml` cannot be
    /// parsed as TOML.
    pub fn load() -> CoreResult<Self> {
        let mut config = Self::default();

        // DEVEX_HOME must be resolved before we know where to look for config.toml.
        if let Ok(home) = std::env::var("DEVEX_HOME") {
            config.devex_home = PathBuf::from(home);
        }

        let file_path = config.devex_home.join("config.toml");
        if let Ok(contents) = std::fs::read_to_string(&file_path) {
            let file: ConfigFile = toml::from_str(&contents)
                .map_err(|e| CoreError::Internal(format!("parsing {}: {e}", file_path.display())))?;
            config.apply_file(file);
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(home) = file.devex_home {
            self.devex_home = home;
        }
        if let Some(v) = file.noninteractive {
            self.noninteractive = v;
        }
        if let Some(v) = file.no_color {
            self.no_color = v;
        }
        if let Some(domains) = file.trusted_domains {
            self.trusted_domains = domains;
        }
        if let Some(v) = file.history_limit {
            self.history_limit = v;
        }
        if let Some(hours) = file.apt_refresh_hours {
            self.apt_refresh_interval = Duration::from_secs(hours * 3600);
        }
    }

    fn apply_env(&mut self) {
        if let Ok(home) = std::env::var("DEVEX_HOME") {
            self.devex_home = PathBuf::from(home);
        }
        if std::env::var("DEVEX_NONINTERACTIVE").is_ok() {
            self.noninteractive = true;
        }
        if std::env::var("NO_COLOR").is_ok() {
            self.no_color = true;
        }
    }

    /// `$DEVEX_HOME/config/` -- the backed-up user configuration tree.
    pub fn config_dir(&self) -> PathBuf {
        self.devex_home.join("config")
    }

    /// `$DEVEX_HOME/config/.undo-history.json`.
    pub fn undo_history_path(&self) -> PathBuf {
        self.config_dir().join(".undo-history.json")
    }

    /// `$DEVEX_HOME/installed_apps.db`.
    pub fn db_path(&self) -> PathBuf {
        self.devex_home.join("installed_apps.db")
    }

    /// `$DEVEX_HOME/backups/`.
    pub fn backups_dir(&self) -> PathBuf {
        self.devex_home.join("backups")
    }

    /// `$DEVEX_HOME/logs/`.
    pub fn log_dir(&self) -> PathBuf {
        self.devex_home.join("logs")
    }

    /// The user to act on behalf of when privileges were elevated (§6).
    pub fn target_user() -> Option<String> {
        std::env::var("SUDO_USER")
            .ok()
            .or_else(|| std::env::var("USER").ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_seed_trusted_domains() {
        let config = Config::default();
        assert!(config.trusted_domains.iter().any(|d| d == "mise.run"));
        assert_eq!(config.history_limit, 20);
    }

    #[test]
    fn env_devex_home_overrides_default() {
        // SAFETY-adjacent ordering note: tests setting global env vars share
        // process state; this test only reads back what it itself sets.
        unsafe {
            std::env::set_var("DEVEX_HOME", "/tmp/devex-test-home");
        }
        let config = Config::load().expect("load");
        assert_eq!(config.devex_home, PathBuf::from("/tmp/devex-test-home"));
        unsafe {
            std::env::remove_var("DEVEX_HOME");
        }
    }
}
