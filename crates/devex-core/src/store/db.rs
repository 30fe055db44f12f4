//! SQLite-backed state store schema and synchronous operations (§4.D).
//!
//! `StateDb` itself is not `Sync` (rusqlite's `Connection` isn't); callers
//! reach it exclusively through the [`super::actor`] so writes are
//! serialized on a single background thread per §5's single-writer invariant.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use devex_schema::PerformanceMetric;

use crate::error::{CoreError, CoreResult};

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Synchronous SQLite handle implementing §4.D's four relations.
pub struct StateDb {
    conn: Connection,
}

impl StateDb {
    /// Opens (creating if absent) the database at `path`, applying any
    /// pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaError`] if a migration step fails.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Opens an in-memory database, for tests.
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> CoreResult<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMP NOT NULL
                );",
            )
            .map_err(|e| CoreError::SchemaError(e.to_string()))?;

        let current: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |r| r.get(0))
            .map_err(|e| CoreError::SchemaError(e.to_string()))?;

        for version in (current + 1)..=CURRENT_SCHEMA_VERSION {
            self.apply_migration(version)
                .map_err(|e| CoreError::SchemaError(format!("migration {version}: {e}")))?;
        }
        Ok(())
    }

    fn apply_migration(&self, version: i64) -> Result<(), rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        match version {
            1 => {
                tx.execute_batch(
                    "CREATE TABLE settings (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL,
                        updated_at TIMESTAMP NOT NULL
                    );
                    CREATE TABLE installed_apps (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        app_name TEXT NOT NULL UNIQUE
                    );
                    CREATE TABLE performance_metrics (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        app TEXT NOT NULL,
                        method TEXT NOT NULL,
                        platform TEXT NOT NULL,
                        download_time_ms INTEGER,
                        install_time_ms INTEGER NOT NULL,
                        total_time_ms INTEGER NOT NULL,
                        package_size INTEGER,
                        success INTEGER NOT NULL,
                        timestamp TIMESTAMP NOT NULL
                    );
                    CREATE INDEX idx_metrics_app ON performance_metrics(app);",
                )?;
            }
            other => unreachable!("no migration registered for schema version {other}"),
        }
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().to_rfc3339()],
        )?;
        tx.commit()
    }

    /// `Get(k)`: fails with [`CoreError::NotFound`] on a missing key.
    pub fn get(&self, key: &str) -> CoreResult<String> {
        self.conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?
            .ok_or_else(|| CoreError::NotFound(format!("setting '{key}'")))
    }

    /// `Set(k, v)`: upsert with a refreshed `updated_at` timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] if `key` is empty (§3 invariant:
    /// "`settings.key` never empty").
    pub fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::InvalidInput("settings key must not be empty".into()));
        }
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// `AddApp(name)`: idempotent -- a duplicate add returns success without change.
    pub fn add_app(&self, name: &str) -> CoreResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO installed_apps (app_name) VALUES (?1)",
            params![name],
        )?;
        Ok(())
    }

    /// `DeleteApp(name)`: fails with [`CoreError::NotFound`] if absent.
    pub fn delete_app(&self, name: &str) -> CoreResult<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM installed_apps WHERE app_name = ?1", params![name])?;
        if deleted == 0 {
            return Err(CoreError::NotFound(format!("app '{name}'")));
        }
        Ok(())
    }

    /// `GetApp(name) -> bool`.
    pub fn has_app(&self, name: &str) -> CoreResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM installed_apps WHERE app_name = ?1",
            params![name],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// `ListApps()`, sorted for determinism.
    pub fn list_apps(&self) -> CoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT app_name FROM installed_apps ORDER BY app_name")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// `RecordMetric(m)`.
    pub fn record_metric(&self, metric: &PerformanceMetric) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO performance_metrics
                (app, method, platform, download_time_ms, install_time_ms, total_time_ms, package_size, success, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                metric.app,
                metric.method,
                metric.platform,
                metric.download_time_ms,
                metric.install_time_ms,
                metric.total_time_ms,
                metric.package_size,
                metric.success,
                metric.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// `QueryMetrics(app, since)`, most recent first.
    pub fn query_metrics(&self, app: &str, since: Option<DateTime<Utc>>) -> CoreResult<Vec<PerformanceMetric>> {
        let since_str = since.map(|d| d.to_rfc3339()).unwrap_or_default();
        let mut stmt = self.conn.prepare(
            "SELECT app, method, platform, download_time_ms, install_time_ms, total_time_ms,
                    package_size, success, timestamp
             FROM performance_metrics
             WHERE app = ?1 AND timestamp >= ?2
             ORDER BY timestamp DESC",
        )?;
        let rows = stmt.query_map(params![app, since_str], |r| {
            let ts: String = r.get(8)?;
            Ok(PerformanceMetric {
                app: r.get(0)?,
                method: r.get(1)?,
                platform: r.get(2)?,
                download_time_ms: r.get(3)?,
                install_time_ms: r.get(4)?,
                total_time_ms: r.get(5)?,
                package_size: r.get(6)?,
                success: r.get(7)?,
                timestamp: DateTime::parse_from_rfc3339(&ts)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_missing_key_is_not_found() {
        let db = StateDb::open_in_memory().unwrap();
        assert!(matches!(db.get("nope"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn set_then_get_round_trips() {
        let db = StateDb::open_in_memory().unwrap();
        db.set("theme", "dark").unwrap();
        assert_eq!(db.get("theme").unwrap(), "dark");
        db.set("theme", "light").unwrap();
        assert_eq!(db.get("theme").unwrap(), "light");
    }

    #[test]
    fn set_rejects_empty_key() {
        let db = StateDb::open_in_memory().unwrap();
        assert!(db.set("", "x").is_err());
    }

    #[test]
    fn add_app_is_idempotent() {
        let db = StateDb::open_in_memory().unwrap();
        db.add_app("curl").unwrap();
        db.add_app("curl").unwrap();
        assert_eq!(db.list_apps().unwrap(), vec!["curl".to_string()]);
    }

    #[test]
    fn delete_missing_app_is_not_found() {
        let db = StateDb::open_in_memory().unwrap();
        assert!(matches!(db.delete_app("curl"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn delete_app_removes_it() {
        let db = StateDb::open_in_memory().unwrap();
        db.add_app("curl").unwrap();
        db.delete_app("curl").unwrap();
        assert!(!db.has_app("curl").unwrap());
    }

    #[test]
    fn record_and_query_metrics() {
        let db = StateDb::open_in_memory().unwrap();
        let metric = PerformanceMetric {
            app: "curl".into(),
            method: "package-manager-apt".into(),
            platform: "linux".into(),
            download_time_ms: Some(100),
            install_time_ms: 500,
            total_time_ms: 600,
            package_size: Some(1024),
            success: true,
            timestamp: Utc::now(),
        };
        db.record_metric(&metric).unwrap();
        let rows = db.query_metrics("curl", None).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].success);
    }
}
