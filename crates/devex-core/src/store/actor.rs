//! Single-writer actor hosting the SQLite [`StateDb`] (§4.D, §5).
//!
//! `rusqlite::Connection` is not `Sync`, so the connection lives on a
//! dedicated background thread; every operation is a message round-trip.
//! This is what gives the store its single-writer, many-readers guarantee
//! without an explicit mutex at the call site.

use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use devex_schema::PerformanceMetric;

use crate::error::{CoreError, CoreResult};
use crate::store::db::StateDb;

type Reply<T> = oneshot::Sender<CoreResult<T>>;

enum Event {
    Get { key: String, resp: Reply<String> },
    Set { key: String, value: String, resp: Reply<()> },
    AddApp { name: String, resp: Reply<()> },
    DeleteApp { name: String, resp: Reply<()> },
    HasApp { name: String, resp: Reply<bool> },
    ListApps { resp: Reply<Vec<String>> },
    RecordMetric { metric: Box<PerformanceMetric>, resp: Reply<()> },
    QueryMetrics { app: String, since: Option<DateTime<Utc>>, resp: Reply<Vec<PerformanceMetric>> },
    Shutdown,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get { key, .. } => f.debug_struct("Get").field("key", key).finish_non_exhaustive(),
            Self::Set { key, .. } => f.debug_struct("Set").field("key", key).finish_non_exhaustive(),
            Self::AddApp { name, .. } => f.debug_struct("AddApp").field("name", name).finish_non_exhaustive(),
            Self::DeleteApp { name, .. } => f.debug_struct("DeleteApp").field("name", name).finish_non_exhaustive(),
            Self::HasApp { name, .. } => f.debug_struct("HasApp").field("name", name).finish_non_exhaustive(),
            Self::ListApps { .. } => write!(f, "ListApps"),
            Self::RecordMetric { .. } => write!(f, "RecordMetric"),
            Self::QueryMetrics { app, .. } => f.debug_struct("QueryMetrics").field("app", app).finish_non_exhaustive(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// `Send + Sync + Clone` handle to the state store (§4.D "Repository").
#[derive(Clone)]
pub struct Repository {
    sender: mpsc::Sender<Event>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

impl Repository {
    /// Opens the database at `path` on a dedicated background thread and
    /// returns a cloneable handle to it.
    pub fn open(path: PathBuf) -> CoreResult<Self> {
        let db = StateDb::open(&path)?;
        Ok(Self::spawn(db))
    }

    /// Opens an in-memory database for tests.
    pub fn open_in_memory() -> CoreResult<Self> {
        let db = StateDb::open_in_memory()?;
        Ok(Self::spawn(db))
    }

    fn spawn(db: StateDb) -> Self {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || run_event_loop(db, receiver));
        Self { sender }
    }

    async fn request<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(Reply<T>) -> Event,
    {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(f(tx))
            .map_err(|_| CoreError::Internal("state store actor is gone".into()))?;
        rx.await.map_err(|_| CoreError::Internal("state store actor dropped the reply".into()))?
    }

    /// `Get(k)`.
    pub async fn get(&self, key: impl Into<String>) -> CoreResult<String> {
        let key = key.into();
        self.request(|resp| Event::Get { key, resp }).await
    }

    /// `Set(k, v)`.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) -> CoreResult<()> {
        let key = key.into();
        let value = value.into();
        self.request(|resp| Event::Set { key, value, resp }).await
    }

    /// `AddApp(name)`.
    pub async fn add_app(&self, name: impl Into<String>) -> CoreResult<()> {
        let name = name.into();
        self.request(|resp| Event::AddApp { name, resp }).await
    }

    /// `DeleteApp(name)`.
    pub async fn delete_app(&self, name: impl Into<String>) -> CoreResult<()> {
        let name = name.into();
        self.request(|resp| Event::DeleteApp { name, resp }).await
    }

    /// `GetApp(name) -> bool`.
    pub async fn has_app(&self, name: impl Into<String>) -> CoreResult<bool> {
        let name = name.into();
        self.request(|resp| Event::HasApp { name, resp }).await
    }

    /// `ListApps()`.
    pub async fn list_apps(&self) -> CoreResult<Vec<String>> {
        self.request(|resp| Event::ListApps { resp }).await
    }

    /// `RecordMetric(m)`.
    pub async fn record_metric(&self, metric: PerformanceMetric) -> CoreResult<()> {
        let metric = Box::new(metric);
        self.request(|resp| Event::RecordMetric { metric, resp }).await
    }

    /// `QueryMetrics(app, since)`.
    pub async fn query_metrics(&self, app: impl Into<String>, since: Option<DateTime<Utc>>) -> CoreResult<Vec<PerformanceMetric>> {
        let app = app.into();
        self.request(|resp| Event::QueryMetrics { app, since, resp }).await
    }

    /// Requests a graceful shutdown of the background thread. The actor
    /// also stops automatically once every handle is dropped.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Event::Shutdown);
    }
}

#[allow(clippy::needless_pass_by_value)]
fn run_event_loop(db: StateDb, receiver: mpsc::Receiver<Event>) {
    while let Ok(event) = receiver.recv() {
        match event {
            Event::Get { key, resp } => {
                let _ = resp.send(db.get(&key));
            }
            Event::Set { key, value, resp } => {
                let _ = resp.send(db.set(&key, &value));
            }
            Event::AddApp { name, resp } => {
                let _ = resp.send(db.add_app(&name));
            }
            Event::DeleteApp { name, resp } => {
                let _ = resp.send(db.delete_app(&name));
            }
            Event::HasApp { name, resp } => {
                let _ = resp.send(db.has_app(&name));
            }
            Event::ListApps { resp } => {
                let _ = resp.send(db.list_apps());
            }
            Event::RecordMetric { metric, resp } => {
                let _ = resp.send(db.record_metric(&metric));
            }
            Event::QueryMetrics { app, since, resp } => {
                let _ = resp.send(db.query_metrics(&app, since));
            }
            Event::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_app_then_list_round_trips() {
        let repo = Repository::open_in_memory().unwrap();
        repo.add_app("curl").await.unwrap();
        assert_eq!(repo.list_apps().await.unwrap(), vec!["curl".to_string()]);
        assert!(repo.has_app("curl").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_add_app_is_idempotent() {
        let repo = Repository::open_in_memory().unwrap();
        repo.add_app("curl").await.unwrap();
        repo.add_app("curl").await.unwrap();
        assert_eq!(repo.list_apps().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_missing_setting_is_not_found() {
        let repo = Repository::open_in_memory().unwrap();
        assert!(matches!(repo.get("nope").await, Err(CoreError::NotFound(_))));
    }
}
