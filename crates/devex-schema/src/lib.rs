//! Shared data model for the devex installation orchestration core.
//!
//! This crate holds only plain data: application descriptors, the undo/backup
//! records, progress state, and the `SecureSecret` container. It has no I/O
//! and no knowledge of how any of these types are persisted or rendered --
//! that belongs to `devex-core` and `devex-cli`.

/// Application descriptor and its nested value types (§3 "Application descriptor").
pub mod app;
/// Backup metadata (§4.E).
pub mod backup;
/// Performance metric rows recorded by the state store (§3 "Repository").
pub mod metrics;
/// Hierarchical progress state and stepped-operation weighting (§4.K).
pub mod progress;
/// Single-owner secret byte buffer (§3 "SecureSecret").
pub mod secret;
/// Undo log entries and the risk assessor (§4.F).
pub mod undo;

pub use app::{AppDescriptor, AppName, ConfigFile, ContainerSpec, InstallMethod, PreInstallStep};
pub use backup::BackupMeta;
pub use metrics::PerformanceMetric;
pub use progress::{ProgressState, ProgressStatus, SteppedOperation, Step};
pub use secret::SecureSecret;
pub use undo::{UndoKind, UndoOperation};
