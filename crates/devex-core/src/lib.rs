//! Installation orchestration core for the devex bootstrapper.
//!
//! This crate holds every piece of business logic described by the
//! component design: validating untrusted input before it reaches a
//! subprocess or the network, supervising child processes, scanning their
//! output, persisting state behind a single-writer actor, snapshotting and
//! restoring the config tree, recording an undoable history, resolving
//! dependency order, dispatching installs through a strategy registry,
//! estimating risk before committing to a change, and tracking progress
//! across a run. None of it is aware of a terminal or a CLI argument parser
//! -- that belongs to the binary that links this crate.

/// Heuristic pre-install risk and cost warnings.
pub mod analyzer;
/// Config-tree snapshotting, restoring, and version bookkeeping.
pub mod backup;
/// Typed runtime configuration loaded from `config.toml` and the environment.
pub mod config;
/// The closed error taxonomy threaded through every subsystem.
pub mod error;
/// Resolves a requested app set into dependency order and drives each app
/// through analysis, undo recording, and dispatch.
pub mod pipeline;
/// Subprocess supervision: command screening, spawning, and graceful
/// termination.
pub mod process;
/// Hierarchical progress tracking with listener fan-out.
pub mod progress;
/// Dependency-order resolution with cycle detection.
pub mod resolver;
/// Input validation for URLs, binary names, paths, and script content.
pub mod security;
/// Durable state: the settings/installed-apps/metrics store behind a
/// single-writer actor.
pub mod store;
/// The dispatch registry and its concrete install strategies.
pub mod strategies;
/// Child-process output cleaning, de-spamming, and password-prompt brokering.
pub mod stream;
/// The append-only undo log and its restore/rollback paths.
pub mod undo;

pub use backup::BackupManager;
pub use config::Config;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use pipeline::{AppOutcome, AppResult, PipelineOptions, PipelineRunner};
pub use progress::ProgressTracker;
pub use security::SecurityValidator;
pub use store::Repository;
pub use strategies::{InstallContext, StrategyRegistry};
pub use undo::UndoLog;
