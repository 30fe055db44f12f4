//! CLI-boundary errors, distinct from `devex_core::CoreError`: these are
//! raised by the command layer itself, before any core operation runs.
//!
//! Matching the teacher's split, domain errors are `thiserror`-derived and
//! get wrapped in `anyhow::Error` the moment they cross into a command
//! function's `Result` (§7 "CLI boundary").

use thiserror::Error;

/// Errors raised directly by a `cmd::` function.
#[derive(Debug, Error)]
pub enum CliError {
    /// `install` was invoked with neither app names nor `--categories`.
    #[error("no apps selected: pass app names or --categories")]
    NoAppsSelected,
    /// An app name was not present in the loaded catalog.
    #[error("'{0}' is not in the catalog")]
    UnknownApp(String),
}
