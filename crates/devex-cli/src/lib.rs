//! devex - installation orchestration CLI.
//!
//! This binary is the one ambient surface the core owns directly: a thin
//! `clap` entry point over `devex-core`'s pipeline runner, undo log, and
//! state store (§1, §6). The catalog itself -- parsing the declarative
//! YAML application list -- and the terminal UI renderer are out of tree;
//! this crate only assembles the orchestration core and reports outcomes.

pub mod catalog;
pub mod cmd;
pub mod env;
pub mod error;
pub mod logging;

pub use error::CliError;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// devex - cross-platform developer environment bootstrapper.
#[derive(Debug, Parser)]
#[command(name = "devex")]
#[command(author, version, about = "Install, remove, and roll back your dev environment")]
pub struct Cli {
    /// Path to the JSON application catalog (§1 "Out of scope": the YAML
    /// loader that produces one is a separate, unbuilt crate).
    #[arg(long, global = true, default_value = "catalog.json")]
    pub catalog: PathBuf,

    /// Platform tag selecting which app variant applies (§1 "the core
    /// accepts a platform tag rather than detecting it").
    #[arg(long, global = true, default_value = "linux")]
    pub platform: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands (§6 "CLI surface").
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install one or more applications from the catalog.
    Install {
        /// App names to install; combined with `--categories` if both are given.
        apps: Vec<String>,
        /// Install every default app in these categories instead of naming apps.
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
        /// Report the plan without invoking any strategy or mutating the filesystem.
        #[arg(long)]
        dry_run: bool,
        /// Emit per-step tracing at debug level.
        #[arg(long)]
        verbose: bool,
        /// Continue past a per-app failure of any kind, not just the
        /// kinds that continue by default (§7 propagation policy).
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Uninstall one or more installed applications.
    Uninstall {
        /// App names to uninstall.
        #[arg(required = true)]
        apps: Vec<String>,
    },
    /// Print a summary of the local devex installation.
    System {
        /// Report on behalf of this user instead of `SUDO_USER`/`USER` (§6).
        #[arg(long)]
        user: Option<String>,
    },
    /// Inspect or roll back recorded operations: `undo last`, `undo list`,
    /// or `undo <op-id>` (§6).
    Undo {
        /// `last`, `list`, or a specific operation id from `undo list`.
        target: String,
        /// Proceed even if the targeted operation carries recorded risks.
        #[arg(long)]
        force: bool,
    },
}
