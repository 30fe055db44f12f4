//! `devex undo` (§6): `undo last`, `undo list`, `undo <op-id>`.

use anyhow::{Context, Result};
use devex_core::{CoreError, ErrorKind};

use crate::cmd::exit;
use crate::env::RunEnv;

/// Dispatches on `target`: the literal `last`/`list`, or an operation id.
pub async fn run(target: &str, force: bool) -> Result<i32> {
    let env = RunEnv::open().await.context("preparing run environment")?;

    match target {
        "list" => {
            let history = env.undo.list().context("listing undo history")?;
            if history.is_empty() {
                println!("no recorded operations");
            }
            for entry in &history {
                let risk = if entry.risks.is_empty() { String::new() } else { format!(" risks: {}", entry.risks.join(", ")) };
                println!("{} [{:?}] {} ({}){risk}", entry.id, entry.kind, entry.description, if entry.can_undo { "undoable" } else { "final" });
            }
            Ok(exit::SUCCESS)
        }
        "last" => {
            let Some(entry) = env.undo.last().context("reading undo history")? else {
                println!("no recorded operations");
                return Ok(exit::VALIDATION);
            };
            undo_one(&env, &entry.id, force).await
        }
        op_id => undo_one(&env, op_id, force).await,
    }
}

async fn undo_one(env: &RunEnv, op_id: &str, force: bool) -> Result<i32> {
    let dest = env.config.config_dir();
    match env.undo.undo(op_id, force, &dest).await {
        Ok(outcome) => {
            println!("undid {op_id} (restored from {:?})", outcome.restored_from);
            for warning in &outcome.warnings {
                println!("warning: {warning}");
            }
            Ok(exit::SUCCESS)
        }
        Err(e) => {
            println!("failed to undo {op_id}: {e}");
            Ok(exit_code_for(&e))
        }
    }
}

fn exit_code_for(e: &CoreError) -> i32 {
    match e.kind() {
        ErrorKind::InvalidInput | ErrorKind::NotFound | ErrorKind::ValidationFailed => exit::VALIDATION,
        ErrorKind::Cancelled => exit::INTERRUPTED,
        _ => exit::FATAL,
    }
}
