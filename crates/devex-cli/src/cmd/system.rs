//! `devex system` (§6): a summary of the local devex installation.

use anyhow::{Context, Result};

use crate::env::RunEnv;

/// Prints `$DEVEX_HOME`, the target user, the installed-app count, and the
/// current config version.
pub async fn run(user: Option<String>) -> Result<i32> {
    let env = RunEnv::open().await.context("preparing run environment")?;
    let target_user = user.or_else(devex_core::Config::target_user).unwrap_or_else(|| "unknown".to_string());

    let installed = env.repo.list_apps().await.context("listing installed apps")?;
    let version = env.backups.current_version().await.unwrap_or(0);

    println!("devex home:     {}", env.config.devex_home.display());
    println!("target user:    {target_user}");
    println!("config version: {version}");
    println!("installed apps: {}", installed.len());
    for app in &installed {
        println!("  - {app}");
    }
    println!("noninteractive: {}", env.config.noninteractive);
    println!("trusted domains: {}", env.config.trusted_domains.join(", "));

    Ok(crate::cmd::exit::SUCCESS)
}
