//! `devex uninstall` (§6).

use std::collections::HashMap;

use anyhow::{Context, Result};
use devex_core::{CoreError, ErrorKind, InstallContext, StrategyRegistry};
use devex_schema::{AppName, UndoKind};

use crate::catalog;
use crate::cmd::exit;
use crate::env::RunEnv;

/// Uninstalls each of `apps`, recording an undo checkpoint for every one
/// that was actually installed.
pub async fn run(catalog_path: &std::path::Path, platform: &str, apps: &[String]) -> Result<i32> {
    let env = RunEnv::open().await.context("preparing run environment")?;
    let full_catalog = catalog::load(catalog_path)?;
    let registry = StrategyRegistry::new();
    let ctx = InstallContext::new(env.validator.clone(), env.config.apt_refresh_interval);

    let mut worst = exit::SUCCESS;

    for app in apps {
        let name = AppName::new(app);
        let Some(descriptor) = full_catalog.iter().find(|d| d.name == name) else {
            println!("{}", crate::CliError::UnknownApp(app.clone()));
            worst = worst.max(exit::VALIDATION);
            continue;
        };

        if !env.repo.has_app(descriptor.name.as_str()).await.unwrap_or(false) {
            println!("{app}: not installed");
            continue;
        }

        let Some(variant) = descriptor.variant_for(platform) else {
            println!("{app}: no variant declared for platform '{platform}'");
            worst = worst.max(exit::VALIDATION);
            continue;
        };

        let mut metadata = HashMap::new();
        metadata.insert("platform".to_string(), platform.to_string());
        let operation = env
            .undo
            .record_operation(UndoKind::Uninstall, &format!("uninstall {app}"), descriptor.name.as_str(), metadata)
            .await
            .context("recording undo checkpoint")?;

        match registry.uninstall(&ctx, descriptor, variant).await {
            Ok(()) => {
                let _ = env.repo.delete_app(descriptor.name.as_str()).await;
                let _ = env.undo.finalize_operation(&operation.id).await;
                println!("{app}: uninstalled");
            }
            Err(e) => {
                println!("{app}: failed - {e}");
                worst = worst.max(exit_code_for(&e));
            }
        }
    }

    Ok(worst)
}

fn exit_code_for(e: &CoreError) -> i32 {
    match e.kind() {
        ErrorKind::InvalidInput | ErrorKind::NotFound | ErrorKind::ValidationFailed => exit::VALIDATION,
        ErrorKind::Cancelled => exit::INTERRUPTED,
        _ => exit::FATAL,
    }
}
