//! `devex install` (§6).

use std::collections::HashSet;

use anyhow::{Context, Result};
use devex_core::{AppOutcome, ErrorKind, InstallContext, PipelineOptions, PipelineRunner, ProgressTracker, StrategyRegistry};
use devex_schema::AppName;

use crate::catalog;
use crate::cmd::exit;
use crate::env::RunEnv;

/// Runs the install pipeline for `apps` (and/or every default app in
/// `categories`) against the catalog at `catalog_path`.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    catalog_path: &std::path::Path,
    platform: &str,
    apps: &[String],
    categories: &[String],
    dry_run: bool,
    verbose: bool,
    continue_on_error: bool,
) -> Result<i32> {
    if verbose {
        tracing::debug!("verbose install requested");
    }

    let env = RunEnv::open().await.context("preparing run environment")?;
    let full_catalog = catalog::load(catalog_path)?;

    let requested = select_apps(&full_catalog, apps, categories);
    if requested.is_empty() {
        eprintln!("{}", crate::CliError::NoAppsSelected);
        return Ok(exit::VALIDATION);
    }

    let registry = StrategyRegistry::new();
    let ctx = InstallContext::new(env.validator.clone(), env.config.apt_refresh_interval);
    let tracker = ProgressTracker::new();
    tracker.add_listener(|state| {
        println!("[{:>5.0}%] {} - {:?}", state.progress * 100.0, state.name, state.status);
    });

    let cancel_signal = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_signal.cancel();
        }
    });

    let runner = PipelineRunner::new(&registry, env.repo.clone(), &env.undo, &tracker, &env.validator, platform.to_string());
    let options = PipelineOptions {
        dry_run,
        continue_on_error,
    };

    let results = runner.run(&requested, &full_catalog, &ctx, options).await.context("running install pipeline")?;

    for result in &results {
        for warning in &result.warnings {
            println!("warning: {} - {}", result.app, warning.message);
        }
        match &result.outcome {
            AppOutcome::Installed => println!("{}: installed", result.app),
            AppOutcome::Skipped => println!("{}: already installed", result.app),
            AppOutcome::Failed { message, .. } => println!("{}: failed - {message}", result.app),
            AppOutcome::Cancelled => println!("{}: cancelled", result.app),
        }
    }

    Ok(exit_code_for(&results))
}

fn select_apps(catalog: &[devex_schema::AppDescriptor], apps: &[String], categories: &[String]) -> Vec<AppName> {
    let mut selected: HashSet<AppName> = apps.iter().map(|name| AppName::new(name.clone())).collect();
    if !categories.is_empty() {
        for descriptor in catalog {
            if categories.iter().any(|c| c == &descriptor.category) {
                selected.insert(descriptor.name.clone());
            }
        }
    }
    let mut out: Vec<AppName> = selected.into_iter().collect();
    out.sort();
    out
}

fn exit_code_for(results: &[devex_core::AppResult]) -> i32 {
    if results.iter().any(|r| matches!(r.outcome, AppOutcome::Cancelled)) {
        return exit::INTERRUPTED;
    }
    let mut worst = exit::SUCCESS;
    for result in results {
        if let AppOutcome::Failed { kind, .. } = &result.outcome {
            let code = match kind {
                ErrorKind::InvalidInput | ErrorKind::NotFound | ErrorKind::ValidationFailed => exit::VALIDATION,
                _ => exit::FATAL,
            };
            worst = worst.max(code);
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use devex_schema::AppDescriptor;

    fn descriptor(name: &str, category: &str) -> AppDescriptor {
        AppDescriptor {
            name: AppName::new(name),
            category: category.to_string(),
            default: true,
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            variants: Vec::new(),
        }
    }

    #[test]
    fn select_apps_combines_names_and_categories() {
        let catalog = vec![descriptor("curl", "net"), descriptor("docker", "containers"), descriptor("jq", "net")];
        let selected = select_apps(&catalog, &["docker".to_string()], &["net".to_string()]);
        assert_eq!(selected, vec![AppName::new("curl"), AppName::new("docker"), AppName::new("jq")]);
    }

    #[test]
    fn select_apps_empty_without_names_or_categories() {
        let catalog = vec![descriptor("curl", "net")];
        assert!(select_apps(&catalog, &[], &[]).is_empty());
    }

    #[test]
    fn exit_code_prefers_interrupted_over_failure() {
        let results = vec![
            devex_core::AppResult {
                app: AppName::new("curl"),
                outcome: AppOutcome::Failed { message: "boom".into(), kind: ErrorKind::InternalError },
                warnings: Vec::new(),
            },
            devex_core::AppResult {
                app: AppName::new("jq"),
                outcome: AppOutcome::Cancelled,
                warnings: Vec::new(),
            },
        ];
        assert_eq!(exit_code_for(&results), exit::INTERRUPTED);
    }

    #[test]
    fn exit_code_distinguishes_validation_from_fatal() {
        let validation = vec![devex_core::AppResult {
            app: AppName::new("curl"),
            outcome: AppOutcome::Failed { message: "bad".into(), kind: ErrorKind::InvalidInput },
            warnings: Vec::new(),
        }];
        assert_eq!(exit_code_for(&validation), exit::VALIDATION);

        let fatal = vec![devex_core::AppResult {
            app: AppName::new("curl"),
            outcome: AppOutcome::Failed { message: "bad".into(), kind: ErrorKind::PermissionDenied },
            warnings: Vec::new(),
        }];
        assert_eq!(exit_code_for(&fatal), exit::FATAL);
    }
}
