//! Pipeline runner (§4.I): resolves a requested set of apps and drives each
//! one through analysis, undo recording, pre/post steps, and dispatch.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use devex_schema::{AppDescriptor, AppName, PerformanceMetric, PreInstallStep, UndoKind};

use crate::analyzer::{self, Warning};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::resolver::{self, ResolvedApp};
use crate::security::SecurityValidator;
use crate::store::Repository;
use crate::strategies::{DispatchOutcome, InstallContext, StrategyRegistry};
use crate::undo::UndoLog;
use crate::{process, progress::ProgressTracker};

const RETRY_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RETRY_FACTOR: u32 = 2;
const RETRY_ATTEMPTS: u32 = 3;

/// Runner-wide options (§4.I, §6 `--continue-on-error`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Record and report the plan without invoking 4.B or mutating the
    /// filesystem (§4.I "Dry-run").
    pub dry_run: bool,
    /// Continue past a per-app failure of any kind, not just
    /// `InvalidInput`/`NotFound` (§4.I "Batch continuation").
    pub continue_on_error: bool,
}

/// What happened to a single app in the batch (§4.I step 7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppOutcome {
    /// The strategy ran and reported success.
    Installed,
    /// Already recorded or detected on-system.
    Skipped,
    /// The dispatch (after retries) failed.
    Failed {
        /// Human-readable description, surfaced to the CLI and the undo log.
        message: String,
        /// The originating error's taxonomy kind, used by [`PipelineRunner::should_abort`].
        kind: ErrorKind,
    },
    /// The run's cancellation context fired mid-operation.
    Cancelled,
}

impl AppOutcome {
    fn failed(e: &CoreError) -> Self {
        Self::Failed {
            message: e.to_string(),
            kind: e.kind(),
        }
    }
}

/// Per-app result returned from [`PipelineRunner::run`].
#[derive(Debug, Clone)]
pub struct AppResult {
    /// The app this result concerns.
    pub app: AppName,
    /// What happened.
    pub outcome: AppOutcome,
    /// Pre-install warnings surfaced (never blocking).
    pub warnings: Vec<Warning>,
}

/// Drives the resolved install order through the full per-app flow (§4.I).
pub struct PipelineRunner<'a> {
    registry: &'a StrategyRegistry,
    repo: Repository,
    undo: &'a UndoLog,
    tracker: &'a ProgressTracker,
    validator: &'a SecurityValidator,
    platform: String,
}

impl<'a> PipelineRunner<'a> {
    /// Builds a runner for a single invocation. `platform` selects which
    /// [`devex_schema::AppVariant`] applies to each descriptor.
    pub fn new(
        registry: &'a StrategyRegistry,
        repo: Repository,
        undo: &'a UndoLog,
        tracker: &'a ProgressTracker,
        validator: &'a SecurityValidator,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            repo,
            undo,
            tracker,
            validator,
            platform: platform.into(),
        }
    }

    /// Runs `requested` against `catalog` (§4.I).
    ///
    /// # Errors
    ///
    /// Returns an error only for failures before any per-app work starts
    /// (resolver failure); per-app failures are reported in the returned
    /// [`AppResult`] list instead, per the batch-continuation rule.
    pub async fn run(
        &self,
        requested: &[AppName],
        catalog: &[AppDescriptor],
        ctx: &InstallContext,
        options: PipelineOptions,
    ) -> CoreResult<Vec<AppResult>> {
        let installed: HashSet<AppName> = self
            .repo
            .list_apps()
            .await?
            .into_iter()
            .map(AppName::new)
            .collect();

        let resolved = resolver::resolve(requested, catalog, &installed)?;
        let mut results = Vec::with_capacity(resolved.len());

        for entry in resolved {
            if ctx.cancel.is_cancelled() {
                results.push(AppResult {
                    app: entry.name,
                    outcome: AppOutcome::Cancelled,
                    warnings: Vec::new(),
                });
                continue;
            }

            let result = self.run_one(&entry, catalog, ctx, options).await;
            let abort = self.should_abort(&result, options);
            results.push(result);
            if abort {
                break;
            }
        }

        Ok(results)
    }

    /// Whether a single app's failure should stop the rest of the batch
    /// (§4.I "Batch continuation", §7 propagation policy).
    fn should_abort(&self, result: &AppResult, options: PipelineOptions) -> bool {
        let AppOutcome::Failed { kind, .. } = &result.outcome else {
            return false;
        };
        if options.continue_on_error {
            return false;
        }
        !matches!(kind, ErrorKind::InvalidInput | ErrorKind::NotFound)
    }

    async fn run_one(&self, entry: &ResolvedApp, catalog: &[AppDescriptor], ctx: &InstallContext, options: PipelineOptions) -> AppResult {
        let descriptor = &catalog[entry.index];

        if entry.skip {
            return AppResult {
                app: entry.name.clone(),
                outcome: AppOutcome::Skipped,
                warnings: Vec::new(),
            };
        }

        let op_id = self.tracker.register(None, descriptor.name.as_str(), "install");
        self.tracker.transition(&op_id, devex_schema::ProgressStatus::Running);

        let Some(variant) = descriptor.variant_for(&self.platform) else {
            let e = CoreError::InvalidInput(format!("no variant declared for platform '{}'", self.platform));
            self.tracker.fail(&op_id, e.to_string());
            return AppResult {
                app: entry.name.clone(),
                outcome: AppOutcome::failed(&e),
                warnings: Vec::new(),
            };
        };

        let history = self
            .repo
            .query_metrics(descriptor.name.as_str(), None)
            .await
            .unwrap_or_default();
        let warnings = analyzer::analyze_pre_install(descriptor.name.as_str(), descriptor.dependencies.len(), &history);

        let mut metadata = HashMap::new();
        metadata.insert("platform".to_string(), self.platform.clone());
        metadata.insert("install_method".to_string(), format!("{:?}", variant.install_method));

        let recorded = self
            .undo
            .record_operation(UndoKind::Install, &format!("install {}", descriptor.name), descriptor.name.as_str(), metadata)
            .await;
        let operation = match recorded {
            Ok(op) => op,
            Err(e) => {
                self.tracker.fail(&op_id, e.to_string());
                let outcome = AppOutcome::failed(&e);
                return AppResult {
                    app: entry.name.clone(),
                    outcome,
                    warnings,
                };
            }
        };

        let started_at = std::time::Instant::now();

        if !options.dry_run {
            if let Err(e) = self.run_steps(&variant.pre_install, ctx).await {
                self.tracker.fail(&op_id, e.to_string());
                self.emit_metric(descriptor.name.as_str(), variant, started_at, false).await;
                let outcome = AppOutcome::failed(&e);
                return AppResult {
                    app: entry.name.clone(),
                    outcome,
                    warnings,
                };
            }
        }

        let dispatch_result = if options.dry_run {
            Ok(DispatchOutcome::Installed)
        } else {
            self.dispatch_with_retry(ctx, descriptor, variant).await
        };

        let outcome = match dispatch_result {
            Ok(DispatchOutcome::Installed | DispatchOutcome::Skipped) => {
                if !options.dry_run {
                    if let Err(e) = self.run_steps(&variant.post_install, ctx).await {
                        self.tracker.fail(&op_id, e.to_string());
                        self.emit_metric(descriptor.name.as_str(), variant, started_at, false).await;
                        let outcome = AppOutcome::failed(&e);
                        return AppResult {
                            app: entry.name.clone(),
                            outcome,
                            warnings,
                        };
                    }
                }
                let _ = self.undo.finalize_operation(&operation.id).await;
                self.tracker.transition(&op_id, devex_schema::ProgressStatus::Completed);
                self.emit_metric(descriptor.name.as_str(), variant, started_at, true).await;
                AppOutcome::Installed
            }
            Err(e) => {
                self.tracker.fail(&op_id, e.to_string());
                self.emit_metric(descriptor.name.as_str(), variant, started_at, false).await;
                AppOutcome::failed(&e)
            }
        };

        AppResult {
            app: entry.name.clone(),
            outcome,
            warnings,
        }
    }

    async fn dispatch_with_retry(&self, ctx: &InstallContext, app: &AppDescriptor, variant: &devex_schema::AppVariant) -> CoreResult<DispatchOutcome> {
        let mut delay = RETRY_INITIAL_DELAY;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.registry.install(ctx, app, variant, &self.repo).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < RETRY_ATTEMPTS => {
                    tracing::warn!(app = %app.name, attempt, error = %e, "retrying transient failure");
                    tokio::time::sleep(delay).await;
                    delay *= RETRY_FACTOR;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_steps(&self, steps: &[PreInstallStep], ctx: &InstallContext) -> CoreResult<()> {
        for step in steps {
            match step {
                PreInstallStep::Shell { command } => {
                    let expanded = expand_placeholders(command);
                    let sanitized = self.validator.sanitize_input(&expanded);
                    let handle = process::execute(&sanitized, None, ctx.cancel.clone())?;
                    let status = handle.wait(process::DEFAULT_GRACE_WINDOW).await?;
                    if !status.success() {
                        return Err(CoreError::Internal(format!("step command exited with status {status}")));
                    }
                }
                PreInstallStep::Copy { source, destination } => {
                    let source = expand_placeholders(source);
                    let destination = expand_placeholders(destination);
                    ctx.validator.validate_config_path(&destination)?;
                    if let Some(parent) = std::path::Path::new(&destination).parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(&source, &destination)?;
                }
            }
        }
        Ok(())
    }

    async fn emit_metric(&self, app: &str, variant: &devex_schema::AppVariant, started_at: std::time::Instant, success: bool) {
        let metric = PerformanceMetric {
            app: app.to_string(),
            method: format!("{:?}", variant.install_method),
            platform: self.platform.clone(),
            download_time_ms: None,
            install_time_ms: u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            total_time_ms: u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            package_size: None,
            success,
            timestamp: chrono::Utc::now(),
        };
        let _ = self.repo.record_metric(metric).await;
    }
}

/// Expands a leading `~` and `${VAR}` references once, before any security
/// validation runs (§4.I).
fn expand_placeholders(input: &str) -> String {
    let with_home = if let Some(rest) = input.strip_prefix('~') {
        dirs::home_dir()
            .map(|home| format!("{}{rest}", home.display()))
            .unwrap_or_else(|| input.to_string())
    } else {
        input.to_string()
    };

    let mut out = String::with_capacity(with_home.len());
    let mut chars = with_home.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var = String::new();
            for inner in chars.by_ref() {
                if inner == '}' {
                    break;
                }
                var.push(inner);
            }
            out.push_str(&std::env::var(&var).unwrap_or_default());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_placeholders_substitutes_env_var() {
        // SAFETY-adjacent ordering note: this test only reads back what it
        // itself sets, matching the config module's env-var test convention.
        unsafe {
            std::env::set_var("DEVEX_TEST_PLACEHOLDER", "value");
        }
        let expanded = expand_placeholders("echo ${DEVEX_TEST_PLACEHOLDER}");
        assert_eq!(expanded, "echo value");
        unsafe {
            std::env::remove_var("DEVEX_TEST_PLACEHOLDER");
        }
    }

    #[test]
    fn expand_placeholders_rewrites_leading_tilde() {
        let expanded = expand_placeholders("~/bin/tool");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("/bin/tool"));
    }
}
