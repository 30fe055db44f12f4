//! Dispatch & strategy registry (§4.G): maps an [`InstallMethod`] to a
//! concrete installer and runs the cross-cutting idempotence/record/metric
//! rules common to every method.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use devex_schema::{AppDescriptor, AppVariant, InstallMethod};

use crate::error::{CoreError, CoreResult};
use crate::process;
use crate::security::SecurityValidator;
use crate::store::Repository;

/// Shared, per-run state threaded through every strategy (§4.G "Context").
#[derive(Clone)]
pub struct InstallContext {
    /// Validates every external-origin string before it is acted on.
    pub validator: SecurityValidator,
    /// Shared HTTP client for strategies that fetch artifacts.
    pub http: Client,
    /// Cancellation fired when the run is aborted.
    pub cancel: CancellationToken,
    /// Cooldown between successive APT-style repository refreshes.
    pub apt_refresh_interval: std::time::Duration,
}

impl InstallContext {
    /// Builds a context around a validator, with a fresh HTTP client and an
    /// uncancelled token.
    pub fn new(validator: SecurityValidator, apt_refresh_interval: std::time::Duration) -> Self {
        Self {
            validator,
            http: Client::new(),
            cancel: CancellationToken::new(),
            apt_refresh_interval,
        }
    }
}

/// The narrow interface every install method implements (§4.G).
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Performs the install for `app`'s `variant`.
    async fn install(&self, ctx: &InstallContext, app: &AppDescriptor, variant: &AppVariant, repo: &Repository) -> CoreResult<()>;

    /// Reverses a prior install.
    async fn uninstall(&self, ctx: &InstallContext, app: &AppDescriptor, variant: &AppVariant) -> CoreResult<()>;

    /// A method-specific on-system probe, consulted only when the app is not
    /// yet recorded in the state store (§4.G "record-and-skip").
    async fn is_installed(&self, app: &AppDescriptor, variant: &AppVariant) -> CoreResult<bool>;
}

fn registry_key(method: &InstallMethod) -> &'static str {
    match method {
        InstallMethod::PackageManager { .. } => "package-manager",
        InstallMethod::Script => "script",
        InstallMethod::DownloadBinary => "download-binary",
        InstallMethod::AppImage => "appimage",
        InstallMethod::Container => "container",
        InstallMethod::AptSource => "apt-source",
    }
}

/// Outcome of a single registry dispatch, used by the pipeline runner to
/// decide what metric to emit (§4.I step 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The strategy ran the install.
    Installed,
    /// The app was already recorded, or detected on-system and recorded.
    Skipped,
}

/// An ordinary struct built once at startup and threaded through the
/// pipeline runner by reference -- never a process-wide singleton (§4.G, §9).
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Box<dyn Strategy>>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    /// Registers the closed set of concrete strategies.
    pub fn new() -> Self {
        let mut strategies: HashMap<&'static str, Box<dyn Strategy>> = HashMap::new();
        strategies.insert("package-manager", Box::new(PackageManagerStrategy));
        strategies.insert("script", Box::new(ScriptStrategy));
        strategies.insert("download-binary", Box::new(DownloadArtifactStrategy));
        strategies.insert("appimage", Box::new(DownloadArtifactStrategy));
        strategies.insert("container", Box::new(ContainerStrategy));
        strategies.insert("apt-source", Box::new(AptSourceStrategy));
        Self { strategies }
    }

    /// Dispatches `app`'s `variant`, applying the idempotence and
    /// record-and-skip rules common to every method (§4.G cross-cutting
    /// rules).
    pub async fn install(
        &self,
        ctx: &InstallContext,
        app: &AppDescriptor,
        variant: &AppVariant,
        repo: &Repository,
    ) -> CoreResult<DispatchOutcome> {
        let key = registry_key(&variant.install_method);
        let strategy = self
            .strategies
            .get(key)
            .ok_or_else(|| CoreError::Internal(format!("no strategy registered for '{key}'")))?;

        if repo.has_app(app.name.as_str()).await? {
            return Ok(DispatchOutcome::Skipped);
        }

        if strategy.is_installed(app, variant).await? {
            repo.add_app(app.name.as_str()).await?;
            return Ok(DispatchOutcome::Skipped);
        }

        strategy.install(ctx, app, variant, repo).await?;
        repo.add_app(app.name.as_str()).await?;
        Ok(DispatchOutcome::Installed)
    }

    /// Dispatches an uninstall for `app`'s `variant`.
    pub async fn uninstall(&self, ctx: &InstallContext, app: &AppDescriptor, variant: &AppVariant) -> CoreResult<()> {
        let key = registry_key(&variant.install_method);
        let strategy = self
            .strategies
            .get(key)
            .ok_or_else(|| CoreError::Internal(format!("no strategy registered for '{key}'")))?;
        strategy.uninstall(ctx, app, variant).await
    }
}

/// `package-manager-*`: executes the PM's install subcommand through an
/// opaque plugin binary named after the method's `id` (§4.G).
struct PackageManagerStrategy;

#[async_trait]
impl Strategy for PackageManagerStrategy {
    async fn install(&self, ctx: &InstallContext, app: &AppDescriptor, variant: &AppVariant, _repo: &Repository) -> CoreResult<()> {
        let InstallMethod::PackageManager { id } = &variant.install_method else {
            return Err(CoreError::Internal("package-manager strategy given non-matching method".into()));
        };
        ctx.validator.validate_binary_name(id)?;
        let command = variant
            .install_command
            .clone()
            .unwrap_or_else(|| format!("{id} install -y {}", app.name));
        let handle = process::execute(&command, None, ctx.cancel.clone())?;
        let status = handle.wait(process::DEFAULT_GRACE_WINDOW).await?;
        if !status.success() {
            return Err(process::status_error(&format!("{id} install"), status));
        }
        Ok(())
    }

    async fn uninstall(&self, ctx: &InstallContext, app: &AppDescriptor, variant: &AppVariant) -> CoreResult<()> {
        let InstallMethod::PackageManager { id } = &variant.install_method else {
            return Err(CoreError::Internal("package-manager strategy given non-matching method".into()));
        };
        let command = variant
            .uninstall_command
            .clone()
            .unwrap_or_else(|| format!("{id} remove -y {}", app.name));
        let handle = process::execute(&command, None, ctx.cancel.clone())?;
        handle.wait(process::DEFAULT_GRACE_WINDOW).await?;
        Ok(())
    }

    async fn is_installed(&self, app: &AppDescriptor, variant: &AppVariant) -> CoreResult<bool> {
        let InstallMethod::PackageManager { id } = &variant.install_method else {
            return Err(CoreError::Internal("package-manager strategy given non-matching method".into()));
        };
        if which::which(id).is_err() {
            // Plugin binary absent entirely: nothing to probe with.
            return Ok(false);
        }
        let command = format!("{id} is-installed {}", app.name);
        let handle = process::execute(&command, None, CancellationToken::new())?;
        let status = handle.wait(process::DEFAULT_GRACE_WINDOW).await?;
        Ok(status.success())
    }
}

/// `script`: validate the download URL, fetch the script body, validate its
/// content, stage it through a secured temp file, and hand it to the
/// supervisor (§4.A → §4.B).
struct ScriptStrategy;

#[async_trait]
impl Strategy for ScriptStrategy {
    async fn install(&self, ctx: &InstallContext, app: &AppDescriptor, variant: &AppVariant, _repo: &Repository) -> CoreResult<()> {
        let url = variant
            .download_url
            .as_deref()
            .ok_or_else(|| CoreError::InvalidInput("script variant has no download_url".into()))?;
        ctx.validator.validate_url(url)?;

        let body = ctx.http.get(url).send().await?.error_for_status()?.text().await?;
        ctx.validator.validate_script_content(&body)?;

        let temp_name = format!("{}-install.sh", app.name);
        let path = ctx.validator.create_secure_temp_file(&temp_name, body.as_bytes())?;

        let command = format!("bash {}", path.display());
        let handle = process::execute(&command, None, ctx.cancel.clone());
        let result = match handle {
            Ok(h) => h.wait(process::DEFAULT_GRACE_WINDOW).await,
            Err(e) => Err(e),
        };
        let _ = ctx.validator.delete_temp_path(&path);

        match result? {
            status if status.success() => Ok(()),
            status => Err(process::status_error("install script", status)),
        }
    }

    async fn uninstall(&self, ctx: &InstallContext, _app: &AppDescriptor, variant: &AppVariant) -> CoreResult<()> {
        let Some(command) = &variant.uninstall_command else {
            return Ok(());
        };
        let handle = process::execute(command, None, ctx.cancel.clone())?;
        handle.wait(process::DEFAULT_GRACE_WINDOW).await?;
        Ok(())
    }

    async fn is_installed(&self, _app: &AppDescriptor, _variant: &AppVariant) -> CoreResult<bool> {
        Ok(false)
    }
}

/// `download-binary` / `appimage`: validate URL and destination name,
/// stream the artifact down, `chmod 0755`, and place it at `destination`.
struct DownloadArtifactStrategy;

#[async_trait]
impl Strategy for DownloadArtifactStrategy {
    async fn install(&self, ctx: &InstallContext, app: &AppDescriptor, variant: &AppVariant, _repo: &Repository) -> CoreResult<()> {
        let url = variant
            .download_url
            .as_deref()
            .ok_or_else(|| CoreError::InvalidInput("variant has no download_url".into()))?;
        ctx.validator.validate_url(url)?;

        let destination = variant
            .destination
            .as_deref()
            .ok_or_else(|| CoreError::InvalidInput("variant has no destination".into()))?;
        let dest_path = expand_home(destination);
        let binary_name = dest_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CoreError::InvalidInput("destination has no file name".into()))?;
        ctx.validator.validate_binary_name(binary_name)?;

        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let response = ctx.http.get(url).send().await?.error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let tmp_path = dest_path.with_extension("partial");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        use tokio::io::AsyncWriteExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        let mut perms = std::fs::metadata(&tmp_path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&tmp_path, perms)?;
        std::fs::rename(&tmp_path, &dest_path)?;

        tracing::debug!(app = %app.name, sha256 = %hex::encode(hasher.finalize()), "downloaded artifact");
        Ok(())
    }

    async fn uninstall(&self, _ctx: &InstallContext, _app: &AppDescriptor, variant: &AppVariant) -> CoreResult<()> {
        if let Some(destination) = &variant.destination {
            let path = expand_home(destination);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn is_installed(&self, _app: &AppDescriptor, variant: &AppVariant) -> CoreResult<bool> {
        match &variant.destination {
            Some(destination) => Ok(expand_home(destination).exists()),
            None => Ok(false),
        }
    }
}

/// `container`: composes `docker run` arguments from `container_spec` and
/// executes through the supervisor; the container name is the installed-app
/// key (§4.G).
struct ContainerStrategy;

impl ContainerStrategy {
    fn run_command(spec: &devex_schema::ContainerSpec) -> String {
        let mut parts = vec!["docker".to_string(), "run".to_string(), "-d".to_string()];
        parts.push("--name".to_string());
        parts.push(spec.name.clone());
        if let Some(policy) = &spec.restart_policy {
            parts.push("--restart".to_string());
            parts.push(policy.clone());
        }
        for port in &spec.ports {
            parts.push("-p".to_string());
            parts.push(port.clone());
        }
        let mut env_keys: Vec<&String> = spec.env.keys().collect();
        env_keys.sort();
        for key in env_keys {
            parts.push("-e".to_string());
            parts.push(format!("{key}={}", spec.env[key]));
        }
        parts.push(spec.image.clone());
        parts.join(" ")
    }
}

#[async_trait]
impl Strategy for ContainerStrategy {
    async fn install(&self, ctx: &InstallContext, _app: &AppDescriptor, variant: &AppVariant, _repo: &Repository) -> CoreResult<()> {
        let spec = variant
            .container_spec
            .as_ref()
            .ok_or_else(|| CoreError::InvalidInput("container variant has no container_spec".into()))?;
        let command = Self::run_command(spec);
        let handle = process::execute(&command, None, ctx.cancel.clone())?;
        let status = handle.wait(process::DEFAULT_GRACE_WINDOW).await?;
        if !status.success() {
            return Err(process::status_error("docker run", status));
        }
        Ok(())
    }

    async fn uninstall(&self, ctx: &InstallContext, _app: &AppDescriptor, variant: &AppVariant) -> CoreResult<()> {
        let Some(spec) = &variant.container_spec else {
            return Ok(());
        };
        let command = format!("docker rm -f {}", spec.name);
        let handle = process::execute(&command, None, ctx.cancel.clone())?;
        handle.wait(process::DEFAULT_GRACE_WINDOW).await?;
        Ok(())
    }

    async fn is_installed(&self, _app: &AppDescriptor, variant: &AppVariant) -> CoreResult<bool> {
        let Some(spec) = &variant.container_spec else {
            return Ok(false);
        };
        let command = format!("docker inspect {}", spec.name);
        let handle = process::execute(&command, None, CancellationToken::new())?;
        let status = handle.wait(process::DEFAULT_GRACE_WINDOW).await?;
        Ok(status.success())
    }
}

/// `apt-source`: downloads the signing key, optionally dearmors it, writes
/// the `.list` file, then triggers a rate-limited repository refresh
/// (§4.G "once per 24 h per repository", key'd on the source's content hash).
struct AptSourceStrategy;

impl AptSourceStrategy {
    fn refresh_setting_key(repo_line: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(repo_line.as_bytes());
        format!("apt_refresh:{}", hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl Strategy for AptSourceStrategy {
    async fn install(&self, ctx: &InstallContext, _app: &AppDescriptor, variant: &AppVariant, repo: &Repository) -> CoreResult<()> {
        for source in &variant.apt_sources {
            ctx.validator.validate_url(&source.key_url)?;
            ctx.validator.validate_config_path(&source.file_name)?;

            let key_bytes = ctx.http.get(&source.key_url).send().await?.error_for_status()?.bytes().await?;
            let keyring_dir = PathBuf::from("/etc/apt/keyrings");
            std::fs::create_dir_all(&keyring_dir)?;
            let keyring_path = keyring_dir.join(format!("{}.gpg", source.file_name));

            if source.armor {
                let temp_name = format!("{}-key.asc", source.file_name);
                let armored_path = ctx.validator.create_secure_temp_file(&temp_name, &key_bytes)?;
                let command = format!(
                    "gpg --dearmor --output {} {}",
                    keyring_path.display(),
                    armored_path.display()
                );
                let handle = process::execute(&command, None, ctx.cancel.clone())?;
                let status = handle.wait(process::DEFAULT_GRACE_WINDOW).await?;
                let _ = ctx.validator.delete_temp_path(&armored_path);
                if !status.success() {
                    return Err(process::status_error("gpg --dearmor", status));
                }
            } else {
                std::fs::write(&keyring_path, &key_bytes)?;
            }

            let list_path = PathBuf::from("/etc/apt/sources.list.d").join(&source.file_name);
            if let Some(parent) = list_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&list_path, format!("{}\n", source.repo_line))?;

            self.maybe_refresh(ctx, repo, &source.repo_line).await?;
        }
        Ok(())
    }

    async fn uninstall(&self, _ctx: &InstallContext, _app: &AppDescriptor, variant: &AppVariant) -> CoreResult<()> {
        for source in &variant.apt_sources {
            let list_path = PathBuf::from("/etc/apt/sources.list.d").join(&source.file_name);
            let _ = std::fs::remove_file(list_path);
            let keyring_path = PathBuf::from("/etc/apt/keyrings").join(format!("{}.gpg", source.file_name));
            let _ = std::fs::remove_file(keyring_path);
        }
        Ok(())
    }

    async fn is_installed(&self, _app: &AppDescriptor, variant: &AppVariant) -> CoreResult<bool> {
        Ok(variant
            .apt_sources
            .iter()
            .all(|s| PathBuf::from("/etc/apt/sources.list.d").join(&s.file_name).exists()))
    }
}

impl AptSourceStrategy {
    async fn maybe_refresh(&self, ctx: &InstallContext, repo: &Repository, repo_line: &str) -> CoreResult<()> {
        let key = Self::refresh_setting_key(repo_line);
        let due = match repo.get(&key).await {
            Ok(last) => {
                let last_run: chrono::DateTime<chrono::Utc> = last
                    .parse()
                    .unwrap_or_else(|_| chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).expect("epoch is valid"));
                chrono::Utc::now().signed_duration_since(last_run)
                    >= chrono::Duration::from_std(ctx.apt_refresh_interval).unwrap_or(chrono::Duration::zero())
            }
            Err(CoreError::NotFound(_)) => true,
            Err(e) => return Err(e),
        };
        if !due {
            return Ok(());
        }

        let handle = process::execute("apt-get update", None, ctx.cancel.clone())?;
        let status = handle.wait(process::DEFAULT_GRACE_WINDOW).await?;
        if status.success() {
            repo.set(key, chrono::Utc::now().to_rfc3339()).await?;
        }
        Ok(())
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_key_maps_every_method() {
        assert_eq!(registry_key(&InstallMethod::PackageManager { id: "apt".into() }), "package-manager");
        assert_eq!(registry_key(&InstallMethod::Script), "script");
        assert_eq!(registry_key(&InstallMethod::DownloadBinary), "download-binary");
        assert_eq!(registry_key(&InstallMethod::AppImage), "appimage");
        assert_eq!(registry_key(&InstallMethod::Container), "container");
        assert_eq!(registry_key(&InstallMethod::AptSource), "apt-source");
    }

    #[test]
    fn refresh_setting_key_is_stable_and_content_addressed() {
        let a = AptSourceStrategy::refresh_setting_key("deb https://example.com stable main");
        let b = AptSourceStrategy::refresh_setting_key("deb https://example.com stable main");
        let c = AptSourceStrategy::refresh_setting_key("deb https://example.com testing main");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("apt_refresh:"));
    }

    #[test]
    fn container_run_command_composes_deterministically() {
        let mut env = std::collections::HashMap::new();
        env.insert("B".to_string(), "2".to_string());
        env.insert("A".to_string(), "1".to_string());
        let spec = devex_schema::ContainerSpec {
            name: "redis".into(),
            image: "redis:7".into(),
            ports: vec!["6379:6379".into()],
            env,
            restart_policy: Some("unless-stopped".into()),
        };
        let command = ContainerStrategy::run_command(&spec);
        assert!(command.contains("--name redis"));
        assert!(command.contains("-e A=1 -e B=2"));
        assert!(command.ends_with("redis:7"));
    }

    #[test]
    fn expand_home_rewrites_tilde_prefix() {
        let expanded = expand_home("~/bin/tool");
        assert!(expanded.ends_with("bin/tool"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn registry_new_has_no_panics_and_dispatches_by_key() {
        let registry = StrategyRegistry::new();
        assert!(registry.strategies.contains_key("apt-source"));
        assert!(registry.strategies.contains_key("container"));
    }

    #[tokio::test]
    async fn package_manager_probe_skips_command_when_plugin_binary_absent() {
        let strategy = PackageManagerStrategy;
        let app = AppDescriptor {
            name: devex_schema::AppName::new("curl"),
            category: "net".into(),
            default: true,
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            variants: Vec::new(),
        };
        let variant = AppVariant {
            platform: "linux".into(),
            install_method: InstallMethod::PackageManager { id: "devex-nonexistent-plugin".into() },
            install_command: None,
            uninstall_command: None,
            pre_install: Vec::new(),
            post_install: Vec::new(),
            config_files: Vec::new(),
            download_url: None,
            destination: None,
            container_spec: None,
            apt_sources: Vec::new(),
        };
        assert!(!strategy.is_installed(&app, &variant).await.unwrap());
    }

    #[tokio::test]
    async fn package_manager_install_surfaces_transient_error_on_plain_nonzero_exit() {
        // §4.I step 4: a plain non-zero exit (an apt-lock/mirror hiccup) must
        // classify as transient so the pipeline's retry-with-backoff engages.
        let strategy = PackageManagerStrategy;
        let app = AppDescriptor {
            name: devex_schema::AppName::new("curl"),
            category: "net".into(),
            default: true,
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            variants: Vec::new(),
        };
        let variant = AppVariant {
            platform: "linux".into(),
            install_method: InstallMethod::PackageManager { id: "apt".into() },
            install_command: Some("false".into()),
            uninstall_command: None,
            pre_install: Vec::new(),
            post_install: Vec::new(),
            config_files: Vec::new(),
            download_url: None,
            destination: None,
            container_spec: None,
            apt_sources: Vec::new(),
        };
        let ctx = InstallContext::new(SecurityValidator::new(Vec::new()), std::time::Duration::from_secs(86400));
        let repo = Repository::open_in_memory().expect("in-memory repository");
        let err = strategy.install(&ctx, &app, &variant, &repo).await.unwrap_err();
        assert!(matches!(err, CoreError::TransientIo(_)));
        assert!(err.is_retryable());
    }
}
