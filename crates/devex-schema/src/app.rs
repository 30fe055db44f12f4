//! Application descriptor types (§3 "Application descriptor").

use std::borrow::Borrow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A normalized, stable application name.
///
/// Comparisons are case-insensitive; the stored form is lower-cased so a
/// `HashSet<AppName>` behaves the way the resolver's cycle/visited sets expect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppName(String);

impl AppName {
    /// Builds a normalized name from any string-like input.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_lowercase())
    }

    /// Borrows the normalized name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AppName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for AppName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for AppName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AppName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AppName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for AppName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl PartialEq<&str> for AppName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.to_lowercase()
    }
}

/// The closed set of installation methods an OS variant may declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InstallMethod {
    /// `package-manager-<id>`, e.g. `package-manager-apt`, `package-manager-dnf`.
    PackageManager {
        /// The plugin identifier the dispatch registry looks up (§4.G).
        id: String,
    },
    /// Download a script, validate its content, and execute it.
    Script,
    /// Download a single binary artifact and place it on the path.
    DownloadBinary,
    /// Download and place an AppImage artifact.
    AppImage,
    /// Run (or compose) a container via `container_spec`.
    Container,
    /// Register an APT-style package source (key + `.list` file).
    AptSource,
}

/// A single pre/post-install step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreInstallStep {
    /// A shell command, passed through the security validator then the supervisor.
    Shell {
        /// The unexpanded command string (may contain `~` or `${VAR}` placeholders).
        command: String,
    },
    /// A file copy, validated via the path rules and performed through the
    /// filesystem abstraction rather than a shell `cp`.
    Copy {
        /// Source path, possibly `~`-prefixed.
        source: String,
        /// Destination path, possibly `~`-prefixed.
        destination: String,
    },
}

/// Source/destination pair for a configuration file carried by the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Source path relative to the catalog, or `~`-prefixed.
    pub source: String,
    /// Destination path, `~`-expanded at apply time.
    pub destination: String,
}

/// Container launch parameters for the `container` install method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name; also used as the installed-app key (§4.G).
    pub name: String,
    /// Image reference to run.
    pub image: String,
    /// `host:container` port mappings.
    pub ports: Vec<String>,
    /// Environment variables passed to the container.
    pub env: HashMap<String, String>,
    /// Restart policy, e.g. `unless-stopped`.
    pub restart_policy: Option<String>,
}

/// An APT-style source definition carried by the `apt-source` install method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AptSourceSpec {
    /// URL of the signing key.
    pub key_url: String,
    /// Whether the key must be dearmored before being written to the keyring.
    pub armor: bool,
    /// The `deb ...` repo line written to the `.list` file.
    pub repo_line: String,
    /// Filename (without directory) of the `.list` file to write.
    pub file_name: String,
}

/// One OS-specific variant of an application descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppVariant {
    /// Platform tag this variant applies to, e.g. `linux`, `macos`.
    pub platform: String,
    /// The single install method for this variant.
    pub install_method: InstallMethod,
    /// The command used to install (meaning depends on `install_method`).
    pub install_command: Option<String>,
    /// The command used to uninstall.
    pub uninstall_command: Option<String>,
    /// Steps run before the main install.
    pub pre_install: Vec<PreInstallStep>,
    /// Steps run after the main install.
    pub post_install: Vec<PreInstallStep>,
    /// Configuration files to place.
    pub config_files: Vec<ConfigFile>,
    /// Download URL for `script` / `download-binary` / `appimage` methods.
    pub download_url: Option<String>,
    /// Destination path for the downloaded artifact.
    pub destination: Option<String>,
    /// Container launch parameters, present only for `container`.
    pub container_spec: Option<ContainerSpec>,
    /// APT source definitions, present only for `apt-source`.
    pub apt_sources: Vec<AptSourceSpec>,
}

/// Immutable, per-run description of an installable application (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Stable, unique name.
    pub name: AppName,
    /// Grouping category, e.g. `"editors"`, `"runtimes"`.
    pub category: String,
    /// Whether this app is installed by default in an unfiltered run.
    pub default: bool,
    /// Names of other descriptors this one depends on.
    pub dependencies: Vec<AppName>,
    /// Names this descriptor conflicts with; the pipeline does not enforce
    /// mutual exclusion itself (left to the catalog author) but carries the
    /// data through for the performance analyzer and UI.
    pub conflicts: Vec<AppName>,
    /// Per-OS variants; exactly one is selected per run by platform tag.
    pub variants: Vec<AppVariant>,
}

impl AppDescriptor {
    /// Returns the variant matching `platform`, if the catalog declares one.
    pub fn variant_for(&self, platform: &str) -> Option<&AppVariant> {
        self.variants.iter().find(|v| v.platform == platform)
    }
}
