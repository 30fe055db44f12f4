//! Security validator (§4.A): URL allow-listing, script content scanning,
//! path-traversal prevention, secure temp-file lifecycle, input sanitization.
//!
//! Every external-origin string -- URL, file path, user input, script
//! content, binary name -- passes through here before it reaches the
//! subprocess supervisor, the dispatch registry, or the state store. The
//! validator carries no ambient authority and has no I/O side effects other
//! than creating and deleting the temp files it itself validated.

use std::path::{Path, PathBuf};

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{CoreError, CoreResult};

const MAX_URL_LEN: usize = 2048;
const MAX_BINARY_NAME_LEN: usize = 100;
const DEFAULT_MAX_SCRIPT_SIZE: usize = 5 * 1024 * 1024;

static BINARY_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static regex"));

const SHELL_METACHARS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>'];

const PRIVATE_IP_PREFIXES: &[&str] = &["10.", "192.168.", "172.16.", "172.17.", "172.18.", "172.19."];
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1"];

const FORBIDDEN_CONFIG_PREFIXES: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/etc/sudoers",
    "/root/",
    "/sys/",
    "/proc/",
    "/dev/",
];

/// Closed set of dangerous script-content substrings (§4.A). Matching is
/// case-insensitive substring, never a full shell parse -- a catalog author
/// who needs one of these for a legitimate reason works around the
/// validator, by design; this is a blunt guardrail, not a sandbox.
const DANGEROUS_SCRIPT_PATTERNS: &[&str] = &[
    "rm -rf /",
    "dd if=/dev/zero",
    "mkfs.",
    "fdisk",
    "/etc/passwd",
    "/etc/shadow",
    "| sh",
    "| bash",
    "|sh",
    "|bash",
    ":(){:|:&};:",
    "chmod 777 /",
    "chown root /",
    "/dev/sd",
    "cryptsetup",
    "parted",
    "mount /dev",
    "/dev/tcp",
];

/// A terse subset of [`DANGEROUS_SCRIPT_PATTERNS`] the subprocess supervisor
/// re-checks on the first token of a command, for defense in depth (§4.B).
pub const SUPERVISOR_DENY_LIST: &[&str] = &["rm -rf /", ":(){:|:&};:", "dd if=/dev/zero"];

/// Validates external input before it reaches the supervisor, the dispatch
/// registry, or the state store (§4.A).
///
/// Constructed once per run with a trusted-domain set and an optional
/// per-instance http allow-list for local testing (never populated in
/// production).
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    trusted_domains: Vec<String>,
    http_allow_list: Vec<String>,
    max_script_size: usize,
    temp_root: PathBuf,
}

impl SecurityValidator {
    /// Builds a validator with the given trusted-domain set and the process's
    /// temp directory as the temp-file root.
    pub fn new(trusted_domains: Vec<String>) -> Self {
        Self {
            trusted_domains,
            http_allow_list: Vec::new(),
            max_script_size: DEFAULT_MAX_SCRIPT_SIZE,
            temp_root: std::env::temp_dir(),
        }
    }

    /// Extends the http scheme allow-list for local testing. Never call this
    /// in a production construction path.
    #[must_use]
    pub fn with_http_allow_list(mut self, hosts: Vec<String>) -> Self {
        self.http_allow_list = hosts;
        self
    }

    #[must_use]
    pub fn with_max_script_size(mut self, bytes: usize) -> Self {
        self.max_script_size = bytes;
        self
    }

    /// Validates a URL per §4.A: https-only (barring the http test
    /// allow-list), not loopback/private, host in the trusted set, length
    /// bounded to 2048 chars.
    pub fn validate_url(&self, url: &str) -> CoreResult<()> {
        if url.is_empty() {
            return Err(CoreError::InvalidInput("empty URL".into()));
        }
        if url.len() > MAX_URL_LEN {
            return Err(CoreError::InvalidInput(format!(
                "URL exceeds maximum length of {MAX_URL_LEN}"
            )));
        }

        let parsed = url::Url::parse(url)
            .map_err(|e| CoreError::InvalidInput(format!("malformed URL: {e}")))?;

        let host = parsed
            .host_str()
            .ok_or_else(|| CoreError::InvalidInput("URL has no host".into()))?
            .to_string();

        let scheme_ok = match parsed.scheme() {
            "https" => true,
            "http" => self.http_allow_list.iter().any(|h| h == &host),
            _ => false,
        };
        if !scheme_ok {
            return Err(CoreError::InvalidInput(format!(
                "scheme must be https (got {})",
                parsed.scheme()
            )));
        }

        if LOOPBACK_HOSTS.contains(&host.as_str()) {
            return Err(CoreError::InvalidInput(format!("{host} is a loopback host")));
        }
        if PRIVATE_IP_PREFIXES.iter().any(|p| host.starts_with(p)) {
            return Err(CoreError::InvalidInput(format!("{host} is a private IP")));
        }

        if !self.trusted_domains.iter().any(|d| d == &host) {
            return Err(CoreError::ValidationFailed(format!(
                "{host} is not in trusted domains"
            )));
        }

        Ok(())
    }

    /// Validates a binary/executable name per §4.A.
    pub fn validate_binary_name(&self, name: &str) -> CoreResult<()> {
        if name.is_empty() {
            return Err(CoreError::InvalidInput("empty binary name".into()));
        }
        if name.len() > MAX_BINARY_NAME_LEN {
            return Err(CoreError::InvalidInput(format!(
                "binary name exceeds {MAX_BINARY_NAME_LEN} characters"
            )));
        }
        if name
            .chars()
            .any(|c| c == '\0' || (c.is_control() && !matches!(c, '\t' | '\n' | '\r')))
        {
            return Err(CoreError::InvalidInput(
                "binary name contains a null byte or control character".into(),
            ));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(CoreError::InvalidInput(
                "binary name contains a path separator".into(),
            ));
        }
        if name.chars().any(|c| SHELL_METACHARS.contains(&c)) {
            return Err(CoreError::InvalidInput(
                "binary name contains a shell metacharacter".into(),
            ));
        }
        if !BINARY_NAME_RE.is_match(name) {
            return Err(CoreError::InvalidInput(format!(
                "binary name '{name}' does not match the allowed pattern"
            )));
        }
        Ok(())
    }

    /// Resolves `path` to absolute and verifies it sits under the process's
    /// temp directory with no `..` traversal (§4.A).
    pub fn validate_temp_path(&self, path: &Path) -> CoreResult<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.temp_root.join(path)
        };
        if joined.components().any(|c| c == std::path::Component::ParentDir) {
            return Err(CoreError::InvalidInput("temp path contains '..'".into()));
        }
        let resolved = normalize(&joined);
        let temp_root = normalize(&self.temp_root);
        if !resolved.starts_with(&temp_root) {
            return Err(CoreError::InvalidInput(format!(
                "{} is not under the temp root",
                resolved.display()
            )));
        }
        Ok(resolved)
    }

    /// Rejects catalog-declared configuration paths that touch sensitive
    /// system locations (§4.A).
    pub fn validate_config_path(&self, path: &str) -> CoreResult<()> {
        if FORBIDDEN_CONFIG_PREFIXES.iter().any(|p| path.starts_with(p)) {
            return Err(CoreError::InvalidInput(format!(
                "'{path}' touches a forbidden system location"
            )));
        }
        Ok(())
    }

    /// Validates script content per §4.A: non-empty, within `max_size`, free
    /// of dangerous patterns. Returns `Ok(true)` if a shebang warning should
    /// be surfaced (missing shebang is a warning, never a failure).
    pub fn validate_script_content(&self, content: &str) -> CoreResult<bool> {
        if content.is_empty() {
            return Err(CoreError::ValidationFailed("script content is empty".into()));
        }
        if content.len() > self.max_script_size {
            return Err(CoreError::ValidationFailed(format!(
                "script exceeds maximum size of {} bytes",
                self.max_script_size
            )));
        }
        let lower = content.to_lowercase();
        for pattern in DANGEROUS_SCRIPT_PATTERNS {
            if lower.contains(pattern) {
                return Err(CoreError::ValidationFailed(format!(
                    "script contains dangerous pattern: {pattern}"
                )));
            }
        }
        let missing_shebang = !content.trim_start().starts_with("#!");
        Ok(missing_shebang)
    }

    /// Strips null bytes and control characters (other than tab/newline/CR)
    /// and trims outer whitespace (§4.A "Sanitize input").
    pub fn sanitize_input(&self, input: &str) -> String {
        input
            .chars()
            .filter(|&c| c != '\0' && (!c.is_control() || matches!(c, '\t' | '\n' | '\r')))
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Creates a `0600`-mode file in the validated temp directory, writing
    /// `contents`. Refuses and deletes any partially-written file on
    /// validation failure.
    pub fn create_secure_temp_file(&self, name: &str, contents: &[u8]) -> CoreResult<PathBuf> {
        let path = self.validate_temp_path(Path::new(name))?;
        write_temp_file(&path, contents)?;
        if let Err(e) = self.validate_temp_path(&path) {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
        Ok(path)
    }

    /// Deletes `path` only if it validates as a temp path (§4.A: "Refuses to
    /// delete any path that does not validate").
    pub fn delete_temp_path(&self, path: &Path) -> CoreResult<()> {
        let validated = self.validate_temp_path(path)?;
        match std::fs::remove_file(&validated) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn write_temp_file(path: &Path, contents: &[u8]) -> CoreResult<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    std::io::Write::write_all(&mut file, contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_temp_file(path: &Path, contents: &[u8]) -> CoreResult<()> {
    std::fs::write(path, contents)?;
    Ok(())
}

/// Lexically normalizes a path (collapses `.`/`..` without touching the
/// filesystem), since the temp file may not exist yet at validation time.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SecurityValidator {
        SecurityValidator::new(vec!["raw.githubusercontent.com".to_string(), "get.docker.com".to_string()])
    }

    #[test]
    fn trusted_https_url_passes() {
        assert!(validator()
            .validate_url("https://get.docker.com/install.sh")
            .is_ok());
    }

    #[test]
    fn untrusted_domain_rejected() {
        let err = validator()
            .validate_url("https://not-trusted.example/x.sh")
            .unwrap_err();
        assert!(err.to_string().contains("not in trusted domains"));
    }

    #[test]
    fn http_scheme_rejected_without_allow_list() {
        assert!(validator()
            .validate_url("http://get.docker.com/install.sh")
            .is_err());
    }

    #[test]
    fn loopback_host_rejected() {
        let v = SecurityValidator::new(vec!["localhost".to_string()]);
        assert!(v.validate_url("https://localhost/x").is_err());
    }

    #[test]
    fn private_ip_rejected() {
        let v = SecurityValidator::new(vec!["192.168.1.1".to_string()]);
        assert!(v.validate_url("https://192.168.1.1/x").is_err());
    }

    #[test]
    fn url_length_boundary() {
        let v = SecurityValidator::new(vec!["raw.githubusercontent.com".to_string()]);
        let path_len = MAX_URL_LEN - "https://raw.githubusercontent.com/".len();
        let ok_url = format!("https://raw.githubusercontent.com/{}", "a".repeat(path_len));
        assert_eq!(ok_url.len(), MAX_URL_LEN);
        assert!(v.validate_url(&ok_url).is_ok());

        let too_long = format!("{ok_url}a");
        assert!(v.validate_url(&too_long).is_err());
    }

    #[test]
    fn binary_name_boundaries() {
        let v = validator();
        assert!(v.validate_binary_name(&"a".repeat(100)).is_ok());
        assert!(v.validate_binary_name(&"a".repeat(101)).is_err());
        assert!(v.validate_binary_name("").is_err());
        assert!(v.validate_binary_name("curl").is_ok());
        assert!(v.validate_binary_name("../curl").is_err());
        assert!(v.validate_binary_name("curl; rm -rf /").is_err());
        assert!(v.validate_binary_name(".hidden").is_err());
    }

    #[test]
    fn script_content_size_boundary() {
        let v = validator().with_max_script_size(10);
        assert!(v.validate_script_content(&"a".repeat(10)).is_ok());
        assert!(v.validate_script_content(&"a".repeat(11)).is_err());
    }

    #[test]
    fn script_content_rejects_dangerous_patterns() {
        let v = validator();
        let err = v
            .validate_script_content("#!/bin/bash\nrm -rf /")
            .unwrap_err();
        assert!(err.to_string().contains("dangerous pattern"));
    }

    #[test]
    fn script_content_warns_without_shebang() {
        let v = validator();
        let missing = v.validate_script_content("echo hello").unwrap();
        assert!(missing);
        let missing = v.validate_script_content("#!/bin/sh\necho hello").unwrap();
        assert!(!missing);
    }

    #[test]
    fn sanitize_strips_control_chars_and_trims() {
        let v = validator();
        assert_eq!(v.sanitize_input("  hi\x00\x07 there\t\n  "), "hi there\t\n");
    }

    #[test]
    fn config_path_rejects_sensitive_prefixes() {
        let v = validator();
        assert!(v.validate_config_path("/etc/passwd").is_err());
        assert!(v.validate_config_path("/root/.bashrc").is_err());
        assert!(v.validate_config_path("/home/user/.devex/config").is_ok());
    }

    #[test]
    fn temp_path_rejects_traversal() {
        let v = validator();
        assert!(v.validate_temp_path(Path::new("../../etc/passwd")).is_err());
    }

    #[test]
    fn secure_temp_file_round_trip() {
        let v = validator();
        let name = format!("devex-test-{}", std::process::id());
        let path = v.create_secure_temp_file(&name, b"hello").expect("create");
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        v.delete_temp_path(&path).expect("delete");
        assert!(!path.exists());
    }
}
