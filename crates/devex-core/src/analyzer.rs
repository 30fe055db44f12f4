//! Performance analyzer (§4.J): a heuristic pre-install warning generator
//! driven by a fixed size/time table and the app's recent metrics history.

use devex_schema::PerformanceMetric;

const LARGE_SIZE_THRESHOLD: u64 = 100 * 1024 * 1024;
const HUGE_SIZE_THRESHOLD: u64 = 500 * 1024 * 1024;
const MASSIVE_SIZE_THRESHOLD: u64 = 1024 * 1024 * 1024;

const LONG_INSTALL_THRESHOLD_SECS: u64 = 5 * 60;
const VERY_LONG_INSTALL_THRESHOLD_SECS: u64 = 15 * 60;

const MANY_DEPENDENCIES_THRESHOLD: usize = 10;
const TOO_MANY_DEPENDENCIES_THRESHOLD: usize = 25;

const HIGH_FAILURE_RATE_THRESHOLD: f64 = 0.10;
const CRITICAL_FAILURE_RATE_THRESHOLD: f64 = 0.25;

/// Severity of a generated warning (§4.J).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WarningLevel {
    /// Informational, no action implied.
    Info,
    /// Worth a second look but not unusual.
    Caution,
    /// Likely to surprise the user if unmentioned.
    Warning,
    /// Expected to disrupt the system or take an unusually long time.
    Critical,
}

/// Estimated system impact of an install, surfaced alongside a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemImpact {
    /// Negligible.
    Low,
    /// Noticeable disk/network/time cost.
    Medium,
    /// Large download, long install, or a restart.
    High,
}

/// Supporting metrics attached to a warning (§4.J).
#[derive(Debug, Clone)]
pub struct WarningMetrics {
    /// Estimated package size in bytes, if known.
    pub size: Option<u64>,
    /// Estimated install time.
    pub est_time: Option<std::time::Duration>,
    /// Historical failure rate over the observed metrics window, `0.0..=1.0`.
    pub historical_failure_rate: Option<f64>,
    /// Whether this app is known to require a restart after install.
    pub requires_restart: bool,
    /// Estimated system impact.
    pub system_impact: SystemImpact,
}

/// A single pre-install warning (§4.J).
#[derive(Debug, Clone)]
pub struct Warning {
    /// Severity.
    pub level: WarningLevel,
    /// App the warning concerns.
    pub app: String,
    /// One-line human-readable summary.
    pub message: String,
    /// Supporting detail lines.
    pub details: Vec<String>,
    /// Suggested follow-ups for the user.
    pub suggestions: Vec<String>,
    /// Supporting metrics.
    pub metrics: WarningMetrics,
}

/// A fixed per-app size/time estimate, with a small set of named exceptions
/// to the generic "unknown app" defaults (§4.J).
#[derive(Debug, Clone, Copy)]
pub struct SizeEstimate {
    /// Estimated download/install footprint in bytes.
    pub size_bytes: u64,
    /// Estimated wall-clock install time.
    pub install_time: std::time::Duration,
    /// Whether this app is known to require a restart.
    pub requires_restart: bool,
}

/// Looks up the fixed size/time table, falling back to a conservative
/// default for apps with no named entry.
fn estimate_for(app: &str) -> SizeEstimate {
    match app {
        "docker" => SizeEstimate {
            size_bytes: 550 * 1024 * 1024,
            install_time: std::time::Duration::from_secs(6 * 60),
            requires_restart: true,
        },
        "android-studio" => SizeEstimate {
            size_bytes: 1200 * 1024 * 1024,
            install_time: std::time::Duration::from_secs(18 * 60),
            requires_restart: false,
        },
        _ => SizeEstimate {
            size_bytes: 20 * 1024 * 1024,
            install_time: std::time::Duration::from_secs(30),
            requires_restart: false,
        },
    }
}

fn failure_rate(history: &[PerformanceMetric]) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let failures = history.iter().filter(|m| !m.success).count();
    #[allow(clippy::cast_precision_loss)]
    Some(failures as f64 / history.len() as f64)
}

fn system_impact(size_bytes: u64, install_secs: u64, requires_restart: bool) -> SystemImpact {
    if requires_restart || size_bytes >= MASSIVE_SIZE_THRESHOLD || install_secs >= VERY_LONG_INSTALL_THRESHOLD_SECS {
        SystemImpact::High
    } else if size_bytes >= LARGE_SIZE_THRESHOLD || install_secs >= LONG_INSTALL_THRESHOLD_SECS {
        SystemImpact::Medium
    } else {
        SystemImpact::Low
    }
}

/// Generates ordered pre-install warnings for `app`, from its fixed
/// size/time estimate, dependency count, and recent metrics `history`
/// (§4.J). The runner emits these but never blocks on them.
pub fn analyze_pre_install(app: &str, dependency_count: usize, history: &[PerformanceMetric]) -> Vec<Warning> {
    let estimate = estimate_for(app);
    let install_secs = estimate.install_time.as_secs();
    let impact = system_impact(estimate.size_bytes, install_secs, estimate.requires_restart);
    let rate = failure_rate(history);

    let mut warnings = Vec::new();

    if estimate.size_bytes >= MASSIVE_SIZE_THRESHOLD {
        warnings.push(size_warning(app, WarningLevel::Critical, estimate, impact, rate, "very large download"));
    } else if estimate.size_bytes >= HUGE_SIZE_THRESHOLD {
        warnings.push(size_warning(app, WarningLevel::Warning, estimate, impact, rate, "large download"));
    } else if estimate.size_bytes >= LARGE_SIZE_THRESHOLD {
        warnings.push(size_warning(app, WarningLevel::Caution, estimate, impact, rate, "sizeable download"));
    }

    if install_secs >= VERY_LONG_INSTALL_THRESHOLD_SECS {
        warnings.push(time_warning(app, WarningLevel::Critical, estimate, impact, rate, "expected to take over 15 minutes"));
    } else if install_secs >= LONG_INSTALL_THRESHOLD_SECS {
        warnings.push(time_warning(app, WarningLevel::Warning, estimate, impact, rate, "expected to take over 5 minutes"));
    }

    if dependency_count >= TOO_MANY_DEPENDENCIES_THRESHOLD {
        warnings.push(Warning {
            level: WarningLevel::Warning,
            app: app.to_string(),
            message: format!("{app} pulls in {dependency_count} dependencies"),
            details: vec!["an unusually large dependency set".to_string()],
            suggestions: vec!["review the dependency list before proceeding".to_string()],
            metrics: WarningMetrics {
                size: Some(estimate.size_bytes),
                est_time: Some(estimate.install_time),
                historical_failure_rate: rate,
                requires_restart: estimate.requires_restart,
                system_impact: impact,
            },
        });
    } else if dependency_count >= MANY_DEPENDENCIES_THRESHOLD {
        warnings.push(Warning {
            level: WarningLevel::Caution,
            app: app.to_string(),
            message: format!("{app} depends on {dependency_count} other apps"),
            details: Vec::new(),
            suggestions: Vec::new(),
            metrics: WarningMetrics {
                size: Some(estimate.size_bytes),
                est_time: Some(estimate.install_time),
                historical_failure_rate: rate,
                requires_restart: estimate.requires_restart,
                system_impact: impact,
            },
        });
    }

    if let Some(rate) = rate {
        if rate >= CRITICAL_FAILURE_RATE_THRESHOLD {
            warnings.push(rate_warning(app, WarningLevel::Critical, estimate, impact, rate, "frequently fails to install"));
        } else if rate >= HIGH_FAILURE_RATE_THRESHOLD {
            warnings.push(rate_warning(app, WarningLevel::Warning, estimate, impact, rate, "has an elevated failure rate"));
        }
    }

    if estimate.requires_restart {
        warnings.push(Warning {
            level: WarningLevel::Info,
            app: app.to_string(),
            message: format!("{app} requires a restart after install"),
            details: Vec::new(),
            suggestions: vec!["schedule this install when a restart is convenient".to_string()],
            metrics: WarningMetrics {
                size: Some(estimate.size_bytes),
                est_time: Some(estimate.install_time),
                historical_failure_rate: rate,
                requires_restart: true,
                system_impact: impact,
            },
        });
    }

    warnings
}

fn size_warning(app: &str, level: WarningLevel, estimate: SizeEstimate, impact: SystemImpact, rate: Option<f64>, message: &str) -> Warning {
    Warning {
        level,
        app: app.to_string(),
        message: format!("{app}: {message}"),
        details: vec![format!("estimated size {} MiB", estimate.size_bytes / (1024 * 1024))],
        suggestions: Vec::new(),
        metrics: WarningMetrics {
            size: Some(estimate.size_bytes),
            est_time: Some(estimate.install_time),
            historical_failure_rate: rate,
            requires_restart: estimate.requires_restart,
            system_impact: impact,
        },
    }
}

fn time_warning(app: &str, level: WarningLevel, estimate: SizeEstimate, impact: SystemImpact, rate: Option<f64>, message: &str) -> Warning {
    Warning {
        level,
        app: app.to_string(),
        message: format!("{app}: {message}"),
        details: vec![format!("estimated install time {} min", estimate.install_time.as_secs() / 60)],
        suggestions: Vec::new(),
        metrics: WarningMetrics {
            size: Some(estimate.size_bytes),
            est_time: Some(estimate.install_time),
            historical_failure_rate: rate,
            requires_restart: estimate.requires_restart,
            system_impact: impact,
        },
    }
}

fn rate_warning(app: &str, level: WarningLevel, estimate: SizeEstimate, impact: SystemImpact, rate: f64, message: &str) -> Warning {
    Warning {
        level,
        app: app.to_string(),
        message: format!("{app} {message}"),
        details: vec![format!("{:.0}% of recent attempts failed", rate * 100.0)],
        suggestions: vec!["check connectivity and available disk space before retrying".to_string()],
        metrics: WarningMetrics {
            size: Some(estimate.size_bytes),
            est_time: Some(estimate.install_time),
            historical_failure_rate: Some(rate),
            requires_restart: estimate.requires_restart,
            system_impact: impact,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metric(success: bool) -> PerformanceMetric {
        PerformanceMetric {
            app: "curl".into(),
            method: "package-manager-apt".into(),
            platform: "linux".into(),
            download_time_ms: Some(10),
            install_time_ms: 100,
            total_time_ms: 110,
            package_size: Some(1024),
            success,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn unknown_small_app_has_no_size_or_time_warnings() {
        let warnings = analyze_pre_install("curl", 1, &[]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn docker_flags_huge_size_and_restart() {
        let warnings = analyze_pre_install("docker", 2, &[]);
        assert!(warnings.iter().any(|w| w.message.contains("large download")));
        assert!(warnings.iter().any(|w| w.message.contains("requires a restart")));
    }

    #[test]
    fn android_studio_flags_critical_size_and_long_install() {
        let warnings = analyze_pre_install("android-studio", 0, &[]);
        assert!(warnings.iter().any(|w| w.level == WarningLevel::Critical && w.message.contains("very large download")));
        assert!(warnings.iter().any(|w| w.message.contains("over 15 minutes")));
    }

    #[test]
    fn many_dependencies_thresholds() {
        let caution = analyze_pre_install("curl", 10, &[]);
        assert!(caution.iter().any(|w| w.level == WarningLevel::Caution));
        let warning = analyze_pre_install("curl", 25, &[]);
        assert!(warning.iter().any(|w| w.level == WarningLevel::Warning && w.message.contains("dependencies")));
    }

    #[test]
    fn high_failure_rate_generates_warning() {
        let history: Vec<_> = (0..10).map(|i| metric(i >= 2)).collect(); // 20% failures
        let warnings = analyze_pre_install("curl", 0, &history);
        assert!(warnings.iter().any(|w| w.level == WarningLevel::Warning && w.message.contains("elevated failure rate")));
    }

    #[test]
    fn critical_failure_rate_generates_critical_warning() {
        let history: Vec<_> = (0..10).map(|i| metric(i >= 7)).collect(); // 30% failures
        let warnings = analyze_pre_install("curl", 0, &history);
        assert!(warnings.iter().any(|w| w.level == WarningLevel::Critical && w.message.contains("frequently fails")));
    }
}
