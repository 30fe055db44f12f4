//! Performance metric rows recorded by the state store (§3 "Repository").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the append-only `performance_metrics` log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetric {
    /// Application name this metric is about.
    pub app: String,
    /// Install method used (e.g. `"package-manager-apt"`, `"script"`).
    pub method: String,
    /// Platform tag the install ran on.
    pub platform: String,
    /// Milliseconds spent downloading, if applicable.
    pub download_time_ms: Option<u64>,
    /// Milliseconds spent in the main install step.
    pub install_time_ms: u64,
    /// Total milliseconds for the whole pipeline run (pre + main + post).
    pub total_time_ms: u64,
    /// Size of the downloaded/installed package in bytes, if known.
    pub package_size: Option<u64>,
    /// Whether the install ultimately succeeded.
    pub success: bool,
    /// When the row was recorded.
    pub timestamp: DateTime<Utc>,
}
