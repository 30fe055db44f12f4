//! Undo log entries and the pure risk assessor (§4.F).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed set of operation kinds the undo log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UndoKind {
    /// A fresh application install.
    Install,
    /// An application removal.
    Uninstall,
    /// First-run initialization (resets configuration).
    Init,
    /// A configuration file change outside of install/uninstall.
    ConfigChange,
}

/// A single undo-log entry (§3 "Undo operation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoOperation {
    /// Unique, time-ordered id.
    pub id: String,
    /// When the operation was recorded.
    pub timestamp: DateTime<Utc>,
    /// What kind of operation this guards.
    pub kind: UndoKind,
    /// Human-readable description.
    pub description: String,
    /// The app name or config path this operation targets.
    pub target: String,
    /// The backup id taken at record time.
    pub backup_id: String,
    /// Config version before the operation.
    pub version_from: Option<u64>,
    /// Config version after the operation; set at finalize time.
    pub version_to: Option<u64>,
    /// Whether this entry can still be undone.
    pub can_undo: bool,
    /// Risk strings attached by the risk assessor at record time.
    pub risks: Vec<String>,
    /// Arbitrary metadata (e.g. `change_type` for config changes).
    pub metadata: HashMap<String, String>,
    /// Timestamp of the most recent undo of this entry, if any.
    pub last_undo: Option<DateTime<Utc>>,
}

/// Pure function: returns the risk strings for a proposed undo-log entry.
///
/// No I/O; callers are expected to call this at record time and store the
/// result on the entry so `Undo` can refuse without re-deriving risk from
/// possibly-stale state.
pub fn assess_risks(kind: UndoKind, target: &str, metadata: &HashMap<String, String>) -> Vec<String> {
    let mut risks = Vec::new();
    match kind {
        UndoKind::Init => risks.push("will reset configuration".to_string()),
        UndoKind::Uninstall if !target.is_empty() => {
            risks.push(format!("will remove installed application '{target}'"));
        }
        UndoKind::ConfigChange => {
            if let Some(change_type) = metadata.get("change_type") {
                if change_type == "system" || change_type == "environment" {
                    risks.push(format!("config change affects {change_type} scope"));
                }
            }
        }
        _ => {}
    }
    risks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_always_risky() {
        let risks = assess_risks(UndoKind::Init, "", &HashMap::new());
        assert_eq!(risks, vec!["will reset configuration".to_string()]);
    }

    #[test]
    fn uninstall_risky_only_with_target() {
        assert!(assess_risks(UndoKind::Uninstall, "", &HashMap::new()).is_empty());
        assert!(!assess_risks(UndoKind::Uninstall, "docker", &HashMap::new()).is_empty());
    }

    #[test]
    fn config_change_risky_for_system_or_environment() {
        let mut meta = HashMap::new();
        meta.insert("change_type".to_string(), "system".to_string());
        assert!(!assess_risks(UndoKind::ConfigChange, "x", &meta).is_empty());

        meta.insert("change_type".to_string(), "user".to_string());
        assert!(assess_risks(UndoKind::ConfigChange, "x", &meta).is_empty());
    }

    #[test]
    fn install_carries_no_risk() {
        assert!(assess_risks(UndoKind::Install, "curl", &HashMap::new()).is_empty());
    }
}
