//! Hierarchical progress state and stepped-operation weighting (§4.K, §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Created but not yet started.
    Pending,
    /// Actively executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Skipped (e.g. already-installed idempotence).
    Skipped,
    /// Cancelled via the top-level cancellation context.
    Cancelled,
}

impl ProgressStatus {
    /// Terminal statuses set `end_time` when transitioned into.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }
}

/// A single hierarchical operation's tracked state (§3 "Progress state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    /// Unique id, typically a ULID-like string or an incrementing counter rendered as text.
    pub id: String,
    /// Parent operation id, if this is a child step.
    pub parent_id: Option<String>,
    /// Human-readable name, e.g. the app name.
    pub name: String,
    /// Longer description shown in the UI.
    pub description: String,
    /// Free-form operation type tag (`"install"`, `"download"`, ...).
    pub r#type: String,
    /// Current lifecycle status.
    pub status: ProgressStatus,
    /// Fractional completion, always clamped to `[0, 1]`.
    pub progress: f64,
    /// When the operation was created.
    pub start_time: DateTime<Utc>,
    /// When the operation reached a terminal status.
    pub end_time: Option<DateTime<Utc>>,
    /// Free-form detail text (e.g. current step name).
    pub details: String,
    /// Error message, set only on `Failed`.
    pub error: Option<String>,
    /// Arbitrary metadata for the UI (download speed, file counts, ...).
    pub metadata: HashMap<String, String>,
    /// Child operation ids, in creation order.
    pub children: Vec<String>,
}

impl ProgressState {
    /// Creates a new, `Pending` progress state.
    pub fn new(id: impl Into<String>, name: impl Into<String>, r#type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            name: name.into(),
            description: String::new(),
            r#type: r#type.into(),
            status: ProgressStatus::Pending,
            progress: 0.0,
            start_time: Utc::now(),
            end_time: None,
            details: String::new(),
            error: None,
            metadata: HashMap::new(),
            children: Vec::new(),
        }
    }

    /// Sets `progress`, clamping to `[0, 1]`.
    pub fn set_progress(&mut self, progress: f64) {
        self.progress = progress.clamp(0.0, 1.0);
    }

    /// Transitions to a new status, applying the terminal-status invariants:
    /// `end_time` is set, and `Completed` forces `progress = 1.0`.
    pub fn transition(&mut self, status: ProgressStatus) {
        self.status = status;
        if status.is_terminal() {
            self.end_time = Some(Utc::now());
            if status == ProgressStatus::Completed {
                self.progress = 1.0;
            }
        }
    }
}

/// A named step with a positive weight, part of a `SteppedOperation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step name shown in the UI.
    pub name: String,
    /// Relative weight; must be `> 0`.
    pub weight: f64,
}

/// A view over an operation whose overall completion is a weighted sum of
/// named steps (§3 "Stepped operation").
#[derive(Debug, Clone)]
pub struct SteppedOperation {
    steps: Vec<Step>,
    current_index: usize,
    step_progress: f64,
}

impl SteppedOperation {
    /// Builds a stepped operation. Panics if any weight is not `> 0` -- this
    /// is a programmer error in the catalog/strategy definition, not a
    /// runtime condition the spec asks callers to recover from.
    pub fn new(steps: Vec<Step>) -> Self {
        assert!(
            steps.iter().all(|s| s.weight > 0.0),
            "all step weights must be positive"
        );
        Self {
            steps,
            current_index: 0,
            step_progress: 0.0,
        }
    }

    /// Sets the fractional completion of the current step, clamped to `[0, 1]`.
    pub fn set_step_progress(&mut self, progress: f64) {
        self.step_progress = progress.clamp(0.0, 1.0);
    }

    /// Marks the current step complete and advances to the next one.
    pub fn complete_step(&mut self) {
        if self.current_index < self.steps.len() {
            self.current_index += 1;
            self.step_progress = 0.0;
        }
    }

    /// Computes overall progress: `(Σ completed weights + current_step_progress · current_weight) / Σ weights`.
    pub fn progress(&self) -> f64 {
        let total_weight: f64 = self.steps.iter().map(|s| s.weight).sum();
        if total_weight <= 0.0 {
            return 1.0;
        }
        let completed_weight: f64 = self.steps[..self.current_index.min(self.steps.len())]
            .iter()
            .map(|s| s.weight)
            .sum();
        let current_weight = self
            .steps
            .get(self.current_index)
            .map(|s| s.weight)
            .unwrap_or(0.0);
        (completed_weight + self.step_progress * current_weight) / total_weight
    }

    /// The name of the currently active step, if any remain.
    pub fn current_step_name(&self) -> Option<&str> {
        self.steps.get(self.current_index).map(|s| s.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_clamped_to_unit_interval() {
        let mut state = ProgressState::new("1", "curl", "install");
        state.set_progress(1.5);
        assert_eq!(state.progress, 1.0);
        state.set_progress(-0.5);
        assert_eq!(state.progress, 0.0);
    }

    #[test]
    fn completed_forces_full_progress() {
        let mut state = ProgressState::new("1", "curl", "install");
        state.set_progress(0.4);
        state.transition(ProgressStatus::Completed);
        assert_eq!(state.progress, 1.0);
        assert!(state.end_time.is_some());
    }

    #[test]
    fn stepped_operation_reaches_one_after_all_steps() {
        let mut op = SteppedOperation::new(vec![
            Step {
                name: "download".into(),
                weight: 3.0,
            },
            Step {
                name: "install".into(),
                weight: 1.0,
            },
        ]);
        op.set_step_progress(1.0);
        op.complete_step();
        op.set_step_progress(1.0);
        op.complete_step();
        assert!((op.progress() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn stepped_operation_midway_weighting() {
        let mut op = SteppedOperation::new(vec![
            Step {
                name: "a".into(),
                weight: 1.0,
            },
            Step {
                name: "b".into(),
                weight: 1.0,
            },
        ]);
        op.set_step_progress(0.5);
        assert!((op.progress() - 0.25).abs() < 1e-9);
    }
}
