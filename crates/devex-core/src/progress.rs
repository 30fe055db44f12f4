//! Progress tracker (§4.K): a `id -> state` map with parent/child links and
//! listener fan-out. A listener panic is caught and logged but never stops
//! the others from being notified.

use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

use devex_schema::{ProgressState, ProgressStatus};

type Listener = Box<dyn Fn(&ProgressState) + Send + Sync>;

struct Inner {
    operations: std::collections::HashMap<String, ProgressState>,
    listeners: Vec<Listener>,
    next_id: u64,
}

/// Tracks every in-flight and completed operation for a single run (§4.K).
pub struct ProgressTracker {
    inner: Mutex<Inner>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Builds an empty tracker with no listeners.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                operations: std::collections::HashMap::new(),
                listeners: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Registers a listener notified on every state change, in registration
    /// order (§4.K).
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&ProgressState) + Send + Sync + 'static,
    {
        self.inner.lock().expect("progress tracker mutex poisoned").listeners.push(Box::new(listener));
    }

    /// Registers a new operation, linking it to `parent_id` if given, and
    /// notifies listeners of its initial `Pending` state. Returns the
    /// generated id.
    pub fn register(&self, parent_id: Option<&str>, name: &str, op_type: &str) -> String {
        let mut inner = self.inner.lock().expect("progress tracker mutex poisoned");
        let id = inner.next_id.to_string();
        inner.next_id += 1;

        let mut state = ProgressState::new(id.clone(), name, op_type);
        state.parent_id = parent_id.map(str::to_string);
        if let Some(parent_id) = parent_id {
            if let Some(parent) = inner.operations.get_mut(parent_id) {
                parent.children.push(id.clone());
            }
        }
        inner.operations.insert(id.clone(), state.clone());
        notify(&inner.listeners, &state);
        id
    }

    /// Sets fractional progress on `id` and notifies listeners.
    pub fn set_progress(&self, id: &str, progress: f64) {
        self.mutate(id, |state| state.set_progress(progress));
    }

    /// Transitions `id` to `status` and notifies listeners.
    pub fn transition(&self, id: &str, status: ProgressStatus) {
        self.mutate(id, |state| state.transition(status));
    }

    /// Sets the free-form detail text on `id` and notifies listeners.
    pub fn set_details(&self, id: &str, details: impl Into<String>) {
        let details = details.into();
        self.mutate(id, move |state| state.details = details);
    }

    /// Marks `id` `Failed` with `error` and notifies listeners.
    pub fn fail(&self, id: &str, error: impl Into<String>) {
        let error = error.into();
        self.mutate(id, move |state| {
            state.error = Some(error);
            state.transition(ProgressStatus::Failed);
        });
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut ProgressState)) {
        let mut inner = self.inner.lock().expect("progress tracker mutex poisoned");
        let Some(state) = inner.operations.get_mut(id) else {
            return;
        };
        f(state);
        let snapshot = state.clone();
        notify(&inner.listeners, &snapshot);
    }

    /// Returns a snapshot of `id`'s current state.
    pub fn get(&self, id: &str) -> Option<ProgressState> {
        self.inner.lock().expect("progress tracker mutex poisoned").operations.get(id).cloned()
    }

    /// Returns snapshots of `id`'s children, in creation order.
    pub fn children(&self, id: &str) -> Vec<ProgressState> {
        let inner = self.inner.lock().expect("progress tracker mutex poisoned");
        let Some(parent) = inner.operations.get(id) else {
            return Vec::new();
        };
        parent
            .children
            .iter()
            .filter_map(|child_id| inner.operations.get(child_id).cloned())
            .collect()
    }
}

fn notify(listeners: &[Listener], state: &ProgressState) {
    for listener in listeners {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(state)));
        if result.is_err() {
            tracing::error!(id = %state.id, "progress listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn register_links_parent_and_child() {
        let tracker = ProgressTracker::new();
        let parent = tracker.register(None, "install curl", "install");
        let child = tracker.register(Some(&parent), "download", "download");
        let children = tracker.children(&parent);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child);
    }

    #[test]
    fn transition_to_completed_forces_full_progress() {
        let tracker = ProgressTracker::new();
        let id = tracker.register(None, "curl", "install");
        tracker.set_progress(&id, 0.3);
        tracker.transition(&id, ProgressStatus::Completed);
        let state = tracker.get(&id).unwrap();
        assert_eq!(state.progress, 1.0);
        assert!(state.end_time.is_some());
    }

    #[test]
    fn listeners_are_notified_in_order() {
        let tracker = ProgressTracker::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let calls = Arc::clone(&calls);
            tracker.add_listener(move |state| calls.lock().unwrap().push((tag, state.status)));
        }
        let id = tracker.register(None, "curl", "install");
        let seen = calls.lock().unwrap().clone();
        assert_eq!(seen, vec![("first", ProgressStatus::Pending), ("second", ProgressStatus::Pending)]);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let tracker = ProgressTracker::new();
        let hit = Arc::new(AtomicUsize::new(0));
        tracker.add_listener(|_state| panic!("boom"));
        let hit2 = Arc::clone(&hit);
        tracker.add_listener(move |_state| {
            hit2.fetch_add(1, Ordering::SeqCst);
        });
        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        tracker.register(None, "curl", "install");
        std::panic::set_hook(prev_hook);
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }
}
