//! Transition hook registry.
//!
//! Observers are registered per destination state before the worker host
//! starts consuming; after startup the registry is shared read-only
//! (typically as an `Arc<HookRegistry>`), so firing takes `&self` and no
//! locking.
//!
//! Hooks run synchronously, in registration order, while the reconciler
//! still holds its transaction. A hook must not block on I/O — anything
//! slow (queue publication, HTTP) belongs behind a non-blocking enqueue to
//! a background task. Hooks receive the state record as it was on entry
//! (old id, old `time_entered`) plus the destination state id and the
//! result that triggered the transition.

use std::collections::HashMap;
use std::sync::Arc;

use crate::check::CheckResult;
use crate::state::{State, StateId, LIVE_STATES};

/// Observer invoked when a check's state id changes.
///
/// Arguments: destination state id, pre-transition state, triggering result.
pub type TransitionHook = Arc<dyn Fn(StateId, &State, &CheckResult) + Send + Sync>;

/// Process-wide mapping from destination state id to its ordered hooks.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<StateId, Vec<TransitionHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook for transitions into `dest`.
    pub fn register<F>(&mut self, dest: StateId, hook: F)
    where
        F: Fn(StateId, &State, &CheckResult) + Send + Sync + 'static,
    {
        self.register_arc(dest, Arc::new(hook));
    }

    /// Register a hook for transitions into every live state.
    pub fn register_all<F>(&mut self, hook: F)
    where
        F: Fn(StateId, &State, &CheckResult) + Send + Sync + 'static,
    {
        let hook: TransitionHook = Arc::new(hook);
        for dest in LIVE_STATES {
            self.register_arc(dest, Arc::clone(&hook));
        }
    }

    fn register_arc(&mut self, dest: StateId, hook: TransitionHook) {
        self.hooks.entry(dest).or_default().push(hook);
    }

    /// Invoke every hook registered for `dest`, in registration order.
    pub fn fire(&self, dest: StateId, state: &State, result: &CheckResult) {
        if let Some(hooks) = self.hooks.get(&dest) {
            for hook in hooks {
                hook(dest, state, result);
            }
        }
    }
}
