//! The worker host's standard hook set.
//!
//! Every transition is logged. Alert publication fires only on the
//! definitive edge out of a dwell state — `PASS_WAIT → OK/WARN` and
//! `FAIL_WAIT → FAIL` — never on WARN flicker, so downstream alerting sees
//! one notification per confirmed state change.

use vigil_core::{CheckResult, HookRegistry, State, StateId};

use crate::notifier::AlertSender;

/// Assemble the registry. Built once at startup, before the consumer
/// starts; shared read-only afterwards.
pub fn build_registry(alerts: Option<AlertSender>) -> HookRegistry {
    let mut registry = HookRegistry::new();
    registry.register_all(log_transition);

    if let Some(alerts) = alerts {
        let sender = alerts.clone();
        registry.register(StateId::Ok, move |new_id, state, result| {
            if state.id == StateId::PassWait && new_id == StateId::Ok {
                sender.send(result);
            }
        });

        let sender = alerts.clone();
        registry.register(StateId::Warn, move |new_id, state, result| {
            if state.id == StateId::PassWait && new_id == StateId::Warn {
                sender.send(result);
            }
        });

        let sender = alerts;
        registry.register(StateId::Fail, move |new_id, state, result| {
            if state.id == StateId::FailWait && new_id == StateId::Fail {
                sender.send(result);
            }
        });
    }

    registry
}

/// Hooks observe the pre-transition record, so `state.id` is the old state
/// and `time_in_state()` is the dwell that just completed.
fn log_transition(new_id: StateId, state: &State, _result: &CheckResult) {
    tracing::info!(
        customer_id = %state.customer_id,
        check_id = %state.check_id,
        min_failing_count = state.min_failing_count,
        min_failing_time_s = state.min_failing_time.num_seconds(),
        failing_count = state.failing_count,
        failing_time_s = state.time_in_state().num_seconds(),
        old_state = %state.state_name,
        new_state = new_id.name(),
        "check state changed"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
