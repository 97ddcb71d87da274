//! Per-check state machine with dwell-time hysteresis.
//!
//! A check is in exactly one of five live states. `FAIL_WAIT` and
//! `PASS_WAIT` are dwell buffers: the aggregate has to stay bad enough
//! (or good enough) for `min_failing_time` before the definitive `FAIL`
//! or `OK` is announced. The machine is driven by three inputs at
//! evaluation time — aggregate failing count, the check's failing
//! threshold, and how long the check has been in its current state.
//!
//! [`State::transition`] folds one new [`CheckResult`] into the aggregate
//! and evaluates the current state's transition function. Transition hooks
//! fire before the entry timestamps are reset, so observers see the state
//! as it was on entry (including the full dwell window) together with the
//! destination state id.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::check::CheckResult;
use crate::hooks::HookRegistry;

// ---------------------------------------------------------------------------
// StateId
// ---------------------------------------------------------------------------

/// Check state identifiers as persisted in `check_states.state_id`.
///
/// `Invalid` is a sentinel: no row may carry it, and a transition function
/// returning it is a bug surfaced as [`StateError::InvalidTransition`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StateId {
    Invalid = 0,
    Ok = 1,
    FailWait = 2,
    PassWait = 3,
    Fail = 4,
    Warn = 5,
}

/// The live states, in id order. `Invalid` is deliberately absent.
pub const LIVE_STATES: [StateId; 5] = [
    StateId::Ok,
    StateId::FailWait,
    StateId::PassWait,
    StateId::Fail,
    StateId::Warn,
];

impl StateId {
    /// Database representation.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Canonical state name, mirrored into `check_states.state_name`.
    pub fn name(self) -> &'static str {
        match self {
            StateId::Invalid => "INVALID",
            StateId::Ok => "OK",
            StateId::FailWait => "FAIL_WAIT",
            StateId::PassWait => "PASS_WAIT",
            StateId::Fail => "FAIL",
            StateId::Warn => "WARN",
        }
    }

    /// Decode a persisted state id. Unknown values return `None` so the
    /// caller can surface [`StateError::UnknownState`].
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(StateId::Invalid),
            1 => Some(StateId::Ok),
            2 => Some(StateId::FailWait),
            3 => Some(StateId::PassWait),
            4 => Some(StateId::Fail),
            5 => Some(StateId::Warn),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// State machine invariant violations. Both are non-retryable for the
/// message being processed; the caller rolls its transaction back.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The current state id has no transition function.
    #[error("unknown check state id: {0}")]
    UnknownState(i32),

    /// A transition function returned the `INVALID` sentinel.
    #[error(
        "invalid transition from {from} (failing={failing_count}, min_failing={min_failing_count})"
    )]
    InvalidTransition {
        from: &'static str,
        failing_count: i32,
        min_failing_count: i32,
    },
}

// ---------------------------------------------------------------------------
// ResultMemo
// ---------------------------------------------------------------------------

/// Latest-observation summary for one `(check_id, bastion_id)` pair.
///
/// Memos are the unit the state machine aggregates: the check-wide failing
/// and response counts are sums over the live memos of that check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMemo {
    pub check_id: String,
    pub customer_id: String,
    pub bastion_id: String,
    pub failing_count: i32,
    pub response_count: i32,
    /// Timestamp of the most recent observation folded into this row.
    /// Monotonic per `(check_id, bastion_id)`.
    pub last_updated: DateTime<Utc>,
}

impl ResultMemo {
    /// Summarize a wire result into its memo.
    pub fn from_result(result: &CheckResult) -> Self {
        Self {
            check_id: result.check_id.clone(),
            customer_id: result.customer_id.clone(),
            bastion_id: result.bastion_key().to_string(),
            failing_count: result.failing_count(),
            response_count: result.responses.len() as i32,
            last_updated: result.observed_at(),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Authoritative per-check state row plus the in-memory memo aggregate.
#[derive(Debug, Clone)]
pub struct State {
    pub check_id: String,
    pub customer_id: String,
    pub id: StateId,
    /// Mirror of `id.name()`, kept because the row stores both.
    pub state_name: String,
    pub time_entered: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub min_failing_count: i32,
    /// Materialized once, at the store read. Nothing else converts units.
    pub min_failing_time: Duration,
    pub failing_count: i32,
    pub response_count: i32,
    /// Live memos keyed by bastion id, hydrated under the row lock.
    pub results: HashMap<String, ResultMemo>,
}

impl State {
    /// Fresh `OK` state for a check that has never been reconciled.
    pub fn initial(
        check_id: &str,
        customer_id: &str,
        min_failing_count: i32,
        min_failing_time: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            check_id: check_id.to_string(),
            customer_id: customer_id.to_string(),
            id: StateId::Ok,
            state_name: StateId::Ok.name().to_string(),
            time_entered: now,
            last_updated: now,
            min_failing_count,
            min_failing_time,
            failing_count: 0,
            response_count: 0,
            results: HashMap::new(),
        }
    }

    /// How long the check has been in its current state.
    pub fn time_in_state(&self) -> Duration {
        self.last_updated - self.time_entered
    }

    /// Fold `result` into the aggregate and evaluate the state machine.
    ///
    /// In order: replace this bastion's memo, recompute the aggregate
    /// counters from the memo map, stamp `last_updated`, evaluate the
    /// current state's transition function, and — when the state changes —
    /// fire hooks against the pre-transition record before resetting
    /// `time_entered`.
    pub fn transition(
        &mut self,
        result: &CheckResult,
        hooks: &HookRegistry,
    ) -> Result<(), StateError> {
        self.results
            .insert(result.bastion_key().to_string(), ResultMemo::from_result(result));

        let mut failing = 0;
        let mut responses = 0;
        for memo in self.results.values() {
            failing += memo.failing_count;
            responses += memo.response_count;
        }
        self.failing_count = failing;
        self.response_count = responses;

        self.last_updated = Utc::now();

        let state_fn = transition_fn(self.id).ok_or(StateError::UnknownState(self.id.id()))?;
        let next = state_fn(self);
        if next == StateId::Invalid {
            return Err(StateError::InvalidTransition {
                from: self.id.name(),
                failing_count: self.failing_count,
                min_failing_count: self.min_failing_count,
            });
        }

        if next != self.id {
            // Hooks observe the state as it was on entry: old id, old
            // time_entered, and therefore the full dwell window.
            hooks.fire(next, self, result);
            let now = Utc::now();
            self.time_entered = now;
            self.last_updated = now;
        }

        self.id = next;
        self.state_name = next.name().to_string();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transition functions
// ---------------------------------------------------------------------------

type StateFn = fn(&State) -> StateId;

fn transition_fn(id: StateId) -> Option<StateFn> {
    match id {
        StateId::Ok => Some(ok),
        StateId::FailWait => Some(fail_wait),
        StateId::PassWait => Some(pass_wait),
        StateId::Fail => Some(fail),
        StateId::Warn => Some(warn),
        StateId::Invalid => None,
    }
}

fn ok(s: &State) -> StateId {
    if s.failing_count == 0 {
        StateId::Ok
    } else if s.failing_count < s.min_failing_count {
        StateId::Warn
    } else {
        StateId::FailWait
    }
}

// A dwell exactly equal to min_failing_time has not yet expired: the
// escalating arms require time_in_state() to strictly exceed it.
fn fail_wait(s: &State) -> StateId {
    if s.failing_count == 0 {
        StateId::Ok
    } else if s.failing_count < s.min_failing_count {
        StateId::Warn
    } else if s.time_in_state() > s.min_failing_time {
        StateId::Fail
    } else {
        StateId::FailWait
    }
}

fn pass_wait(s: &State) -> StateId {
    if s.failing_count >= s.min_failing_count {
        StateId::Fail
    } else if s.time_in_state() <= s.min_failing_time {
        StateId::PassWait
    } else if s.failing_count == 0 {
        StateId::Ok
    } else {
        StateId::Warn
    }
}

fn fail(s: &State) -> StateId {
    if s.failing_count >= s.min_failing_count {
        StateId::Fail
    } else {
        StateId::PassWait
    }
}

fn warn(s: &State) -> StateId {
    if s.failing_count == 0 {
        StateId::Ok
    } else if s.failing_count < s.min_failing_count {
        StateId::Warn
    } else {
        StateId::FailWait
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
