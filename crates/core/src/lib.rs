//! Check-state domain logic shared by every vigil crate.
//!
//! This crate has no internal dependencies and no knowledge of storage or
//! transport: the wire envelope ([`check`]), the per-check state machine
//! ([`state`]), and the transition hook registry ([`hooks`]) are all pure.
//! Persistence lives in `vigil_db` / `vigil_results`; orchestration lives
//! in `vigil_worker`.

pub mod check;
pub mod hooks;
pub mod state;

pub use check::{normalize_response, CheckResponse, CheckResult, NormalizeError, Target, Timestamp};
pub use hooks::{HookRegistry, TransitionHook};
pub use state::{ResultMemo, State, StateError, StateId, LIVE_STATES};
