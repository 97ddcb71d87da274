//! `check_states` rows, joined against the check definition on read.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use vigil_core::{State, StateError, StateId};

/// A `check_states` row plus the two threshold columns joined from
/// `checks`. Produced only by the locking read in `StateRepo`.
#[derive(Debug, Clone, FromRow)]
pub struct StateRow {
    pub check_id: String,
    pub customer_id: String,
    pub state_id: i32,
    pub state_name: String,
    pub time_entered: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub failing_count: i32,
    pub response_count: i32,
    pub min_failing_count: i32,
    pub min_failing_time_seconds: i32,
}

impl StateRow {
    /// Convert to the domain state.
    ///
    /// This is the single place where `min_failing_time_seconds` becomes a
    /// duration. A persisted state id outside the live set surfaces as
    /// [`StateError::UnknownState`].
    pub fn into_state(self) -> Result<State, StateError> {
        let id = StateId::from_id(self.state_id)
            .filter(|id| *id != StateId::Invalid)
            .ok_or(StateError::UnknownState(self.state_id))?;

        Ok(State {
            check_id: self.check_id,
            customer_id: self.customer_id,
            id,
            state_name: id.name().to_string(),
            time_entered: self.time_entered,
            last_updated: self.last_updated,
            min_failing_count: self.min_failing_count,
            min_failing_time: Duration::seconds(i64::from(self.min_failing_time_seconds)),
            failing_count: self.failing_count,
            response_count: self.response_count,
            results: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(state_id: i32) -> StateRow {
        StateRow {
            check_id: "check-id".into(),
            customer_id: "customer-id".into(),
            state_id,
            state_name: "OK".into(),
            time_entered: Utc::now(),
            last_updated: Utc::now(),
            failing_count: 0,
            response_count: 0,
            min_failing_count: 2,
            min_failing_time_seconds: 90,
        }
    }

    #[test]
    fn conversion_materializes_dwell_threshold_once() {
        let state = row(StateId::Ok.id()).into_state().unwrap();
        assert_eq!(state.min_failing_time, Duration::seconds(90));
    }

    #[test]
    fn conversion_rejects_unknown_state_id() {
        let err = row(42).into_state().unwrap_err();
        assert!(matches!(err, StateError::UnknownState(42)));
    }

    #[test]
    fn conversion_rejects_invalid_sentinel() {
        let err = row(0).into_state().unwrap_err();
        assert!(matches!(err, StateError::UnknownState(0)));
    }
}
