//! Repository for the `check_states` table.
//!
//! The locking read is what serializes reconciliation per check: the
//! `FOR UPDATE OF states` lock is held until the caller's transaction
//! ends, so at most one worker advances a given check at a time.

use sqlx::PgConnection;
use vigil_core::{State, StateError};

use crate::models::{Check, StateRow};
use crate::repositories::{CheckRepo, MemoRepo};

/// Errors from the state store. `CheckNotFound` and `State` are fatal for
/// the message being processed; `Db` is transient and worth a redelivery.
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("no check {check_id} for customer {customer_id}")]
    CheckNotFound {
        check_id: String,
        customer_id: String,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub struct StateRepo;

impl StateRepo {
    /// Fetch the check's state row and take a row-level exclusive lock on
    /// it, released only when the surrounding transaction ends.
    ///
    /// A check that has never been reconciled has no state row yet; it is
    /// synthesized as `OK` from the check definition, and the following
    /// [`StateRepo::put`] inserts it (no lock needed — the insert itself
    /// conflicts on the primary key if another worker races the cold
    /// start).
    pub async fn get_and_lock(
        conn: &mut PgConnection,
        customer_id: &str,
        check_id: &str,
    ) -> Result<State, StateStoreError> {
        let row = sqlx::query_as::<_, StateRow>(
            "SELECT states.check_id, states.customer_id, states.state_id, states.state_name, \
                    states.time_entered, states.last_updated, \
                    states.failing_count, states.response_count, \
                    checks.min_failing_count, checks.min_failing_time_seconds \
             FROM check_states AS states \
             JOIN checks ON checks.id = states.check_id \
             WHERE states.customer_id = $1 AND checks.id = $2 \
             FOR UPDATE OF states",
        )
        .bind(customer_id)
        .bind(check_id)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(row.into_state()?),
            None => {
                let check = CheckRepo::find(conn, customer_id, check_id)
                    .await?
                    .ok_or_else(|| StateStoreError::CheckNotFound {
                        check_id: check_id.to_string(),
                        customer_id: customer_id.to_string(),
                    })?;
                Ok(seed_state(&check))
            }
        }
    }

    /// Reload the cached aggregate counters from the memo table and
    /// hydrate the in-memory memo map, all under the state row lock.
    ///
    /// Because every worker upserts its own memo before this read, the
    /// sums seen here include the committed contribution of every other
    /// bastion, which is what makes concurrent observations compose.
    pub async fn update_from_memos(
        conn: &mut PgConnection,
        state: &mut State,
    ) -> Result<(), sqlx::Error> {
        let (failing, responses) =
            MemoRepo::totals(&mut *conn, &state.check_id, &state.customer_id).await?;
        state.failing_count = failing;
        state.response_count = responses;

        state.results.clear();
        for memo in MemoRepo::list_for_check(conn, &state.check_id).await? {
            state.results.insert(memo.bastion_id.clone(), memo);
        }
        Ok(())
    }

    /// Upsert the state row by `check_id`.
    pub async fn put(conn: &mut PgConnection, state: &State) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO check_states \
                 (check_id, customer_id, state_id, state_name, time_entered, last_updated, \
                  failing_count, response_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (check_id) DO UPDATE \
                 SET state_id = EXCLUDED.state_id, \
                     state_name = EXCLUDED.state_name, \
                     time_entered = EXCLUDED.time_entered, \
                     last_updated = EXCLUDED.last_updated, \
                     failing_count = EXCLUDED.failing_count, \
                     response_count = EXCLUDED.response_count",
        )
        .bind(&state.check_id)
        .bind(&state.customer_id)
        .bind(state.id.id())
        .bind(&state.state_name)
        .bind(state.time_entered)
        .bind(state.last_updated)
        .bind(state.failing_count)
        .bind(state.response_count)
        .execute(conn)
        .await?;
        Ok(())
    }
}

fn seed_state(check: &Check) -> State {
    State::initial(
        &check.id,
        &check.customer_id,
        check.min_failing_count,
        chrono::Duration::seconds(i64::from(check.min_failing_time_seconds)),
    )
}
