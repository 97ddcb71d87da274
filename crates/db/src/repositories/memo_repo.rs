//! Repository for the `check_state_memos` table.
//!
//! One row per `(check_id, bastion_id)` pair, upserted on every accepted
//! observation. Writes always happen inside the same transaction as the
//! state update, after the state row lock is held.

use sqlx::PgConnection;
use vigil_core::ResultMemo;

use crate::models::MemoRow;

/// Column list for `check_state_memos` queries.
const COLUMNS: &str =
    "check_id, customer_id, bastion_id, failing_count, response_count, last_updated";

pub struct MemoRepo;

impl MemoRepo {
    /// Point lookup by `(check_id, bastion_id)`.
    pub async fn get(
        conn: &mut PgConnection,
        check_id: &str,
        bastion_id: &str,
    ) -> Result<Option<ResultMemo>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM check_state_memos WHERE check_id = $1 AND bastion_id = $2"
        );
        let row = sqlx::query_as::<_, MemoRow>(&query)
            .bind(check_id)
            .bind(bastion_id)
            .fetch_optional(conn)
            .await?;
        Ok(row.map(ResultMemo::from))
    }

    /// Upsert a memo by its `(check_id, bastion_id)` key.
    pub async fn put(conn: &mut PgConnection, memo: &ResultMemo) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO check_state_memos \
                 (check_id, customer_id, bastion_id, failing_count, response_count, last_updated) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (check_id, bastion_id) DO UPDATE \
                 SET failing_count = EXCLUDED.failing_count, \
                     response_count = EXCLUDED.response_count, \
                     last_updated = EXCLUDED.last_updated",
        )
        .bind(&memo.check_id)
        .bind(&memo.customer_id)
        .bind(&memo.bastion_id)
        .bind(memo.failing_count)
        .bind(memo.response_count)
        .bind(memo.last_updated)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Aggregate `(Σ failing_count, Σ response_count)` over a check's memos.
    pub async fn totals(
        conn: &mut PgConnection,
        check_id: &str,
        customer_id: &str,
    ) -> Result<(i32, i32), sqlx::Error> {
        let sums: (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(failing_count), 0), COALESCE(SUM(response_count), 0) \
             FROM check_state_memos WHERE check_id = $1 AND customer_id = $2",
        )
        .bind(check_id)
        .bind(customer_id)
        .fetch_one(conn)
        .await?;
        Ok((sums.0 as i32, sums.1 as i32))
    }

    /// All live memos for a check, used to hydrate the in-memory aggregate
    /// under the state row lock.
    pub async fn list_for_check(
        conn: &mut PgConnection,
        check_id: &str,
    ) -> Result<Vec<ResultMemo>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM check_state_memos WHERE check_id = $1");
        let rows = sqlx::query_as::<_, MemoRow>(&query)
            .bind(check_id)
            .fetch_all(conn)
            .await?;
        Ok(rows.into_iter().map(ResultMemo::from).collect())
    }
}
