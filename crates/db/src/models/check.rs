//! Check definitions, read-only to the reconciler.

use serde::Serialize;
use sqlx::FromRow;

/// A row from the `checks` table. Only the columns the reconciler needs.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Check {
    pub id: String,
    pub customer_id: String,
    /// Aggregate failing responses required before a check is failing.
    pub min_failing_count: i32,
    /// Dwell threshold; materialized as a duration at the state-store read.
    pub min_failing_time_seconds: i32,
}
