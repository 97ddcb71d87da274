//! `check_state_memos` rows.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use vigil_core::ResultMemo;

/// A row from `check_state_memos`, keyed by `(check_id, bastion_id)`.
#[derive(Debug, Clone, FromRow)]
pub struct MemoRow {
    pub check_id: String,
    pub customer_id: String,
    pub bastion_id: String,
    pub failing_count: i32,
    pub response_count: i32,
    pub last_updated: DateTime<Utc>,
}

impl From<MemoRow> for ResultMemo {
    fn from(row: MemoRow) -> Self {
        ResultMemo {
            check_id: row.check_id,
            customer_id: row.customer_id,
            bastion_id: row.bastion_id,
            failing_count: row.failing_count,
            response_count: row.response_count,
            last_updated: row.last_updated,
        }
    }
}
