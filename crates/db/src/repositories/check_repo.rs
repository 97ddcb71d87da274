//! Repository for the `checks` table (read-only here; the check editor
//! service owns writes).

use sqlx::PgConnection;

use crate::models::Check;

/// Column list for `checks` queries.
const COLUMNS: &str = "id, customer_id, min_failing_count, min_failing_time_seconds";

pub struct CheckRepo;

impl CheckRepo {
    /// Fetch a check definition by customer and id.
    pub async fn find(
        conn: &mut PgConnection,
        customer_id: &str,
        check_id: &str,
    ) -> Result<Option<Check>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM checks WHERE customer_id = $1 AND id = $2");
        sqlx::query_as::<_, Check>(&query)
            .bind(customer_id)
            .bind(check_id)
            .fetch_optional(conn)
            .await
    }
}
