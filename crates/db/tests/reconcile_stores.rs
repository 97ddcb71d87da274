//! Integration tests for the memo and state repositories against a real
//! database, including the cross-bastion aggregation race.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use vigil_core::check::{CheckResponse, Timestamp};
use vigil_core::{CheckResult, HookRegistry, ResultMemo, State, StateId};
use vigil_db::repositories::{MemoRepo, StateRepo, StateStoreError};

const CUSTOMER: &str = "11111111-1111-1111-1111-111111111111";
const CHECK: &str = "check-id";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn seed_check(pool: &PgPool, min_failing_count: i32, min_failing_time_seconds: i32) {
    sqlx::query(
        "INSERT INTO checks (id, customer_id, name, min_failing_count, min_failing_time_seconds) \
         VALUES ($1, $2, 'api check', $3, $4)",
    )
    .bind(CHECK)
    .bind(CUSTOMER)
    .bind(min_failing_count)
    .bind(min_failing_time_seconds)
    .execute(pool)
    .await
    .expect("seeding checks should succeed");
}

/// Whole-second timestamp so values survive the round trip through the
/// database's microsecond precision unchanged.
fn observed_at() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn memo(bastion_id: &str, failing: i32, responses: i32) -> ResultMemo {
    ResultMemo {
        check_id: CHECK.into(),
        customer_id: CUSTOMER.into(),
        bastion_id: bastion_id.into(),
        failing_count: failing,
        response_count: responses,
        last_updated: observed_at(),
    }
}

fn result_from(bastion_id: &str, failing: i32, total: i32) -> CheckResult {
    CheckResult {
        check_id: CHECK.into(),
        customer_id: CUSTOMER.into(),
        bastion_id: bastion_id.into(),
        timestamp: Some(Timestamp::from_utc(Utc::now())),
        responses: (0..total)
            .map(|i| CheckResponse {
                passing: i >= failing,
                ..Default::default()
            })
            .collect(),
        version: 2,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// MemoRepo
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn memo_upsert_and_point_lookup(pool: PgPool) {
    seed_check(&pool, 2, 90).await;
    let mut conn = pool.acquire().await.unwrap();

    assert!(MemoRepo::get(&mut conn, CHECK, "b1").await.unwrap().is_none());

    let first = memo("b1", 1, 2);
    MemoRepo::put(&mut conn, &first).await.unwrap();

    let fetched = MemoRepo::get(&mut conn, CHECK, "b1").await.unwrap().unwrap();
    assert_eq!(fetched, first);

    // Upsert replaces the counters in place.
    let second = memo("b1", 2, 3);
    MemoRepo::put(&mut conn, &second).await.unwrap();

    let fetched = MemoRepo::get(&mut conn, CHECK, "b1").await.unwrap().unwrap();
    assert_eq!(fetched.failing_count, 2);
    assert_eq!(fetched.response_count, 3);
}

#[sqlx::test]
async fn memo_totals_sum_across_bastions(pool: PgPool) {
    seed_check(&pool, 2, 90).await;
    let mut conn = pool.acquire().await.unwrap();

    MemoRepo::put(&mut conn, &memo("b1", 2, 2)).await.unwrap();
    MemoRepo::put(&mut conn, &memo("b2", 1, 3)).await.unwrap();

    let (failing, responses) = MemoRepo::totals(&mut conn, CHECK, CUSTOMER).await.unwrap();
    assert_eq!(failing, 3);
    assert_eq!(responses, 5);

    let memos = MemoRepo::list_for_check(&mut conn, CHECK).await.unwrap();
    assert_eq!(memos.len(), 2);
}

#[sqlx::test]
async fn memo_totals_are_zero_without_rows(pool: PgPool) {
    seed_check(&pool, 2, 90).await;
    let mut conn = pool.acquire().await.unwrap();

    let (failing, responses) = MemoRepo::totals(&mut conn, CHECK, CUSTOMER).await.unwrap();
    assert_eq!((failing, responses), (0, 0));
}

// ---------------------------------------------------------------------------
// StateRepo
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn get_and_lock_seeds_ok_state_from_check(pool: PgPool) {
    seed_check(&pool, 3, 120).await;
    let mut tx = pool.begin().await.unwrap();

    let state = StateRepo::get_and_lock(&mut tx, CUSTOMER, CHECK).await.unwrap();

    assert_eq!(state.id, StateId::Ok);
    assert_eq!(state.state_name, "OK");
    assert_eq!(state.min_failing_count, 3);
    assert_eq!(state.min_failing_time, Duration::seconds(120));
    assert_eq!(state.failing_count, 0);
    assert_eq!(state.response_count, 0);
}

#[sqlx::test]
async fn get_and_lock_unknown_check_is_an_error(pool: PgPool) {
    let mut tx = pool.begin().await.unwrap();

    let err = StateRepo::get_and_lock(&mut tx, CUSTOMER, "nope").await.unwrap_err();
    assert!(matches!(err, StateStoreError::CheckNotFound { .. }));
}

#[sqlx::test]
async fn state_put_and_read_back(pool: PgPool) {
    seed_check(&pool, 2, 90).await;

    let mut tx = pool.begin().await.unwrap();
    let mut state = StateRepo::get_and_lock(&mut tx, CUSTOMER, CHECK).await.unwrap();
    state.failing_count = 2;
    state.response_count = 2;
    StateRepo::put(&mut tx, &state).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let fetched = StateRepo::get_and_lock(&mut tx, CUSTOMER, CHECK).await.unwrap();
    assert_eq!(fetched.id, StateId::Ok);
    assert_eq!(fetched.failing_count, 2);
    assert_eq!(fetched.min_failing_time, Duration::seconds(90));
}

#[sqlx::test]
async fn update_from_memos_hydrates_counters_and_map(pool: PgPool) {
    seed_check(&pool, 2, 90).await;
    let mut tx = pool.begin().await.unwrap();

    MemoRepo::put(&mut tx, &memo("b1", 2, 2)).await.unwrap();
    MemoRepo::put(&mut tx, &memo("b2", 0, 2)).await.unwrap();

    let mut state = StateRepo::get_and_lock(&mut tx, CUSTOMER, CHECK).await.unwrap();
    StateRepo::update_from_memos(&mut tx, &mut state).await.unwrap();

    assert_eq!(state.failing_count, 2);
    assert_eq!(state.response_count, 4);
    assert_eq!(state.results.len(), 2);
    assert_eq!(state.results["b1"].failing_count, 2);
}

// ---------------------------------------------------------------------------
// Cross-bastion aggregation under concurrency
// ---------------------------------------------------------------------------

/// Two workers race full reconciliation transactions for distinct bastions
/// of the same check. Whichever takes the row lock first, the committed
/// state must show the sum of both contributions.
#[sqlx::test]
async fn concurrent_bastions_aggregate_to_the_sum(
    pool_opts: PgPoolOptions,
    conn_opts: PgConnectOptions,
) {
    let pool = pool_opts.max_connections(5).connect_with(conn_opts).await.unwrap();
    seed_check(&pool, 4, 90).await;

    // The state row must exist before the race so get_and_lock has a row
    // to lock; a cold start would leave both workers unserialized.
    let mut conn = pool.acquire().await.unwrap();
    let initial = State::initial(CHECK, CUSTOMER, 4, Duration::seconds(90));
    StateRepo::put(&mut conn, &initial).await.unwrap();
    drop(conn);

    let worker = |bastion: &'static str| {
        let pool = pool.clone();
        async move {
            let hooks = HookRegistry::new();
            let result = result_from(bastion, 2, 2);

            let mut tx = pool.begin().await.unwrap();
            let mut state = StateRepo::get_and_lock(&mut tx, CUSTOMER, CHECK).await.unwrap();
            MemoRepo::put(&mut tx, &ResultMemo::from_result(&result)).await.unwrap();
            StateRepo::update_from_memos(&mut tx, &mut state).await.unwrap();
            state.transition(&result, &hooks).unwrap();
            StateRepo::put(&mut tx, &state).await.unwrap();
            tx.commit().await.unwrap();
        }
    };

    let (a, b) = tokio::join!(
        tokio::spawn(worker("61f25e94-4f6e-11e5-a99f-4771161a3517")),
        tokio::spawn(worker("61f25e94-4f6e-11e5-a99f-4771161a3518")),
    );
    a.unwrap();
    b.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let state = StateRepo::get_and_lock(&mut tx, CUSTOMER, CHECK).await.unwrap();
    assert_eq!(state.failing_count, 4);
    assert_eq!(state.response_count, 4);
}
