//! Per-message reconciliation.
//!
//! [`Reconciler::execute`] merges one observation into the per-check
//! aggregate under a single SQL transaction, then persists the full result
//! to the key-value store. The commit is the moment of truth: everything
//! before it rolls back together on error, and a failure after it (the
//! result-store write) returns an error so the transport redelivers —
//! duplicate key-value writes and duplicate notifications are accepted.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vigil_core::{CheckResult, HookRegistry, ResultMemo, State, StateError, StateId};
use vigil_db::repositories::{MemoRepo, StateRepo, StateStoreError};
use vigil_db::DbPool;
use vigil_results::{ResultStore, ResultStoreError};

use crate::consumer::{HandlerError, ResultHandler};
#[cfg(feature = "legacy-bastions")]
use crate::directory::BastionDirectory;

/// Errors that abort a reconciliation. All of them roll the transaction
/// back and leave the message to be redelivered.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("reconciliation cancelled by stop signal")]
    Cancelled,

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    ResultStore(#[from] ResultStoreError),
}

/// What became of an accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Folded into the aggregate; the check is now in this state.
    Reconciled(StateId),
    /// Older than the stored memo for its bastion; dropped without effect.
    Stale,
}

pub struct Reconciler {
    db: DbPool,
    results: Arc<dyn ResultStore>,
    hooks: Arc<HookRegistry>,
    #[cfg(feature = "legacy-bastions")]
    directory: Option<BastionDirectory>,
}

impl Reconciler {
    pub fn new(db: DbPool, results: Arc<dyn ResultStore>, hooks: Arc<HookRegistry>) -> Self {
        Self {
            db,
            results,
            hooks,
            #[cfg(feature = "legacy-bastions")]
            directory: None,
        }
    }

    /// Attach the customer→bastion directory used to route `version < 2`
    /// results.
    #[cfg(feature = "legacy-bastions")]
    pub fn with_directory(mut self, directory: BastionDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Merge one observation into its check's state.
    ///
    /// The SQL steps all run on one transaction; the state row lock taken
    /// midway serializes workers racing on the same check. The stop
    /// signal races the pre-commit span, so a cancelled reconciliation
    /// rolls back promptly instead of sitting on its row lock. The result
    /// store write happens only after commit.
    pub async fn execute(
        &self,
        result: &CheckResult,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcileError> {
        let bastion_id = result.bastion_key().to_string();
        tracing::debug!(
            check_id = %result.check_id,
            customer_id = %result.customer_id,
            bastion_id = %bastion_id,
            "Handling check result"
        );

        let mut tx = self.db.begin().await?;

        let reconciled = {
            let work = self.reconcile_in_tx(&mut tx, result, &bastion_id);
            tokio::pin!(work);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                reconciled = &mut work => Some(reconciled),
            }
        };

        let Some(reconciled) = reconciled else {
            tracing::info!(
                check_id = %result.check_id,
                "Stop signal during reconciliation, rolling back"
            );
            tx.rollback().await?;
            return Err(ReconcileError::Cancelled);
        };

        let Some(state) = reconciled? else {
            tx.rollback().await?;
            return Ok(Outcome::Stale);
        };

        tx.commit().await?;

        // Outside the transaction, deliberately: a failure here redelivers
        // the whole message, and the rewrite converges on the same rows.
        self.results.put_result(result).await?;

        Ok(Outcome::Reconciled(state.id))
    }

    /// Everything between transaction open and commit. Returns `None` for
    /// a stale observation; the caller rolls back either way when the
    /// state is not committed.
    async fn reconcile_in_tx(
        &self,
        conn: &mut sqlx::PgConnection,
        result: &CheckResult,
        bastion_id: &str,
    ) -> Result<Option<State>, ReconcileError> {
        let observed_at = result.observed_at();

        let mut memo = MemoRepo::get(&mut *conn, &result.check_id, bastion_id)
            .await?
            .unwrap_or_else(|| ResultMemo::from_result(result));

        // Out-of-order guard: a newer observation from this bastion has
        // already been folded in, so this one must not overwrite it.
        if memo.last_updated > observed_at {
            tracing::debug!(
                check_id = %result.check_id,
                bastion_id = %bastion_id,
                "Skipping older result, memo is newer"
            );
            return Ok(None);
        }

        memo.failing_count = result.failing_count();
        memo.response_count = result.responses.len() as i32;
        memo.last_updated = observed_at;

        // From here until commit no other worker may advance this check.
        let mut state =
            StateRepo::get_and_lock(&mut *conn, &result.customer_id, &result.check_id).await?;

        // Our memo goes in before the aggregate read so the sums include
        // this observation along with every other bastion's committed one.
        MemoRepo::put(&mut *conn, &memo).await?;
        StateRepo::update_from_memos(&mut *conn, &mut state).await?;

        state.transition(result, &self.hooks)?;

        StateRepo::put(&mut *conn, &state).await?;
        Ok(Some(state))
    }
}

#[async_trait]
impl ResultHandler for Reconciler {
    async fn handle(
        &self,
        result: CheckResult,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        #[cfg(feature = "legacy-bastions")]
        let result = {
            let mut result = result;
            if result.version < vigil_core::check::RESULT_VERSION_TYPED {
                if let Some(directory) = &self.directory {
                    match directory.resolve(&result.customer_id).await {
                        Ok(Some(bastion_id)) => result.bastion_id = bastion_id,
                        Ok(None) => {
                            // No route means an un-upgraded customer we can
                            // no longer attribute; drop rather than loop.
                            tracing::warn!(
                                customer_id = %result.customer_id,
                                check_id = %result.check_id,
                                "No bastion route for legacy result, dropping"
                            );
                            return Ok(());
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
            }
            result
        };

        self.execute(&result, &cancel).await?;
        Ok(())
    }
}
