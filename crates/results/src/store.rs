//! The result-store contract.

use async_trait::async_trait;
use vigil_core::{CheckResult, NormalizeError};

/// Errors from result persistence.
///
/// `Request` is transient (the caller requeues the message);
/// `Normalize`, `Decode` and `MalformedRow` indicate bad data.
#[derive(Debug, thiserror::Error)]
pub enum ResultStoreError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("stored payload did not decode: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("malformed row: missing or mistyped attribute {0}")]
    MalformedRow(&'static str),

    #[error("store request failed: {0}")]
    Request(String),
}

/// Append-style persistence of full results and responses.
///
/// Writes are at-least-once: there is no transaction across the result and
/// response tables, and redelivered messages rewrite the same rows. That is
/// safe because every key is deterministic and writes are upserts.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist a result and all of its responses.
    ///
    /// Responses are normalized (legacy reply envelopes decoded, legacy
    /// host target ids back-filled) before anything is serialized. Any
    /// failed write surfaces as an error so the whole message is
    /// re-driven; partially written responses are harmless.
    async fn put_result(&self, result: &CheckResult) -> Result<(), ResultStoreError>;

    /// Fetch every stored result for a check, with responses attached in
    /// their original order.
    async fn get_results_by_check_id(
        &self,
        check_id: &str,
    ) -> Result<Vec<CheckResult>, ResultStoreError>;
}
