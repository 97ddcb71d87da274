//! Query layer over the reconciler's tables.
//!
//! All methods execute on a caller-supplied `&mut PgConnection` so the
//! reconciler can run its whole skeleton inside one transaction.

pub mod check_repo;
pub mod memo_repo;
pub mod state_repo;

pub use check_repo::CheckRepo;
pub use memo_repo::MemoRepo;
pub use state_repo::{StateRepo, StateStoreError};
