//! Row structs for the reconciler's three tables.
//!
//! Each submodule holds a `FromRow` struct matching the database row and
//! its conversion to the `vigil_core` domain type. Keeping the sqlx
//! surface here leaves `vigil_core` free of database concerns.

pub mod check;
pub mod memo_row;
pub mod state_row;

pub use check::Check;
pub use memo_row::MemoRow;
pub use state_row::StateRow;
