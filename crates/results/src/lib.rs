//! Result persistence in a partitioned key-value store.
//!
//! The write path normalizes each response, writes one `check_responses`
//! row per response, then writes the `check_results` row that names them.
//! The two tables are not updated atomically; deterministic keys and
//! upsert semantics make redelivered writes converge instead of duplicate.

pub mod codec;
pub mod dynamo;
pub mod memory;
pub mod store;

pub use dynamo::DynamoResultStore;
pub use memory::MemoryResultStore;
pub use store::{ResultStore, ResultStoreError};
