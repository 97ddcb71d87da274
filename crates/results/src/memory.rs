//! In-memory [`ResultStore`] over the same row codec as the DynamoDB
//! store. Used by worker integration tests and local runs without AWS.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use tokio::sync::Mutex;
use vigil_core::{normalize_response, CheckResult};

use crate::codec::{self, Item};
use crate::store::{ResultStore, ResultStoreError};

#[derive(Default)]
struct Tables {
    results: HashMap<String, Item>,
    responses: HashMap<String, Item>,
}

/// Two attribute-map tables behind a lock. Rows are byte-identical to what
/// the DynamoDB store writes, so reads exercise the full decode path.
#[derive(Default)]
pub struct MemoryResultStore {
    tables: Mutex<Tables>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored result rows, for test assertions.
    pub async fn result_count(&self) -> usize {
        self.tables.lock().await.results.len()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put_result(&self, result: &CheckResult) -> Result<(), ResultStoreError> {
        let mut result = result.clone();
        for response in &mut result.responses {
            normalize_response(response, result.version)?;
        }

        let mut tables = self.tables.lock().await;

        let mut response_ids = Vec::with_capacity(result.responses.len());
        for response in &result.responses {
            let (id, item) = codec::encode_response_row(&result, response);
            tables.responses.insert(id.clone(), item);
            response_ids.push(id);
        }

        let item = codec::encode_result_row(&result, &response_ids);
        tables.results.insert(codec::result_id(&result), item);
        Ok(())
    }

    async fn get_results_by_check_id(
        &self,
        check_id: &str,
    ) -> Result<Vec<CheckResult>, ResultStoreError> {
        let tables = self.tables.lock().await;

        let mut results = Vec::new();
        for row in tables.results.values() {
            if row.get("check_id") != Some(&AttributeValue::S(check_id.to_string())) {
                continue;
            }

            let (mut result, response_ids) = codec::decode_result_row(row)?;
            let mut responses = Vec::with_capacity(response_ids.len());
            for id in &response_ids {
                let row = tables
                    .responses
                    .get(id)
                    .ok_or(ResultStoreError::MalformedRow("response_id"))?;
                responses.push(codec::decode_response_row(row)?);
            }

            result.responses = responses;
            results.push(result);
        }

        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
