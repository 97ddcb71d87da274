//! DynamoDB-backed [`ResultStore`].

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use vigil_core::{normalize_response, CheckResult};

use crate::codec::{
    self, Item, CHECK_ID_INDEX, CHECK_RESPONSE_TABLE, CHECK_RESULT_TABLE,
};
use crate::store::{ResultStore, ResultStoreError};

/// Result store over the `check_results` / `check_responses` tables.
pub struct DynamoResultStore {
    client: Client,
}

impl DynamoResultStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient AWS environment, with optional
    /// region and endpoint overrides (the endpoint override points local
    /// stacks at a DynamoDB emulator).
    pub async fn from_env(region: Option<String>, endpoint: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        Self::new(Client::new(&config))
    }

    async fn put_item(&self, table: &'static str, item: Item) -> Result<(), ResultStoreError> {
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|err| ResultStoreError::Request(err.to_string()))?;
        Ok(())
    }

    async fn get_item(&self, table: &'static str, key: &str, id: &str) -> Result<Item, ResultStoreError> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .key(key, AttributeValue::S(id.to_string()))
            .send()
            .await
            .map_err(|err| ResultStoreError::Request(err.to_string()))?;
        output.item.ok_or(ResultStoreError::MalformedRow("item"))
    }
}

#[async_trait]
impl ResultStore for DynamoResultStore {
    async fn put_result(&self, result: &CheckResult) -> Result<(), ResultStoreError> {
        let mut result = result.clone();
        for response in &mut result.responses {
            normalize_response(response, result.version)?;
        }

        let mut response_ids = Vec::with_capacity(result.responses.len());
        for response in &result.responses {
            let (id, item) = codec::encode_response_row(&result, response);
            tracing::debug!(response_id = %id, "Putting check response");
            self.put_item(CHECK_RESPONSE_TABLE, item).await?;
            response_ids.push(id);
        }

        let item = codec::encode_result_row(&result, &response_ids);
        tracing::debug!(
            result_id = %codec::result_id(&result),
            responses = response_ids.len(),
            "Putting check result"
        );
        self.put_item(CHECK_RESULT_TABLE, item).await
    }

    async fn get_results_by_check_id(
        &self,
        check_id: &str,
    ) -> Result<Vec<CheckResult>, ResultStoreError> {
        // The index projects (check_id, result_id) tuples; each result and
        // each of its responses is then fetched by its own key.
        let query = self
            .client
            .query()
            .table_name(CHECK_RESULT_TABLE)
            .index_name(CHECK_ID_INDEX)
            .key_condition_expression("check_id = :check_id")
            .expression_attribute_values(":check_id", AttributeValue::S(check_id.to_string()))
            .send()
            .await
            .map_err(|err| ResultStoreError::Request(err.to_string()))?;

        let mut results = Vec::new();
        for projection in query.items() {
            let result_id = codec::index_result_id(projection)?;
            let row = self.get_item(CHECK_RESULT_TABLE, "result_id", result_id).await?;
            let (mut result, response_ids) = codec::decode_result_row(&row)?;

            let mut responses = Vec::with_capacity(response_ids.len());
            for response_id in &response_ids {
                let row = self
                    .get_item(CHECK_RESPONSE_TABLE, "response_id", response_id)
                    .await?;
                responses.push(codec::decode_response_row(&row)?);
            }

            result.responses = responses;
            results.push(result);
        }

        Ok(results)
    }
}
