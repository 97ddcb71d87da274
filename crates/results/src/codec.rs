//! Row codec for the two result tables.
//!
//! Layout:
//!
//! - `check_results` — partition key `result_id = "<check_id>:<bastion_id>"`
//!   (empty bastion id substitutes the customer id). Attributes carry the
//!   indexed scalars (`check_id`, `customer_id`, `timestamp_millis`, ...),
//!   the envelope serialized without its response list
//!   (`result_protobuf`), and the ordered `responses` id list.
//! - `check_responses` — partition key
//!   `response_id = "<check_id>:<bastion_id>:<target_id>"`, payload in
//!   `response_protobuf`.
//!
//! Two global secondary indexes over `check_results` (`check_id-index`,
//!  `customer_id-index`) yield `(indexed key, result_id)` tuples.
//!
//! Everything here is pure over attribute maps so the DynamoDB store and
//! the in-memory store share one row format.

use std::collections::HashMap;

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;
use prost::Message;
use vigil_core::{CheckResponse, CheckResult};

use crate::store::ResultStoreError;

pub const CHECK_RESULT_TABLE: &str = "check_results";
pub const CHECK_RESPONSE_TABLE: &str = "check_responses";
pub const CHECK_ID_INDEX: &str = "check_id-index";
pub const CUSTOMER_ID_INDEX: &str = "customer_id-index";

pub type Item = HashMap<String, AttributeValue>;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Partition key for a result row.
pub fn result_id(result: &CheckResult) -> String {
    format!("{}:{}", result.check_id, result.bastion_key())
}

/// Partition key for one response row of a result.
pub fn response_id(result: &CheckResult, target_id: &str) -> String {
    format!("{}:{}:{}", result.check_id, result.bastion_key(), target_id)
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Build the `check_results` row. `response_ids` must be in the same order
/// as the result's response list.
pub fn encode_result_row(result: &CheckResult, response_ids: &[String]) -> Item {
    let mut envelope = result.clone();
    envelope.responses.clear();

    let mut item = Item::new();
    item.insert("result_id".into(), AttributeValue::S(result_id(result)));
    item.insert("check_id".into(), AttributeValue::S(result.check_id.clone()));
    item.insert(
        "customer_id".into(),
        AttributeValue::S(result.customer_id.clone()),
    );
    item.insert(
        "bastion_id".into(),
        AttributeValue::S(result.bastion_key().to_string()),
    );
    item.insert(
        "timestamp_millis".into(),
        AttributeValue::N(result.timestamp.unwrap_or_default().millis().to_string()),
    );
    item.insert("passing".into(), AttributeValue::Bool(result.passing));
    item.insert("version".into(), AttributeValue::N(result.version.to_string()));
    item.insert(
        "check_name".into(),
        AttributeValue::S(result.check_name.clone()),
    );
    item.insert(
        "result_protobuf".into(),
        AttributeValue::B(Blob::new(envelope.encode_to_vec())),
    );
    item.insert(
        "responses".into(),
        AttributeValue::L(
            response_ids
                .iter()
                .map(|id| AttributeValue::S(id.clone()))
                .collect(),
        ),
    );
    item
}

/// Build one `check_responses` row. The response must already be
/// normalized; the row stores it verbatim.
pub fn encode_response_row(result: &CheckResult, response: &CheckResponse) -> (String, Item) {
    let target_id = response
        .target
        .as_ref()
        .map(|t| t.id.as_str())
        .unwrap_or_default();
    let id = response_id(result, target_id);

    let mut item = Item::new();
    item.insert("response_id".into(), AttributeValue::S(id.clone()));
    item.insert("check_id".into(), AttributeValue::S(result.check_id.clone()));
    item.insert(
        "response_protobuf".into(),
        AttributeValue::B(Blob::new(response.encode_to_vec())),
    );
    (id, item)
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Parse a `check_results` row back into the result envelope (responses
/// empty) and its ordered response-id list.
pub fn decode_result_row(item: &Item) -> Result<(CheckResult, Vec<String>), ResultStoreError> {
    let envelope = get_blob(item, "result_protobuf")?;
    let result = CheckResult::decode(envelope)?;

    let ids = match item.get("responses") {
        Some(AttributeValue::L(values)) => values
            .iter()
            .map(|v| match v {
                AttributeValue::S(id) => Ok(id.clone()),
                _ => Err(ResultStoreError::MalformedRow("responses")),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(ResultStoreError::MalformedRow("responses")),
    };

    Ok((result, ids))
}

/// Parse a `check_responses` row.
pub fn decode_response_row(item: &Item) -> Result<CheckResponse, ResultStoreError> {
    let payload = get_blob(item, "response_protobuf")?;
    Ok(CheckResponse::decode(payload)?)
}

/// The `result_id` of an index projection row.
pub fn index_result_id(item: &Item) -> Result<&str, ResultStoreError> {
    match item.get("result_id") {
        Some(AttributeValue::S(id)) => Ok(id),
        _ => Err(ResultStoreError::MalformedRow("result_id")),
    }
}

fn get_blob<'a>(item: &'a Item, key: &'static str) -> Result<&'a [u8], ResultStoreError> {
    match item.get(key) {
        Some(AttributeValue::B(blob)) => Ok(blob.as_ref()),
        _ => Err(ResultStoreError::MalformedRow(key)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
