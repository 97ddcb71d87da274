//! Legacy customer→bastion directory lookup.
//!
//! Pre-v2 bastions do not report their own id, so the worker resolves it
//! from the routing directory (an etcd v2 keys API) and caches the answer
//! for the life of the process. A customer with no route gets their
//! results dropped — acceptable because every upgraded bastion reports its
//! id inline, and this whole module goes away with the `legacy-bastions`
//! feature once the fleet is upgraded.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;

/// HTTP request timeout for a single directory lookup.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected directory payload for customer {0}")]
    MalformedPayload(String),
}

pub struct BastionDirectory {
    client: reqwest::Client,
    base_url: String,
    cache: Mutex<HashMap<String, String>>,
}

impl BastionDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build directory HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the bastion id for a customer. `Ok(None)` means the
    /// directory has no route — the caller drops the result.
    pub async fn resolve(&self, customer_id: &str) -> Result<Option<String>, DirectoryError> {
        if let Some(hit) = self.cache.lock().await.get(customer_id) {
            return Ok(Some(hit.clone()));
        }

        let url = format!(
            "{}/v2/keys/routes/{}",
            self.base_url.trim_end_matches('/'),
            customer_id
        );
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let payload: serde_json::Value = response.error_for_status()?.json().await?;

        match bastion_from_payload(&payload, customer_id)? {
            Some(bastion_id) => {
                self.cache
                    .lock()
                    .await
                    .insert(customer_id.to_string(), bastion_id.clone());
                Ok(Some(bastion_id))
            }
            None => Ok(None),
        }
    }
}

/// Pull the bastion id out of a directory listing: the last path segment
/// of the first child node's key.
fn bastion_from_payload(
    payload: &serde_json::Value,
    customer_id: &str,
) -> Result<Option<String>, DirectoryError> {
    let Some(nodes) = payload["node"]["nodes"].as_array() else {
        return Ok(None);
    };
    let Some(first) = nodes.first() else {
        return Ok(None);
    };

    let key = first["key"]
        .as_str()
        .ok_or_else(|| DirectoryError::MalformedPayload(customer_id.to_string()))?;
    let bastion_id = key
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| DirectoryError::MalformedPayload(customer_id.to_string()))?;

    Ok(Some(bastion_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bastion_from_first_route_node() {
        let payload = serde_json::json!({
            "node": {
                "key": "/routes/cust-1",
                "nodes": [
                    {"key": "/routes/cust-1/61f25e94-4f6e-11e5-a99f-4771161a3518"},
                    {"key": "/routes/cust-1/61f25e94-4f6e-11e5-a99f-4771161a3517"}
                ]
            }
        });

        let bastion = bastion_from_payload(&payload, "cust-1").unwrap();
        assert_eq!(
            bastion.as_deref(),
            Some("61f25e94-4f6e-11e5-a99f-4771161a3518")
        );
    }

    #[test]
    fn empty_listing_means_no_route() {
        let payload = serde_json::json!({"node": {"key": "/routes/cust-1", "nodes": []}});
        assert_eq!(bastion_from_payload(&payload, "cust-1").unwrap(), None);
    }

    #[test]
    fn missing_nodes_means_no_route() {
        let payload = serde_json::json!({"node": {"key": "/routes/cust-1"}});
        assert_eq!(bastion_from_payload(&payload, "cust-1").unwrap(), None);
    }

    #[test]
    fn non_string_key_is_malformed() {
        let payload = serde_json::json!({"node": {"nodes": [{"key": 7}]}});
        let err = bastion_from_payload(&payload, "cust-1").unwrap_err();
        assert!(matches!(err, DirectoryError::MalformedPayload(_)));
    }
}
