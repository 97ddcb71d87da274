//! Environment configuration for the worker binary.
//!
//! All keys carry the `VIGIL_` prefix; see the table in `main.rs`.

use crate::consumer::ConsumerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{0} must be a positive integer")]
    InvalidInteger(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Results topic name, forwarded to the transport adapter.
    pub topic: String,
    /// Shared-queue consumer-group name.
    pub channel: String,
    /// Discovery-service addresses for transports that use one.
    pub lookupd_addresses: Vec<String>,
    /// Maximum concurrent in-flight handlers; 0 means the consumer default.
    pub max_tasks: usize,
    pub postgres_url: String,
    /// Connection-pool size for the relational store.
    pub db_max_connections: u32,
    /// Queue consumed by the bundled SQS transport.
    pub results_queue_url: Option<String>,
    /// Transition-notification queue; unset disables publishing.
    pub alerts_queue_url: Option<String>,
    pub region: Option<String>,
    /// Legacy customer→bastion directory endpoint.
    #[cfg(feature = "legacy-bastions")]
    pub bastion_directory_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let postgres_url = required("VIGIL_POSTGRES_URL")?;
        let max_tasks = match optional("VIGIL_MAX_TASKS") {
            None => 0,
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidInteger("VIGIL_MAX_TASKS"))?,
        };
        let db_max_connections = match optional("VIGIL_DB_MAX_CONNECTIONS") {
            None => vigil_db::DEFAULT_MAX_CONNECTIONS,
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidInteger("VIGIL_DB_MAX_CONNECTIONS"))?,
        };

        Ok(Self {
            topic: optional("VIGIL_TOPIC").unwrap_or_else(|| "checks.results".into()),
            channel: optional("VIGIL_CHANNEL").unwrap_or_else(|| "result-reconciler".into()),
            lookupd_addresses: optional("VIGIL_LOOKUPD_ADDRESSES")
                .map(|raw| {
                    raw.split(',')
                        .map(|addr| addr.trim().to_string())
                        .filter(|addr| !addr.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            max_tasks,
            postgres_url,
            db_max_connections,
            results_queue_url: optional("VIGIL_RESULTS_QUEUE_URL"),
            alerts_queue_url: optional("VIGIL_ALERTS_QUEUE_URL"),
            region: optional("VIGIL_REGION"),
            #[cfg(feature = "legacy-bastions")]
            bastion_directory_url: optional("VIGIL_BASTION_DIRECTORY_URL"),
        })
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            topic: self.topic.clone(),
            channel: self.channel.clone(),
            lookupd_addresses: self.lookupd_addresses.clone(),
            handler_count: self.max_tasks,
        }
    }
}

/// A set-but-blank variable counts as unset.
fn optional(key: &'static str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}
