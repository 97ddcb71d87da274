//! Alert publication to the notification queue.
//!
//! Transition hooks run while the reconciler holds its transaction, so
//! they must not touch the network. [`AlertSender::send`] is a
//! non-blocking channel push; [`AlertPublisher::run`] drains the channel
//! in a background task, base64-encodes the binary result and publishes it
//! to SQS with bounded retry. Downstream consumers tolerate duplicates —
//! redelivered messages re-fire hooks by design.

use std::time::Duration;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::Client;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use prost::Message;
use tokio::sync::mpsc;
use vigil_core::CheckResult;

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

// ---------------------------------------------------------------------------
// AlertSender
// ---------------------------------------------------------------------------

/// Hook-side handle: enqueue a result for publication without blocking.
#[derive(Clone)]
pub struct AlertSender {
    tx: mpsc::UnboundedSender<CheckResult>,
}

impl AlertSender {
    pub fn new(tx: mpsc::UnboundedSender<CheckResult>) -> Self {
        Self { tx }
    }

    pub fn send(&self, result: &CheckResult) {
        if self.tx.send(result.clone()).is_err() {
            tracing::warn!(
                check_id = %result.check_id,
                "Alert publisher is gone, dropping notification"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// AlertPublisher
// ---------------------------------------------------------------------------

/// Background task that owns the SQS client and the actual publishes.
pub struct AlertPublisher {
    client: Client,
    queue_url: String,
    rx: mpsc::UnboundedReceiver<CheckResult>,
}

impl AlertPublisher {
    pub fn new(client: Client, queue_url: String) -> (AlertSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            AlertSender::new(tx),
            Self {
                client,
                queue_url,
                rx,
            },
        )
    }

    /// Build the SQS client from the ambient AWS environment.
    pub async fn connect(region: Option<String>, queue_url: String) -> (AlertSender, Self) {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = loader.load().await;
        Self::new(Client::new(&config), queue_url)
    }

    /// Drain the channel until every [`AlertSender`] is dropped.
    pub async fn run(mut self) {
        while let Some(result) = self.rx.recv().await {
            self.publish(&result).await;
        }
        tracing::info!("Alert publisher stopped");
    }

    /// Publish one result, retrying with backoff before giving up.
    async fn publish(&self, result: &CheckResult) {
        let body = STANDARD.encode(result.encode_to_vec());
        tracing::debug!(
            customer_id = %result.customer_id,
            check_id = %result.check_id,
            body_len = body.len(),
            "Publishing transition notification"
        );

        for delay_secs in RETRY_DELAYS_SECS {
            match self.try_send(&body).await {
                Ok(()) => return,
                Err(error) => {
                    tracing::warn!(
                        check_id = %result.check_id,
                        error = %error,
                        "Notification publish failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                }
            }
        }

        // Final attempt after the last backoff.
        if let Err(error) = self.try_send(&body).await {
            tracing::error!(
                customer_id = %result.customer_id,
                check_id = %result.check_id,
                error = %error,
                "Giving up on transition notification"
            );
        }
    }

    async fn try_send(&self, body: &str) -> Result<(), String> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| error.to_string())
    }
}
