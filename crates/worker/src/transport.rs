//! Bundled SQS transport for the results queue.
//!
//! Production fleets that deliver observations over a different queue
//! implement [`QueueSource`](crate::consumer::QueueSource) in their own
//! adapter crate; this one covers deployments already on SQS and keeps the
//! binary runnable end-to-end. Message bodies follow the same convention
//! as the notification sink: base64 of the binary-encoded result.
//!
//! Requeue is deliberately a no-op — an unacknowledged SQS message
//! reappears after its visibility timeout, which is the transport's
//! redelivery-with-backoff.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::consumer::{Ack, InboundMessage, QueueSource};

/// Delay before retrying a failed receive call.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Long-poll wait per receive call.
const WAIT_TIME_SECONDS: i32 = 10;

pub struct SqsSource {
    client: Client,
    queue_url: String,
    buffer: VecDeque<Message>,
}

impl SqsSource {
    pub fn new(client: Client, queue_url: String) -> Self {
        Self {
            client,
            queue_url,
            buffer: VecDeque::new(),
        }
    }

    /// Build a client from the ambient AWS environment with an optional
    /// region override.
    pub async fn connect(region: Option<String>, queue_url: String) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = loader.load().await;
        Self::new(Client::new(&config), queue_url)
    }
}

#[async_trait]
impl QueueSource for SqsSource {
    async fn next(&mut self) -> Option<InboundMessage> {
        loop {
            if let Some(message) = self.buffer.pop_front() {
                let Some(body) = message.body else { continue };
                // A body that is not valid base64 is passed through raw and
                // left to the protobuf decode to reject.
                let bytes = STANDARD
                    .decode(body.as_bytes())
                    .unwrap_or_else(|_| body.into_bytes());

                let ack = Box::new(SqsAck {
                    client: self.client.clone(),
                    queue_url: self.queue_url.clone(),
                    receipt_handle: message.receipt_handle,
                });
                return Some(InboundMessage { body: bytes, ack });
            }

            let received = self
                .client
                .receive_message()
                .queue_url(&self.queue_url)
                .max_number_of_messages(10)
                .wait_time_seconds(WAIT_TIME_SECONDS)
                .send()
                .await;

            match received {
                Ok(output) => {
                    self.buffer.extend(output.messages.unwrap_or_default());
                }
                Err(error) => {
                    tracing::error!(error = %error, "Receive from results queue failed");
                    tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                }
            }
        }
    }
}

struct SqsAck {
    client: Client,
    queue_url: String,
    receipt_handle: Option<String>,
}

#[async_trait]
impl Ack for SqsAck {
    async fn finish(self: Box<Self>) {
        let Some(receipt_handle) = self.receipt_handle else {
            return;
        };
        let deleted = self
            .client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await;
        if let Err(error) = deleted {
            // The message will be redelivered and reprocessed; reconciliation
            // is idempotent against replay, so this only costs work.
            tracing::warn!(error = %error, "Failed to acknowledge message");
        }
    }

    async fn requeue(self: Box<Self>) {
        tracing::debug!("Leaving message for visibility-timeout redelivery");
    }
}
