//! Bounded-concurrency pump from the results queue into the reconciler.
//!
//! The queue driver itself lives behind [`QueueSource`]: production
//! deployments plug in their transport adapter, tests use
//! [`ChannelSource`], and [`crate::transport::SqsSource`] ships as the
//! bundled driver. Delivery is at-least-once — a handler returning an
//! error leaves redelivery to the transport, a handler returning `Ok`
//! acknowledges.
//!
//! On stop, intake halts and the stop signal is propagated into every
//! in-flight handler, so open transactions roll back inside the drain
//! window instead of being abandoned mid-flight.
//!
//! Message bodies that do not decode as a [`CheckResult`] are logged,
//! acknowledged and dropped; redelivering garbage would only loop it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prost::Message;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use vigil_core::CheckResult;

/// Handler count used when the configuration leaves it unset.
pub const DEFAULT_HANDLER_COUNT: usize = 4;

/// How long a stopping consumer waits for in-flight handlers to drain.
const DRAIN_WINDOW: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Transport contract
// ---------------------------------------------------------------------------

/// Per-message settlement. `finish` acknowledges; `requeue` hands the
/// message back to the transport for redelivery with backoff.
#[async_trait]
pub trait Ack: Send {
    async fn finish(self: Box<Self>);
    async fn requeue(self: Box<Self>);
}

/// One delivery from the queue.
pub struct InboundMessage {
    pub body: Vec<u8>,
    pub ack: Box<dyn Ack>,
}

/// A connected subscription yielding deliveries until the transport
/// closes. Implementations own reconnection; `next` returning `None`
/// means the subscription is finished for good.
#[async_trait]
pub trait QueueSource: Send {
    async fn next(&mut self) -> Option<InboundMessage>;
}

/// What the consumer calls for every decoded result.
///
/// `cancel` is the consumer's stop signal: a handler observing it should
/// wind down (rolling back any open transaction) and return an error so
/// the message is redelivered after restart.
#[async_trait]
pub trait ResultHandler: Send + Sync {
    async fn handle(
        &self,
        result: CheckResult,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError>;
}

/// Handler failures only signal "requeue this delivery"; the variants that
/// mean "drop" are handled inside the handler and come back as `Ok`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Subscription parameters handed to the transport adapter.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    /// Shared-queue consumer-group name.
    pub channel: String,
    /// Discovery-service addresses for transports that use one.
    pub lookupd_addresses: Vec<String>,
    /// Maximum concurrent in-flight handlers. 0 means the default.
    pub handler_count: usize,
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Pulls deliveries from a [`QueueSource`] and runs up to
/// `handler_count` handlers concurrently.
pub struct Consumer<S> {
    config: ConsumerConfig,
    source: S,
}

impl<S: QueueSource> Consumer<S> {
    pub fn new(mut config: ConsumerConfig, source: S) -> Self {
        if config.handler_count == 0 {
            tracing::info!(
                default = DEFAULT_HANDLER_COUNT,
                "No handler count configured, using default"
            );
            config.handler_count = DEFAULT_HANDLER_COUNT;
        }
        Self { config, source }
    }

    /// Pump until the source closes or `shutdown` fires, then wait up to a
    /// bounded window for in-flight handlers to drain.
    pub async fn run(mut self, handler: Arc<dyn ResultHandler>, shutdown: CancellationToken) {
        let handler_count = self.config.handler_count;
        let permits = Arc::new(Semaphore::new(handler_count));

        tracing::info!(
            topic = %self.config.topic,
            channel = %self.config.channel,
            handler_count,
            "Consumer started"
        );

        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = self.source.next() => match message {
                    Some(message) => message,
                    None => {
                        tracing::info!("Queue source closed");
                        break;
                    }
                },
            };

            // Blocks intake while saturated; that is the in-flight bound.
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .expect("consumer semaphore is never closed");

            let handler = Arc::clone(&handler);
            let cancel = shutdown.clone();
            tokio::spawn(async move {
                let _permit = permit;
                dispatch(handler, message, cancel).await;
            });
        }

        tracing::info!("Consumer stopping, draining in-flight handlers");
        let drained = tokio::time::timeout(
            DRAIN_WINDOW,
            permits.acquire_many(handler_count as u32),
        )
        .await;
        match drained {
            Ok(_) => tracing::info!("Consumer stopped"),
            Err(_) => tracing::warn!(
                window_secs = DRAIN_WINDOW.as_secs(),
                "Drain window elapsed with handlers still in flight"
            ),
        }
    }
}

async fn dispatch(
    handler: Arc<dyn ResultHandler>,
    message: InboundMessage,
    cancel: CancellationToken,
) {
    let result = match CheckResult::decode(message.body.as_slice()) {
        Ok(result) => result,
        Err(error) => {
            // Malformed bodies are acknowledged: redelivery cannot fix them.
            tracing::error!(error = %error, "Dropping undecodable queue message");
            message.ack.finish().await;
            return;
        }
    };

    match handler.handle(result, cancel).await {
        Ok(()) => message.ack.finish().await,
        Err(error) => {
            tracing::error!(error = %error, "Handler failed, requeueing message");
            message.ack.requeue().await;
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

/// Channel-backed [`QueueSource`]. Requeued messages are pushed straight
/// back onto the channel, so redelivery is immediate.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSource {
    /// Returns the producer handle and the source. The source keeps its
    /// own sender for requeues, so it drains via the consumer's stop
    /// signal rather than by closing the channel.
    pub fn new() -> (mpsc::UnboundedSender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self { rx, tx: tx.clone() };
        (tx, source)
    }
}

#[async_trait]
impl QueueSource for ChannelSource {
    async fn next(&mut self) -> Option<InboundMessage> {
        let body = self.rx.recv().await?;
        let ack = Box::new(ChannelAck {
            body: body.clone(),
            tx: self.tx.clone(),
        });
        Some(InboundMessage { body, ack })
    }
}

struct ChannelAck {
    body: Vec<u8>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl Ack for ChannelAck {
    async fn finish(self: Box<Self>) {}

    async fn requeue(self: Box<Self>) {
        // Send fails only when the source is gone; nothing left to requeue to.
        let _ = self.tx.send(self.body);
    }
}
