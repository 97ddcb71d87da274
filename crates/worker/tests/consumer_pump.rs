//! Consumer behavior against the in-memory channel transport: decode-drop,
//! redelivery on handler failure, the concurrency bound, and drain-on-stop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prost::Message;
use tokio_util::sync::CancellationToken;
use vigil_core::check::{CheckResponse, Timestamp};
use vigil_core::CheckResult;
use vigil_worker::consumer::{
    ChannelSource, Consumer, ConsumerConfig, HandlerError, ResultHandler,
};

fn config(handler_count: usize) -> ConsumerConfig {
    ConsumerConfig {
        topic: "checks.results".into(),
        channel: "result-reconciler".into(),
        lookupd_addresses: vec![],
        handler_count,
    }
}

fn encoded_result(check_id: &str) -> Vec<u8> {
    CheckResult {
        check_id: check_id.into(),
        customer_id: "cust-1".into(),
        bastion_id: "bastion-1".into(),
        timestamp: Some(Timestamp {
            seconds: 1_700_000_000,
            nanos: 0,
        }),
        responses: vec![CheckResponse::default()],
        version: 2,
        ..Default::default()
    }
    .encode_to_vec()
}

/// Poll until `probe` is true or the deadline passes.
async fn wait_for(probe: impl Fn() -> bool) {
    for _ in 0..200 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CountingHandler {
    handled: AtomicUsize,
}

#[async_trait]
impl ResultHandler for CountingHandler {
    async fn handle(
        &self,
        _result: CheckResult,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails the first `failures` deliveries, then succeeds.
struct FlakyHandler {
    attempts: AtomicUsize,
    failures: usize,
}

#[async_trait]
impl ResultHandler for FlakyHandler {
    async fn handle(
        &self,
        _result: CheckResult,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err("transient store outage".into());
        }
        Ok(())
    }
}

/// Records the highest number of concurrently running handlers.
#[derive(Default)]
struct GaugeHandler {
    current: AtomicUsize,
    peak: AtomicUsize,
    handled: AtomicUsize,
}

#[async_trait]
impl ResultHandler for GaugeHandler {
    async fn handle(
        &self,
        _result: CheckResult,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Parks on the stop signal, then reports it was observed.
#[derive(Default)]
struct CancelAwareHandler {
    started: AtomicUsize,
    cancelled: AtomicUsize,
}

#[async_trait]
impl ResultHandler for CancelAwareHandler {
    async fn handle(
        &self,
        _result: CheckResult,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        Err("stopped mid-reconciliation".into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn undecodable_messages_are_dropped_not_requeued() {
    let (tx, source) = ChannelSource::new();
    let handler = Arc::new(CountingHandler::default());
    let shutdown = CancellationToken::new();

    let pump = tokio::spawn(
        Consumer::new(config(2), source).run(handler.clone(), shutdown.clone()),
    );

    tx.send(vec![0xff, 0xff, 0xff, 0xff]).unwrap();
    tx.send(encoded_result("check-1")).unwrap();

    wait_for(|| handler.handled.load(Ordering::SeqCst) == 1).await;
    // Give a requeue loop a chance to show itself, then confirm it did not.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.handled.load(Ordering::SeqCst), 1);

    shutdown.cancel();
    pump.await.unwrap();
}

#[tokio::test]
async fn failed_handling_is_redelivered_until_it_succeeds() {
    let (tx, source) = ChannelSource::new();
    let handler = Arc::new(FlakyHandler {
        attempts: AtomicUsize::new(0),
        failures: 2,
    });
    let shutdown = CancellationToken::new();

    let pump = tokio::spawn(
        Consumer::new(config(1), source).run(handler.clone(), shutdown.clone()),
    );

    tx.send(encoded_result("check-1")).unwrap();

    wait_for(|| handler.attempts.load(Ordering::SeqCst) == 3).await;

    shutdown.cancel();
    pump.await.unwrap();
}

#[tokio::test]
async fn in_flight_handlers_never_exceed_the_bound() {
    let (tx, source) = ChannelSource::new();
    let handler = Arc::new(GaugeHandler::default());
    let shutdown = CancellationToken::new();

    let pump = tokio::spawn(
        Consumer::new(config(2), source).run(handler.clone(), shutdown.clone()),
    );

    for i in 0..6 {
        tx.send(encoded_result(&format!("check-{i}"))).unwrap();
    }

    wait_for(|| handler.handled.load(Ordering::SeqCst) == 6).await;
    assert!(handler.peak.load(Ordering::SeqCst) <= 2);

    shutdown.cancel();
    pump.await.unwrap();
}

#[tokio::test]
async fn stop_waits_for_in_flight_handlers() {
    let (tx, source) = ChannelSource::new();
    let handler = Arc::new(GaugeHandler::default());
    let shutdown = CancellationToken::new();

    let pump = tokio::spawn(
        Consumer::new(config(2), source).run(handler.clone(), shutdown.clone()),
    );

    tx.send(encoded_result("check-1")).unwrap();
    wait_for(|| handler.current.load(Ordering::SeqCst) == 1).await;

    // Cancel mid-handle; run must drain the handler before returning.
    shutdown.cancel();
    pump.await.unwrap();
    assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_signal_reaches_in_flight_handlers() {
    let (tx, source) = ChannelSource::new();
    let handler = Arc::new(CancelAwareHandler::default());
    let shutdown = CancellationToken::new();

    let pump = tokio::spawn(
        Consumer::new(config(2), source).run(handler.clone(), shutdown.clone()),
    );

    tx.send(encoded_result("check-1")).unwrap();
    wait_for(|| handler.started.load(Ordering::SeqCst) == 1).await;

    shutdown.cancel();
    pump.await.unwrap();
    assert_eq!(handler.cancelled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_handler_count_falls_back_to_the_default() {
    let (tx, source) = ChannelSource::new();
    let handler = Arc::new(CountingHandler::default());
    let shutdown = CancellationToken::new();

    let pump = tokio::spawn(
        Consumer::new(config(0), source).run(handler.clone(), shutdown.clone()),
    );

    tx.send(encoded_result("check-1")).unwrap();
    wait_for(|| handler.handled.load(Ordering::SeqCst) == 1).await;

    shutdown.cancel();
    pump.await.unwrap();
}
