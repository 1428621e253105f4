//! In-memory transport for testing
//!
//! Every [`MockTransport::open`] creates a [`MockStream`] that records the
//! requests written to it and lets the test push inbound messages and
//! lifecycle signals. By default a stream answers every ping with a pong,
//! which is enough for the client to consider it live.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geyser_core::{SubscribeRequest, SubscribeUpdate};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::{OpenedStream, StreamHandle, StreamSignal, StreamTransport, TransportError};

/// Defaults applied to every stream opened by a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Answer pings with a pong carrying the same id
    pub auto_pong: bool,
    /// Answer `cancel()` with `Error(Cancelled)` and `Close`
    pub echo_cancel: bool,
    /// Simulated write latency
    pub write_latency: Duration,
    /// Fail every write that carries no ping
    pub subscription_write_failure: Option<TransportError>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            auto_pong: true,
            echo_cancel: true,
            write_latency: Duration::ZERO,
            subscription_write_failure: None,
        }
    }
}

/// Mock stream factory
pub struct MockTransport {
    auto_pong: AtomicBool,
    echo_cancel: AtomicBool,
    write_latency: Duration,
    subscription_write_failure: Mutex<Option<TransportError>>,
    open_failures: Mutex<VecDeque<TransportError>>,
    streams: Mutex<Vec<Arc<MockStream>>>,
    opened: watch::Sender<usize>,
    attempts: watch::Sender<usize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self {
            auto_pong: AtomicBool::new(config.auto_pong),
            echo_cancel: AtomicBool::new(config.echo_cancel),
            write_latency: config.write_latency,
            subscription_write_failure: Mutex::new(config.subscription_write_failure),
            open_failures: Mutex::new(VecDeque::new()),
            streams: Mutex::new(Vec::new()),
            opened: watch::channel(0).0,
            attempts: watch::channel(0).0,
        }
    }

    /// Make the next `open()` fail with `error`; calls queue up
    pub fn fail_next_open(&self, error: TransportError) {
        self.open_failures.lock().push_back(error);
    }

    /// Auto-pong default for streams opened from now on
    pub fn set_auto_pong(&self, enabled: bool) {
        self.auto_pong.store(enabled, Ordering::SeqCst);
    }

    /// Cancel-echo default for streams opened from now on
    pub fn set_echo_cancel(&self, enabled: bool) {
        self.echo_cancel.store(enabled, Ordering::SeqCst);
    }

    /// Subscription-write failure default for streams opened from now on
    pub fn set_subscription_write_failure(&self, error: Option<TransportError>) {
        *self.subscription_write_failure.lock() = error;
    }

    /// All streams opened so far, oldest first
    pub fn streams(&self) -> Vec<Arc<MockStream>> {
        self.streams.lock().clone()
    }

    pub fn stream(&self, index: usize) -> Option<Arc<MockStream>> {
        self.streams.lock().get(index).cloned()
    }

    pub fn last_stream(&self) -> Option<Arc<MockStream>> {
        self.streams.lock().last().cloned()
    }

    /// Number of successfully opened streams
    pub fn open_count(&self) -> usize {
        *self.opened.borrow()
    }

    /// Number of `open()` calls, failed ones included
    pub fn open_attempts(&self) -> usize {
        *self.attempts.borrow()
    }

    /// Wait until `count` streams have been opened and return the `count`-th
    ///
    /// A `count` of zero waits for the first stream.
    pub async fn wait_for_open(&self, count: usize) -> Arc<MockStream> {
        let count = count.max(1);
        let mut opened = self.opened.subscribe();
        // The sender lives in `self`, so the wait cannot observe a closed channel
        let _ = opened.wait_for(|n| *n >= count).await;
        self.streams.lock()[count - 1].clone()
    }

    /// Wait until `open()` has been called `count` times
    pub async fn wait_for_attempts(&self, count: usize) {
        let mut attempts = self.attempts.subscribe();
        let _ = attempts.wait_for(|n| *n >= count).await;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn open(&self) -> Result<OpenedStream, TransportError> {
        self.attempts.send_modify(|n| *n += 1);

        if let Some(error) = self.open_failures.lock().pop_front() {
            return Err(error);
        }

        let (signal_tx, signals) = mpsc::unbounded_channel();
        let stream = {
            let mut streams = self.streams.lock();
            let stream = Arc::new(MockStream {
                index: streams.len(),
                signal_tx,
                writes: Mutex::new(Vec::new()),
                write_count: watch::channel(0).0,
                auto_pong: AtomicBool::new(self.auto_pong.load(Ordering::SeqCst)),
                echo_cancel: AtomicBool::new(self.echo_cancel.load(Ordering::SeqCst)),
                stall_writes: AtomicBool::new(false),
                write_failure: Mutex::new(None),
                subscription_write_failure: Mutex::new(
                    self.subscription_write_failure.lock().clone(),
                ),
                write_latency: self.write_latency,
                closed: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            });
            streams.push(stream.clone());
            stream
        };
        self.opened.send_modify(|n| *n += 1);

        Ok(OpenedStream {
            handle: stream,
            signals,
        })
    }
}

/// One mock stream
pub struct MockStream {
    index: usize,
    signal_tx: mpsc::UnboundedSender<StreamSignal>,
    writes: Mutex<Vec<SubscribeRequest>>,
    write_count: watch::Sender<usize>,
    auto_pong: AtomicBool,
    echo_cancel: AtomicBool,
    stall_writes: AtomicBool,
    write_failure: Mutex<Option<TransportError>>,
    subscription_write_failure: Mutex<Option<TransportError>>,
    write_latency: Duration,
    closed: AtomicBool,
    cancelled: AtomicBool,
    destroyed: AtomicBool,
}

impl MockStream {
    /// Position in [`MockTransport::streams`]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Deliver an inbound message
    pub fn push(&self, update: SubscribeUpdate) {
        self.signal(StreamSignal::Data(update));
    }

    /// Deliver a stream error
    pub fn push_error(&self, error: TransportError) {
        self.signal(StreamSignal::Error(error));
    }

    /// Peer ends the stream gracefully
    pub fn end(&self) {
        self.signal(StreamSignal::End);
    }

    /// Report `Close`; only the first call has an effect
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.signal_tx.send(StreamSignal::Close);
        }
    }

    pub fn set_auto_pong(&self, enabled: bool) {
        self.auto_pong.store(enabled, Ordering::SeqCst);
    }

    pub fn set_echo_cancel(&self, enabled: bool) {
        self.echo_cancel.store(enabled, Ordering::SeqCst);
    }

    /// Writes never complete while set
    pub fn stall_writes(&self, stall: bool) {
        self.stall_writes.store(stall, Ordering::SeqCst);
    }

    /// Writes fail with `error` until cleared with `None`
    pub fn fail_writes(&self, error: Option<TransportError>) {
        *self.write_failure.lock() = error;
    }

    /// Writes without a ping fail with `error` until cleared with `None`
    pub fn fail_subscription_writes(&self, error: Option<TransportError>) {
        *self.subscription_write_failure.lock() = error;
    }

    /// Every accepted write, in order
    pub fn writes(&self) -> Vec<SubscribeRequest> {
        self.writes.lock().clone()
    }

    /// Accepted writes that carry no ping
    pub fn subscription_writes(&self) -> Vec<SubscribeRequest> {
        self.writes
            .lock()
            .iter()
            .filter(|request| !request.is_ping())
            .cloned()
            .collect()
    }

    /// Ids of the pings written so far
    pub fn ping_ids(&self) -> Vec<u32> {
        self.writes
            .lock()
            .iter()
            .filter_map(|request| request.ping.map(|ping| ping.id))
            .collect()
    }

    pub fn last_subscription_write(&self) -> Option<SubscribeRequest> {
        self.subscription_writes().pop()
    }

    /// Wait until `count` writes were accepted
    pub async fn wait_for_writes(&self, count: usize) {
        let mut writes = self.write_count.subscribe();
        let _ = writes.wait_for(|n| *n >= count).await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn signal(&self, signal: StreamSignal) {
        if !self.is_closed() {
            let _ = self.signal_tx.send(signal);
        }
    }
}

#[async_trait]
impl StreamHandle for MockStream {
    async fn write(&self, request: &SubscribeRequest) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        if !self.write_latency.is_zero() {
            tokio::time::sleep(self.write_latency).await;
        }
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(error) = self.write_failure.lock().clone() {
            return Err(error);
        }
        if !request.is_ping() {
            if let Some(error) = self.subscription_write_failure.lock().clone() {
                return Err(error);
            }
        }

        self.writes.lock().push(request.clone());
        self.write_count.send_modify(|n| *n += 1);

        if let Some(ping) = request.ping {
            if self.auto_pong.load(Ordering::SeqCst) {
                self.push(SubscribeUpdate::pong(ping.id));
            }
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if self.echo_cancel.load(Ordering::SeqCst) {
            self.push_error(TransportError::Cancelled);
            self.close();
        }
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.close();
    }
}
