//! One stream session

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::send::SendOptions;
use crate::transport::StreamHandle;

/// Ping ids for one session: 1, 2, ... up to `wrap`, then 1 again
#[derive(Debug)]
pub(crate) struct PingCounter {
    current: AtomicU32,
    wrap: u32,
}

impl PingCounter {
    pub(crate) fn new(wrap: u32) -> Self {
        Self {
            current: AtomicU32::new(0),
            wrap,
        }
    }

    pub(crate) fn next(&self) -> u32 {
        let wrap = self.wrap;
        let previous = match self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let id = current + 1;
                Some(if id >= wrap { 0 } else { id })
            }) {
            Ok(previous) | Err(previous) => previous,
        };
        previous + 1
    }
}

/// A single stream and everything bound to its lifetime
///
/// `cancel` fires when the session ends. Requests, the heartbeat and the
/// reader all observe it, so nothing outlives the stream it belongs to.
pub(crate) struct Session {
    pub(crate) id: u64,
    pub(crate) stream: Arc<dyn StreamHandle>,
    pub(crate) cancel: CancellationToken,
    explicit: AtomicBool,
    established: AtomicBool,
    ping_ids: PingCounter,
    last_ping_id: AtomicU32,
    inbound: watch::Sender<u64>,
    first_signal: Mutex<Option<oneshot::Sender<Result<()>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Returns the session and the receiver of its first-signal outcome
    pub(crate) fn new(
        id: u64,
        stream: Arc<dyn StreamHandle>,
        ping_id_wrap: u32,
    ) -> (Arc<Self>, oneshot::Receiver<Result<()>>) {
        let (first_tx, first_rx) = oneshot::channel();
        let session = Arc::new(Self {
            id,
            stream,
            cancel: CancellationToken::new(),
            explicit: AtomicBool::new(false),
            established: AtomicBool::new(false),
            ping_ids: PingCounter::new(ping_id_wrap),
            last_ping_id: AtomicU32::new(0),
            inbound: watch::channel(0).0,
            first_signal: Mutex::new(Some(first_tx)),
            tasks: Mutex::new(Vec::new()),
        });
        (session, first_rx)
    }

    /// Deliver the connect outcome
    ///
    /// Returns true if this call settled it; every later call is a no-op.
    pub(crate) fn settle(&self, outcome: Result<()>) -> bool {
        match self.first_signal.lock().take() {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub(crate) fn record_inbound(&self) {
        self.inbound.send_modify(|count| *count = count.wrapping_add(1));
    }

    /// Counter bumped on every inbound message
    pub(crate) fn inbound_activity(&self) -> watch::Receiver<u64> {
        self.inbound.subscribe()
    }

    pub(crate) fn next_ping_id(&self) -> u32 {
        let id = self.ping_ids.next();
        self.last_ping_id.store(id, Ordering::SeqCst);
        id
    }

    /// Id of the most recent ping, 0 before the first one
    pub(crate) fn last_ping_id(&self) -> u32 {
        self.last_ping_id.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_explicit(&self, explicit: bool) {
        self.explicit.store(explicit, Ordering::SeqCst);
    }

    pub(crate) fn is_explicit(&self) -> bool {
        self.explicit.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_established(&self) {
        self.established.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_established(&self) -> bool {
        self.established.load(Ordering::SeqCst)
    }

    pub(crate) fn send_options(&self, timeout: Duration) -> SendOptions {
        SendOptions {
            timeout,
            cancel: self.cancel.clone(),
        }
    }

    /// Bind a background task to this session
    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        if self.cancel.is_cancelled() {
            handle.abort();
        } else {
            tasks.push(handle);
        }
    }

    /// End the session: abort pending requests and stop bound tasks
    pub(crate) fn shutdown(&self) {
        self.first_signal.lock().take();
        self.cancel.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
