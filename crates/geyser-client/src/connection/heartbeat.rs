//! Liveness heartbeat
//!
//! Every `interval` the session sends a ping; the first unanswered ping
//! arms a deadline of `timeout` that any inbound message clears. Pings keep
//! their fixed period while a deadline is pending. Silence ends the session
//! with [`ClientError::HeartbeatTimeout`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::manager::ClientInner;
use super::session::Session;
use crate::error::ClientError;

pub(crate) fn spawn(inner: Arc<ClientInner>, session: Arc<Session>) -> JoinHandle<()> {
    let interval = inner.config.heartbeat.interval();
    let timeout = inner.config.heartbeat.timeout();

    debug!(
        session_id = session.id,
        interval_ms = inner.config.heartbeat.interval_ms,
        timeout_ms = inner.config.heartbeat.timeout_ms,
        "Heartbeat started"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inbound = session.inbound_activity();

        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = session.cancel.cancelled() => return,
                changed = inbound.changed(), if deadline.is_some() => {
                    if changed.is_err() {
                        return;
                    }
                    deadline = None;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    warn!(session_id = session.id, "No inbound message after ping");
                    inner.destroy_session(&session, ClientError::HeartbeatTimeout);
                    return;
                }
                _ = ticker.tick() => {
                    // Anything that arrives from here on satisfies this round
                    inbound.borrow_and_update();

                    if let Err(error) = inner.ping(&session).await {
                        if !matches!(error, ClientError::Aborted) {
                            inner.destroy_session(&session, error);
                        }
                        return;
                    }
                    deadline.get_or_insert_with(|| Instant::now() + timeout);
                }
            }
        }
    })
}
