// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The per-connection streaming loop.
//!
//! One task runs this loop for the lifetime of the channel:
//! 1. Open the feed at the saved cursor, racing the inactivity timer
//! 2. Decode records incrementally as body chunks arrive
//! 3. Classify each record (reserved discard → cursor advance → dispatch)
//! 4. On stream end, timeout, or reset: reconnect immediately from the
//!    cursor — no backoff, no retry cap
//!
//! Reconnection is infinite and immediate. Deployments that need
//! back-pressure against a flapping source should front the channel with
//! their own supervision.
//!
//! # Timer/response race
//!
//! Each attempt gets a fresh generation number from a shared monotonic
//! counter. A timer only acts (aborts, logs, counts) if the counter
//! still matches its generation, so a stale timer can never cancel a
//! connection that already succeeded. `stop()` bumps the counter for the
//! same reason.

use crate::cursor::ReplicationCursor;
use crate::decoder::FeedDecoder;
use crate::dispatch::WriteDispatcher;
use crate::engine::state::ConnectionState;
use crate::feed::{ChangeFeed, FeedHandle};
use crate::metrics;
use crate::observer::{Notification, NotificationHub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Everything the streaming task needs, handed over by the engine at
/// start.
pub(crate) struct StreamContext<F: ChangeFeed> {
    pub feed: Arc<F>,
    pub dispatcher: WriteDispatcher,
    pub hub: Arc<NotificationHub>,
    pub cursor: ReplicationCursor,
    pub timeout: Duration,
    pub generation: Arc<AtomicU64>,
    pub state_tx: watch::Sender<ConnectionState>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Why one connection's streaming phase ended.
enum StreamEnd {
    /// Graceful close or swallowed reset: reconnect silently.
    Ended,
    /// No bytes within the inactivity window: abort happened, reconnect.
    Inactive,
    /// `stop()` was called.
    Shutdown,
}

/// Run the connect/stream/reconnect loop until shutdown.
pub(crate) async fn run_stream<F: ChangeFeed>(ctx: StreamContext<F>) {
    let StreamContext {
        feed,
        dispatcher,
        hub,
        mut cursor,
        timeout,
        generation,
        state_tx,
        mut shutdown_rx,
    } = ctx;

    let span = info_span!("replication_stream");
    async move {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            set_state(&state_tx, ConnectionState::ConnectingSource);
            let attempt = generation.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(attempt, since = %cursor.seq(), "opening source feed");

            let open = feed.open(cursor.seq().clone());
            tokio::pin!(open);
            let connect_deadline = tokio::time::sleep(timeout);
            tokio::pin!(connect_deadline);

            let mut handle = tokio::select! {
                biased;

                _ = shutdown_signalled(&mut shutdown_rx) => break,

                result = &mut open => match result {
                    Ok(handle) => {
                        metrics::record_connect_attempt(true);
                        handle
                    }
                    Err(e) => {
                        metrics::record_connect_attempt(false);
                        warn!(attempt, error = %e, "source connection failed");
                        hub.emit(Notification::Error(e.to_string()));
                        set_state(&state_tx, ConnectionState::Reconnecting);
                        metrics::record_reconnect("connect_failed");
                        continue;
                    }
                },

                // The timer races the open. Dropping the open future
                // cancels the in-flight request; the generation check
                // keeps a timer that lost the race from counting a
                // timeout against a newer attempt.
                _ = &mut connect_deadline => {
                    if generation.load(Ordering::SeqCst) == attempt {
                        metrics::record_timeout();
                        warn!(attempt, timeout = ?timeout, "no response within timeout, retrying");
                    }
                    set_state(&state_tx, ConnectionState::Reconnecting);
                    metrics::record_reconnect("connect_timeout");
                    continue;
                }
            };

            info!(attempt, since = %cursor.seq(), "streaming from source feed");
            set_state(&state_tx, ConnectionState::Streaming);
            hub.emit(Notification::Start);

            let end = stream_events(
                &mut handle,
                &dispatcher,
                &mut cursor,
                timeout,
                attempt,
                &generation,
                &mut shutdown_rx,
            )
            .await;

            match end {
                StreamEnd::Shutdown => break,
                StreamEnd::Ended => {
                    // Resets are swallowed upstream; both a clean close
                    // and a dropped connection land here and reconnect
                    // silently from the saved cursor.
                    debug!(attempt, cursor = %cursor.seq(), "stream ended, reconnecting");
                    set_state(&state_tx, ConnectionState::Reconnecting);
                    metrics::record_reconnect("stream_end");
                }
                StreamEnd::Inactive => {
                    set_state(&state_tx, ConnectionState::Reconnecting);
                    metrics::record_reconnect("inactivity");
                }
            }
        }

        // Cooperative shutdown: wait for dispatched writes, then stop.
        // Nothing already handed to the writer is rolled back.
        dispatcher.drain().await;
        set_state(&state_tx, ConnectionState::Stopped);
        info!("replication channel stopped");
    }
    .instrument(span)
    .await
}

/// Stream one connection's records until it ends, goes quiet, or the
/// channel shuts down. A fresh decoder is created per call: the decoder
/// is not restartable across attempts, the cursor carries continuity.
async fn stream_events(
    handle: &mut FeedHandle,
    dispatcher: &WriteDispatcher,
    cursor: &mut ReplicationCursor,
    timeout: Duration,
    attempt: u64,
    generation: &AtomicU64,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> StreamEnd {
    let mut decoder = FeedDecoder::new();
    let mut deadline = Instant::now() + timeout;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_signalled(shutdown_rx) => {
                handle.abort();
                return StreamEnd::Shutdown;
            }

            _ = tokio::time::sleep_until(deadline) => {
                // Stale-generation timers take no action; only the
                // current attempt may abort its own connection.
                if generation.load(Ordering::SeqCst) == attempt {
                    handle.abort();
                    metrics::record_timeout();
                    warn!(attempt, timeout = ?timeout, "feed inactive, aborting and reconnecting");
                    return StreamEnd::Inactive;
                }
                return StreamEnd::Ended;
            }

            chunk = handle.next_chunk() => {
                let Some(bytes) = chunk else {
                    return StreamEnd::Ended;
                };

                // Any bytes count as liveness, keepalive newlines
                // included: the window distinguishes "no changes" from
                // "connection dead".
                deadline = Instant::now() + timeout;
                decoder.push(&bytes);

                while let Some(decoded) = decoder.next_event() {
                    let event = match decoded {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "malformed feed line skipped");
                            metrics::record_malformed_line();
                            continue;
                        }
                    };

                    metrics::record_events_decoded(1);

                    // Classification order: reserved ids are discarded
                    // before the cursor moves — no dispatch, no
                    // notification.
                    if event.is_reserved() {
                        trace!(id = %event.id, "reserved document discarded");
                        metrics::record_reserved_discarded();
                        continue;
                    }

                    // The cursor advances on dispatch, not on write
                    // completion: at-least-once on crash/reconnect.
                    cursor.advance(event.seq.clone());
                    dispatcher.dispatch(event).await;
                }
            }
        }
    }
}

/// Resolve once shutdown is requested (or the sender is gone).
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn set_state(state_tx: &watch::Sender<ConnectionState>, state: ConnectionState) {
    metrics::record_state(&state.to_string());
    let _ = state_tx.send(state);
}
