// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine orchestrator.
//!
//! Ties together:
//! - Feed connections via [`crate::feed::ChangeFeed`]
//! - Incremental decoding via [`crate::decoder::FeedDecoder`]
//! - Cursor resumption via [`crate::cursor::ReplicationCursor`]
//! - Target writes via [`crate::target::TargetWriter`]
//! - Lifecycle notifications via [`crate::observer::NotificationHub`]
//!
//! # Startup sequencing
//!
//! `start()` validates configuration, then establishes the target
//! connection; only on success does the source connection loop begin.
//! A configuration error is fatal and reported exactly once, with no
//! connection attempt made. A target connection failure is reported and
//! not auto-retried — only the source side has a reconnect loop.
//!
//! One engine instance drives exactly one source → target stream.
//! Distinct instances share no mutable state.

mod state;
mod stream_loop;

pub use state::ConnectionState;

use crate::config::ChannelConfig;
use crate::cursor::{ReplicationCursor, Seq};
use crate::dispatch::WriteDispatcher;
use crate::error::{ChannelError, Result};
use crate::feed::ChangeFeed;
use crate::observer::{Notification, NotificationHub};
use crate::target::{AckLevel, TargetConnector};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stream_loop::{run_stream, StreamContext};
use tokio::sync::watch;
use tracing::{error, info};

/// A single continuous replication channel from a change-feed source to
/// a document-store target.
pub struct ReplicationEngine<F: ChangeFeed> {
    config: ChannelConfig,
    feed: Arc<F>,
    connector: Arc<dyn TargetConnector>,
    hub: Arc<NotificationHub>,
    cursor: ReplicationCursor,
    ack: AckLevel,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    /// Per-attempt generation counter; see the timer/response race notes
    /// in [`stream_loop`].
    generation: Arc<AtomicU64>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl<F: ChangeFeed> ReplicationEngine<F> {
    /// Create an engine. No connections are made until [`start()`](Self::start).
    pub fn new(config: ChannelConfig, feed: Arc<F>, connector: Arc<dyn TargetConnector>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            feed,
            connector,
            hub: Arc::new(NotificationHub::new()),
            cursor: ReplicationCursor::at_origin(),
            ack: AckLevel::default(),
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            generation: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// Resume from a previously saved sequence token instead of the
    /// beginning of the feed. Must be called before `start()`.
    pub fn resume_from(mut self, seq: Seq) -> Self {
        self.cursor = ReplicationCursor::resume_from(seq);
        self
    }

    /// Override the write durability level (default: acknowledged by one
    /// node).
    pub fn with_ack_level(mut self, ack: AckLevel) -> Self {
        self.ack = ack;
        self
    }

    /// Attach a notification subscriber. No replay: only notifications
    /// emitted after this call are delivered.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<Notification> {
        self.hub.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether the engine is currently streaming changes.
    pub fn is_streaming(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    /// Validate configuration, connect the target, and begin streaming.
    ///
    /// Fatal configuration errors and target connection failures are
    /// emitted once as an `error` notification and returned; the source
    /// is never attempted in either case.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != ConnectionState::Idle {
            return Err(ChannelError::InvalidState {
                expected: "Idle".to_string(),
                actual: self.state().to_string(),
            });
        }

        let locator = match self.config.validate() {
            Ok(locator) => locator,
            Err(e) => {
                error!(error = %e, "invalid channel configuration");
                self.hub.emit(Notification::Error(e.to_string()));
                let _ = self.state_tx.send(ConnectionState::Failed);
                return Err(e);
            }
        };

        info!(
            source = %self.config.source,
            database = %locator.database,
            collection = %locator.collection,
            "starting replication channel"
        );

        // Target first. The source is only attempted once the target is
        // known to be reachable.
        let _ = self.state_tx.send(ConnectionState::ConnectingTarget);
        let writer = match self.connector.connect(&locator).await {
            Ok(writer) => writer,
            Err(e) => {
                error!(error = %e, "target connection failed");
                self.hub.emit(Notification::Error(e.to_string()));
                let _ = self.state_tx.send(ConnectionState::Failed);
                return Err(e);
            }
        };

        let dispatcher = WriteDispatcher::new(
            writer,
            Arc::clone(&self.hub),
            self.ack,
            self.config.max_in_flight_writes,
        );

        let ctx = StreamContext {
            feed: Arc::clone(&self.feed),
            dispatcher,
            hub: Arc::clone(&self.hub),
            cursor: self.cursor.clone(),
            timeout: self.config.timeout(),
            generation: Arc::clone(&self.generation),
            state_tx: self.state_tx.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
        };

        self.task = Some(tokio::spawn(run_stream(ctx)));
        Ok(())
    }

    /// Stop the channel.
    ///
    /// Aborts the current connection, prevents any further reconnect
    /// attempts, waits for already-dispatched writes to complete, and
    /// transitions to `Stopped`. Writes already dispatched are not
    /// rolled back.
    pub async fn stop(&mut self) {
        info!("stopping replication channel");
        let _ = self.shutdown_tx.send(true);
        // Invalidate any armed timer so it cannot act after shutdown.
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            let _ = task.await;
        } else if self.state() != ConnectionState::Failed {
            let _ = self.state_tx.send(ConnectionState::Stopped);
        }
    }
}
