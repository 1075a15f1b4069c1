// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lifecycle notifications.
//!
//! The engine emits discrete, named notifications at each transition:
//! `start` when both outgoing connections are up, `copy`/`delete` per
//! successfully written event, `error` per failure worth reporting.
//! Observers are passive sinks — no logic runs on their behalf, there is
//! no replay for subscribers that attach late, and a slow subscriber
//! exerts no back-pressure on the engine (delivery is unbounded).

use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A lifecycle notification emitted by the engine, in the exact order
/// the engine generates them.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Both the target and source connections have been established.
    /// Re-emitted on every successful source reconnect.
    Start,
    /// A document was upserted; carries the full document body.
    Copy(Value),
    /// A document was deleted; carries the document id.
    Delete(String),
    /// Something failed: a connection attempt, or a single write.
    /// Per-event write failures are reported once and dropped.
    Error(String),
}

impl Notification {
    /// Short name of the notification kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Start => "start",
            Notification::Copy(_) => "copy",
            Notification::Delete(_) => "delete",
            Notification::Error(_) => "error",
        }
    }
}

/// Fan-out point for notifications.
///
/// Subscribers receive every notification emitted after they attach.
/// Closed receivers are pruned on the next emit.
#[derive(Default)]
pub struct NotificationHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Notification>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new subscriber. Notifications emitted before this call
    /// are not replayed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().expect("hub poisoned").push(tx);
        rx
    }

    /// Deliver a notification to every live subscriber.
    pub fn emit(&self, notification: Notification) {
        let mut subscribers = self.subscribers.lock().expect("hub poisoned");
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    /// Number of attached subscribers (dead ones linger until the next emit).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("hub poisoned").len()
    }
}
