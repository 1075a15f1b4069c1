//! Connection state types.
//!
//! Defines the state machine for a replication channel's lifecycle.
//!
//! # State Transitions
//!
//! ```text
//!                 start()
//! Idle ─────────────────────→ ConnectingTarget
//!   │                               │
//!   │ (bad config)                  │ (target up)
//!   ↓                               ↓
//! Failed                     ConnectingSource ←───────────┐
//!                                   │                     │
//!                                   │ (feed responded)    │ (transient
//!                                   ↓                     │  failure)
//!                               Streaming ──→ Reconnecting┘
//!                                   │
//!                            stop() │
//!                                   ↓
//!                                Stopped
//! ```
//!
//! `Stopped` and `Failed` are terminal. Every other non-`Idle` state is
//! transient and cycles back to `ConnectingSource` on transient failure.

/// State of a replication channel.
///
/// See module docs for the transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Channel created but not started.
    Idle,

    /// Establishing the target store connection. Happens first; the
    /// source is not attempted until the target is up.
    ConnectingTarget,

    /// Opening the streaming feed request, racing the inactivity timer.
    ConnectingSource,

    /// Receiving and replicating change records.
    Streaming,

    /// A connection attempt or live stream just ended; an immediate
    /// retry with the saved cursor is about to begin.
    Reconnecting,

    /// Fatal configuration error or target connection failure.
    /// Terminal; the channel never ran or cannot continue.
    Failed,

    /// Explicitly stopped. Terminal; no further reconnect attempts.
    Stopped,
}

impl ConnectionState {
    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Stopped | ConnectionState::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::ConnectingTarget => write!(f, "ConnectingTarget"),
            ConnectionState::ConnectingSource => write!(f, "ConnectingSource"),
            ConnectionState::Streaming => write!(f, "Streaming"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Failed => write!(f, "Failed"),
            ConnectionState::Stopped => write!(f, "Stopped"),
        }
    }
}
