// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication channel.
//!
//! Errors are categorized by where they occur in the replication pipeline
//! and by how the engine reacts to them.
//!
//! # Error Categories
//!
//! | Error Type | Fatal | Description |
//! |------------|-------|-------------|
//! | `Config` | Yes | Missing or malformed source/target endpoint |
//! | `Connect` | No | DNS failure, refused connection, bad HTTP status on connect |
//! | `StreamParse` | No | Malformed change record (logged, record skipped) |
//! | `Write` | No | Upsert/delete against the target failed |
//! | `InvalidState` | Yes | Engine lifecycle violation (caller bug) |
//!
//! # Reaction
//!
//! Fatal errors terminate the channel before any connection is attempted
//! (or indicate a caller bug). Non-fatal errors feed the reconnect loop or
//! are reported once per event via an [`error`](crate::observer::Notification::Error)
//! notification and then dropped — there is no retry or dead-letter queue.

use thiserror::Error;

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors that can occur while running a replication channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Invalid or missing configuration.
    ///
    /// Reported once; the channel never starts and no connection attempt
    /// is made. Fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection establishment failure (source or target).
    ///
    /// DNS resolution failure, refused connection, or a non-success HTTP
    /// status before the stream began. The source side re-enters the
    /// reconnect loop; the target side does not auto-retry.
    #[error("Connection error ({endpoint}): {message}")]
    Connect {
        endpoint: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// A change record could not be parsed.
    ///
    /// The record is malformed at the source. The engine logs and skips
    /// it; the stream continues.
    #[error("Stream parse error: {0}")]
    StreamParse(String),

    /// Upsert or delete against the target store failed.
    ///
    /// Isolated per event: reported via an error notification, not
    /// retried, and never interrupts the stream.
    #[error("Write error ({id}): {message}")]
    Write { id: String, message: String },

    /// Engine state machine violation.
    ///
    /// E.g. calling `start()` twice. Indicates a bug in the caller.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl ChannelError {
    /// Create a connection error with an underlying transport cause.
    pub fn connect(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a connection error without a transport cause.
    pub fn connect_msg(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a per-event write error.
    pub fn write(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Write {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Check if this error terminates the channel outright.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::InvalidState { .. } => true,
            Self::Connect { .. } => false,
            Self::StreamParse(_) => false,
            Self::Write { .. } => false,
        }
    }
}
