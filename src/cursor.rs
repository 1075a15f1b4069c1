// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resumption cursor for the change feed.
//!
//! The source stamps every change record with a sequence id. Sequence ids
//! are opaque, source-issued, and non-decreasing within one connection;
//! the engine never generates, orders, or inspects them — it only echoes
//! the last one back in the `since=` parameter when reopening the feed.
//!
//! The cursor advances when an event has been classified and handed to
//! the write dispatcher, not when the write completes. On a reconnect
//! after a crash mid-write this replays the event: at-least-once, not
//! exactly-once, delivery.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An opaque sequence token issued by the source.
///
/// Depending on the source this is a bare integer (`42`) or a string
/// (`"42-g1AAAA..."`). Both are carried verbatim and rendered back into
/// the resume query parameter without interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seq(Value);

impl Seq {
    /// The cursor value that replicates from the beginning of the feed.
    pub fn origin() -> Self {
        Seq(Value::from(0))
    }

    /// Wrap a raw sequence value from the wire.
    pub fn from_value(value: Value) -> Self {
        Seq(value)
    }

    /// Render this token for the `since=` query parameter.
    ///
    /// Numbers render bare; strings render without surrounding quotes so
    /// the source receives exactly the token it issued.
    pub fn as_since_param(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_since_param())
    }
}

/// The last sequence id whose event was classified and dispatched.
#[derive(Debug, Clone)]
pub struct ReplicationCursor {
    seq: Seq,
}

impl ReplicationCursor {
    /// A cursor positioned at the beginning of the feed.
    pub fn at_origin() -> Self {
        Self { seq: Seq::origin() }
    }

    /// Resume from a previously saved sequence token.
    pub fn resume_from(seq: Seq) -> Self {
        Self { seq }
    }

    /// Advance to the sequence id of a dispatched event.
    pub fn advance(&mut self, seq: Seq) {
        self.seq = seq;
    }

    /// The token to echo on the next connection attempt.
    pub fn seq(&self) -> &Seq {
        &self.seq
    }
}

impl Default for ReplicationCursor {
    fn default() -> Self {
        Self::at_origin()
    }
}
