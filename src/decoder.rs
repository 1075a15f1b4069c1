// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Incremental decoder for the continuous change feed.
//!
//! The feed body is an unbounded sequence of newline-delimited JSON
//! records interleaved with empty keepalive lines. Network reads split
//! records at arbitrary byte boundaries, so the decoder buffers partial
//! lines and yields a [`ChangeEvent`] only once a record is fully
//! parseable.
//!
//! One decoder instance serves exactly one connection attempt. It is not
//! restartable: continuity across attempts is carried by the
//! [`ReplicationCursor`](crate::cursor::ReplicationCursor), never by
//! decoder state.
//!
//! # Record shapes
//!
//! | Line | Handling |
//! |------|----------|
//! | empty / whitespace | keepalive, skipped |
//! | `{"seq":..,"id":..,"doc":..}` | yielded as a change event |
//! | `{"seq":..,"id":..,"deleted":true}` | yielded as a deletion |
//! | JSON without an `id` (e.g. the final `last_seq` summary) | skipped |
//! | unparseable | [`ChannelError::StreamParse`], record dropped |

use crate::cursor::Seq;
use crate::error::{ChannelError, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

/// Document id prefixes reserved for system-owned documents.
///
/// Records carrying these ids are discarded before classification and
/// never reach the target writer.
pub const RESERVED_ID_PREFIXES: [&str; 2] = ["_design/", "_local/"];

/// Check whether a document id is system-reserved.
pub fn is_reserved_id(id: &str) -> bool {
    RESERVED_ID_PREFIXES.iter().any(|p| id.starts_with(p))
}

/// A single document mutation read from the change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Opaque source-issued position token.
    pub seq: Seq,
    /// The mutated document's id.
    pub id: String,
    /// Full document body; present when the feed was opened with
    /// document bodies included and the record is not a deletion.
    pub doc: Option<Value>,
    /// Whether this record is a deletion.
    pub deleted: bool,
}

impl ChangeEvent {
    /// Check if this event's id is system-reserved.
    pub fn is_reserved(&self) -> bool {
        is_reserved_id(&self.id)
    }
}

/// Wire shape of one feed record. Fields the source may omit are
/// optional so that summary records (no `id`) parse cleanly.
#[derive(Debug, Deserialize)]
struct WireRecord {
    seq: Option<Value>,
    id: Option<String>,
    doc: Option<Value>,
    #[serde(default)]
    deleted: bool,
}

/// Push-based incremental decoder. Feed raw body chunks in with
/// [`push()`](Self::push), pull complete events out with
/// [`next_event()`](Self::next_event).
#[derive(Debug, Default)]
pub struct FeedDecoder {
    buf: Vec<u8>,
}

impl FeedDecoder {
    /// Create a decoder for a fresh connection attempt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw body chunk. Chunks may split records anywhere.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes buffered awaiting a record terminator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete event, if one is available.
    ///
    /// Returns `None` when the buffer holds no complete record; push more
    /// bytes and try again. Keepalive lines and id-less summary records
    /// are consumed silently. A line that fails to parse is consumed and
    /// reported as [`ChannelError::StreamParse`]; subsequent records
    /// remain readable.
    pub fn next_event(&mut self) -> Option<Result<ChangeEvent>> {
        loop {
            let newline = self.buf.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = self.buf.drain(..=newline).collect();
            let line = trim_ascii(&line);

            if line.is_empty() {
                // Keepalive emitted by the source while idle.
                trace!("keepalive line");
                continue;
            }

            let record: WireRecord = match serde_json::from_slice(line) {
                Ok(r) => r,
                Err(e) => {
                    return Some(Err(ChannelError::StreamParse(format!(
                        "unparseable feed line: {}",
                        e
                    ))));
                }
            };

            let Some(id) = record.id else {
                // Summary records (e.g. the trailing last_seq line on a
                // graceful close) carry no id and are not change events.
                trace!("id-less feed record skipped");
                continue;
            };

            let Some(seq) = record.seq else {
                return Some(Err(ChannelError::StreamParse(format!(
                    "change record for '{}' is missing its sequence id",
                    id
                ))));
            };

            return Some(Ok(ChangeEvent {
                seq: Seq::from_value(seq),
                id,
                doc: record.doc,
                deleted: record.deleted,
            }));
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &bytes[start..end]
}
