// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Target store integration traits.
//!
//! The engine is agnostic to the target's transport and query language;
//! it depends only on this upsert/delete contract. The process hosting
//! the engine provides an implementation, which also makes the engine
//! trivially testable with mocks.
//!
//! Writes are full-document replacement keyed by the document's own id —
//! never a partial merge.

use crate::config::TargetLocator;
use crate::error::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Result type for target write operations.
pub type WriteResult<T> = std::result::Result<T, WriteError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = WriteResult<T>> + Send + 'a>>;

/// Simplified error for target write operations.
#[derive(Debug, Clone)]
pub struct WriteError(pub String);

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for WriteError {}

/// Durability requested from the target store for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckLevel {
    /// Fire and forget.
    Unacknowledged,
    /// Acknowledged by at least one node (the replication default).
    #[default]
    Acknowledged,
    /// Acknowledged by a majority of nodes.
    Majority,
}

/// The write contract the engine dispatches against.
pub trait TargetWriter: Send + Sync + 'static {
    /// Update-or-insert the full document keyed by `id`, replacing any
    /// existing document wholesale.
    fn upsert_by_id(&self, id: &str, document: &Value, ack: AckLevel) -> BoxFuture<'_, ()>;

    /// Delete the document keyed by `id`. Returns whether a document was
    /// actually removed; deleting an absent id is not an error.
    fn delete_by_id(&self, id: &str, ack: AckLevel) -> BoxFuture<'_, bool>;
}

/// Establishes the target connection during engine startup.
///
/// The engine connects the target before attempting the source; a
/// connector failure is reported once and not auto-retried.
pub trait TargetConnector: Send + Sync + 'static {
    fn connect(
        &self,
        locator: &TargetLocator,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn TargetWriter>>> + Send + '_>>;
}

/// A no-op writer for standalone mode. Logs operations without storing
/// anything.
#[derive(Clone, Default)]
pub struct NoOpTargetWriter;

impl TargetWriter for NoOpTargetWriter {
    fn upsert_by_id(&self, id: &str, document: &Value, ack: AckLevel) -> BoxFuture<'_, ()> {
        let id = id.to_string();
        let len = document.to_string().len();
        Box::pin(async move {
            tracing::debug!(id = %id, len, ack = ?ack, "NoOp: would upsert document");
            Ok(())
        })
    }

    fn delete_by_id(&self, id: &str, ack: AckLevel) -> BoxFuture<'_, bool> {
        let id = id.to_string();
        Box::pin(async move {
            tracing::debug!(id = %id, ack = ?ack, "NoOp: would delete document");
            Ok(true)
        })
    }
}

/// In-memory target store. Backs integration tests and local smoke runs.
#[derive(Default)]
pub struct MemoryTargetWriter {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemoryTargetWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fetch a stored document by id.
    pub fn get(&self, id: &str) -> Option<Value> {
        self.documents.lock().expect("store poisoned").get(id).cloned()
    }

    /// Whether a document with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.documents.lock().expect("store poisoned").contains_key(id)
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.lock().expect("store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TargetWriter for MemoryTargetWriter {
    fn upsert_by_id(&self, id: &str, document: &Value, _ack: AckLevel) -> BoxFuture<'_, ()> {
        let id = id.to_string();
        let document = document.clone();
        Box::pin(async move {
            self.documents
                .lock()
                .expect("store poisoned")
                .insert(id, document);
            Ok(())
        })
    }

    fn delete_by_id(&self, id: &str, _ack: AckLevel) -> BoxFuture<'_, bool> {
        let id = id.to_string();
        Box::pin(async move {
            let removed = self
                .documents
                .lock()
                .expect("store poisoned")
                .remove(&id)
                .is_some();
            Ok(removed)
        })
    }
}

/// Connector handing out a shared [`MemoryTargetWriter`].
pub struct MemoryTarget {
    writer: Arc<MemoryTargetWriter>,
}

impl MemoryTarget {
    pub fn new(writer: Arc<MemoryTargetWriter>) -> Self {
        Self { writer }
    }
}

impl TargetConnector for MemoryTarget {
    fn connect(
        &self,
        locator: &TargetLocator,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn TargetWriter>>> + Send + '_>> {
        let writer: Arc<dyn TargetWriter> = Arc::clone(&self.writer) as _;
        tracing::debug!(
            database = %locator.database,
            collection = %locator.collection,
            "memory target connected"
        );
        Box::pin(async move { Ok(writer) })
    }
}
