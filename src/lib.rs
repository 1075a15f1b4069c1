//! # Feed Replicator
//!
//! Continuous, resumable, one-way replication of document changes from a
//! change-feed-style source database into a target document store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          feed-replicator                             │
//! │                                                                      │
//! │  ┌────────────┐   ┌─────────────┐   ┌───────────────────────────┐    │
//! │  │ FeedClient │──►│ FeedDecoder │──►│ ReplicationEngine         │    │
//! │  │ (HTTP GET  │   │ (line-framed│   │ classify → cursor advance │    │
//! │  │  _changes) │   │  JSON)      │   │ → dispatch                │    │
//! │  └────────────┘   └─────────────┘   └───────────────────────────┘    │
//! │        ▲                                   │              │          │
//! │        │ since=cursor on reconnect         ▼              ▼          │
//! │  ┌─────────────┐                 ┌──────────────┐ ┌───────────────┐  │
//! │  │ inactivity  │                 │ TargetWriter │ │ Notification  │  │
//! │  │ supervisor  │                 │ upsert/delete│ │ Hub (observer)│  │
//! │  └─────────────┘                 └──────────────┘ └───────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine connects the target first, then opens the source feed with
//! an inactivity timer racing the attempt. Change records stream in as
//! newline-delimited JSON, are decoded incrementally, classified
//! (reserved system documents discarded, deletions vs updates split) and
//! dispatched as idempotent full-document writes. Stream end, connection
//! reset, and inactivity all take the same path: an immediate reconnect
//! from the resumption cursor.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use feed_replicator::{ChannelConfig, HttpFeedClient, ReplicationEngine};
//! use feed_replicator::target::{MemoryTarget, MemoryTargetWriter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ChannelConfig {
//!         source: "http://127.0.0.1:5984/mydb".into(),
//!         target: "store://127.0.0.1:27017/mydb/docs".into(),
//!         ..Default::default()
//!     };
//!
//!     let feed = Arc::new(HttpFeedClient::new(config.source.clone(), config.heartbeat()));
//!     let target = Arc::new(MemoryTarget::new(MemoryTargetWriter::new()));
//!
//!     let mut engine = ReplicationEngine::new(config, feed, target);
//!     let mut notifications = engine.subscribe();
//!     engine.start().await.expect("failed to start");
//!
//!     while let Some(n) = notifications.recv().await {
//!         println!("{}", n.kind());
//!     }
//! }
//! ```

pub mod config;
pub mod cursor;
pub mod decoder;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod observer;
pub mod target;

// Re-exports for convenience
pub use config::{ChannelConfig, TargetLocator};
pub use cursor::{ReplicationCursor, Seq};
pub use decoder::{ChangeEvent, FeedDecoder};
pub use engine::{ConnectionState, ReplicationEngine};
pub use error::{ChannelError, Result};
pub use feed::{ChangeFeed, FeedHandle, HttpFeedClient};
pub use observer::{Notification, NotificationHub};
pub use target::{AckLevel, TargetConnector, TargetWriter};
