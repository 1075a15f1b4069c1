// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change feed client.
//!
//! [`ChangeFeed`] is the engine's seam to the source database: open a
//! long-lived streaming request at a resumption cursor, read raw body
//! chunks, abort at will. [`HttpFeedClient`] is the production
//! implementation; tests drive the engine with scripted feeds.
//!
//! # Failure classification
//!
//! Long-lived streaming connections get reset by proxies, load balancers
//! and the source itself as a matter of course. A connection reset (or
//! any other transport error) *mid-stream* is therefore swallowed: the
//! chunk stream simply ends, which sends the engine down the same
//! reconnect path as a graceful close. Only *establishment* failures —
//! name resolution, refused connection, a non-success HTTP status —
//! surface as [`ChannelError::Connect`].

use crate::cursor::Seq;
use crate::error::{ChannelError, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// A stream of raw feed body chunks. Errors are already classified away:
/// the stream just ends when the connection does.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// The engine's view of a source change feed.
pub trait ChangeFeed: Send + Sync + 'static {
    /// Open a continuous feed positioned after `since`.
    ///
    /// Errors are fatal for this attempt only; the engine decides whether
    /// to retry.
    fn open(&self, since: Seq) -> Pin<Box<dyn Future<Output = Result<FeedHandle>> + Send + '_>>;
}

/// Handle over one in-flight feed connection.
pub struct FeedHandle {
    stream: Option<ChunkStream>,
}

impl FeedHandle {
    pub fn new(stream: ChunkStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// Read the next body chunk. Returns `None` once the stream has
    /// ended or the handle was aborted; the caller reconnects from its
    /// cursor.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        let stream = self.stream.as_mut()?;
        let chunk = stream.next().await;
        if chunk.is_none() {
            self.stream = None;
        }
        chunk
    }

    /// Cancel the in-flight request. Dropping the body stream tears the
    /// connection down. Safe to call after the stream has already ended:
    /// a second call is a no-op.
    pub fn abort(&mut self) {
        if self.stream.take().is_some() {
            debug!("in-flight feed request aborted");
        }
    }

    /// Whether the handle still has a live stream.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// HTTP implementation of [`ChangeFeed`].
///
/// Issues `GET {base}/_changes?feed=continuous&include_docs=true&heartbeat={ms}&since={cursor}`
/// and exposes the response body as a chunk stream. The client carries no
/// overall request timeout — the feed is expected to stay open
/// indefinitely; liveness is the engine supervisor's job.
pub struct HttpFeedClient {
    client: reqwest::Client,
    base_url: String,
    heartbeat: Duration,
}

impl HttpFeedClient {
    pub fn new(base_url: impl Into<String>, heartbeat: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            heartbeat,
        }
    }

    /// Build the feed request URL for a given cursor position.
    fn feed_url(&self, since: &Seq) -> Result<reqwest::Url> {
        let endpoint = format!("{}/_changes", self.base_url.trim_end_matches('/'));
        let mut url = reqwest::Url::parse(&endpoint)
            .map_err(|e| ChannelError::Config(format!("Invalid Source URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("feed", "continuous")
            .append_pair("include_docs", "true")
            .append_pair("heartbeat", &self.heartbeat.as_millis().to_string())
            .append_pair("since", &since.as_since_param());
        Ok(url)
    }
}

impl ChangeFeed for HttpFeedClient {
    fn open(&self, since: Seq) -> Pin<Box<dyn Future<Output = Result<FeedHandle>> + Send + '_>> {
        Box::pin(async move {
            let url = self.feed_url(&since)?;
            debug!(url = %url, "opening change feed");

            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| ChannelError::connect(self.base_url.clone(), e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ChannelError::connect_msg(
                    self.base_url.clone(),
                    format!("unexpected status {}", status),
                ));
            }

            // Mid-stream transport errors end the stream instead of
            // surfacing: resets are an expected condition of long-lived
            // feeds and take the normal reconnect path.
            let stream = response
                .bytes_stream()
                .take_while(|chunk| {
                    let keep = match chunk {
                        Ok(_) => true,
                        Err(e) => {
                            debug!(error = %e, "feed body ended mid-stream");
                            false
                        }
                    };
                    futures::future::ready(keep)
                })
                .filter_map(|chunk| futures::future::ready(chunk.ok()));

            Ok(FeedHandle::new(Box::pin(stream)))
        })
    }
}
