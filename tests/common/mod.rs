//! Shared test doubles: a scripted change feed and a recording target.

#![allow(dead_code)]

use bytes::Bytes;
use feed_replicator::config::TargetLocator;
use feed_replicator::cursor::Seq;
use feed_replicator::error::{ChannelError, Result};
use feed_replicator::feed::{ChangeFeed, ChunkStream, FeedHandle};
use feed_replicator::target::{AckLevel, BoxFuture, TargetConnector, TargetWriter, WriteError};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Route engine tracing through the per-test capture writer. Safe to
/// call from every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// One scripted action within a connection attempt's body stream.
pub enum Step {
    /// Emit a body chunk.
    Chunk(Bytes),
    /// Wait before the next step (feed goes quiet for a while).
    Stall(Duration),
    /// Go quiet forever; only an abort ends the stream.
    Pending,
}

/// The script for one connection attempt.
pub enum Attempt {
    /// Connect successfully and play these steps; the stream ends when
    /// they run out (a close and a mid-stream reset look identical to
    /// the engine).
    Stream(Vec<Step>),
    /// Fail connection establishment.
    FailConnect(String),
    /// Never respond to the open at all.
    HangOpen,
}

/// A [`ChangeFeed`] driven by per-attempt scripts. Records every `since`
/// parameter it is opened with. Once the scripts run out, further opens
/// succeed with a stream that stays silent forever.
pub struct ScriptedFeed {
    attempts: Mutex<VecDeque<Attempt>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedFeed {
    pub fn new(attempts: Vec<Attempt>) -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(attempts.into()),
            opened: Mutex::new(Vec::new()),
        })
    }

    /// The `since` cursor of every open, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

impl ChangeFeed for ScriptedFeed {
    fn open(&self, since: Seq) -> Pin<Box<dyn Future<Output = Result<FeedHandle>> + Send + '_>> {
        self.opened.lock().unwrap().push(since.as_since_param());
        let attempt = self.attempts.lock().unwrap().pop_front();
        Box::pin(async move {
            match attempt {
                Some(Attempt::FailConnect(message)) => {
                    Err(ChannelError::connect_msg("scripted-source", message))
                }
                Some(Attempt::HangOpen) => {
                    futures::future::pending::<()>().await;
                    unreachable!("pending future resolved")
                }
                Some(Attempt::Stream(steps)) => Ok(FeedHandle::new(stream_from_steps(steps))),
                None => Ok(FeedHandle::new(stream_from_steps(vec![Step::Pending]))),
            }
        })
    }
}

fn stream_from_steps(steps: Vec<Step>) -> ChunkStream {
    Box::pin(futures::stream::unfold(
        steps.into_iter(),
        |mut steps| async move {
            loop {
                match steps.next() {
                    None => return None,
                    Some(Step::Chunk(bytes)) => return Some((bytes, steps)),
                    Some(Step::Stall(duration)) => tokio::time::sleep(duration).await,
                    Some(Step::Pending) => futures::future::pending::<()>().await,
                }
            }
        },
    ))
}

/// Render one feed line for a document update.
pub fn update_line(seq: u64, id: &str, doc: Value) -> Bytes {
    Bytes::from(format!(
        "{}\n",
        json!({ "seq": seq, "id": id, "doc": doc })
    ))
}

/// Render one feed line for a deletion.
pub fn delete_line(seq: u64, id: &str) -> Bytes {
    Bytes::from(format!(
        "{}\n",
        json!({ "seq": seq, "id": id, "deleted": true })
    ))
}

/// An empty keepalive line.
pub fn keepalive() -> Bytes {
    Bytes::from_static(b"\n")
}

/// Recording in-memory target writer with per-id failure injection.
#[derive(Default)]
pub struct TestWriter {
    store: Mutex<HashMap<String, Value>>,
    ops: Mutex<Vec<String>>,
    fail_ids: Mutex<HashSet<String>>,
}

impl TestWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every write for `id` fail.
    pub fn fail_writes_for(&self, id: &str) {
        self.fail_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.store.lock().unwrap().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store.lock().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    /// Every operation attempted against the writer, in completion order.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

impl TargetWriter for TestWriter {
    fn upsert_by_id(&self, id: &str, document: &Value, _ack: AckLevel) -> BoxFuture<'_, ()> {
        let id = id.to_string();
        let document = document.clone();
        Box::pin(async move {
            self.ops.lock().unwrap().push(format!("upsert:{}", id));
            if self.fail_ids.lock().unwrap().contains(&id) {
                return Err(WriteError(format!("injected failure for {}", id)));
            }
            self.store.lock().unwrap().insert(id, document);
            Ok(())
        })
    }

    fn delete_by_id(&self, id: &str, _ack: AckLevel) -> BoxFuture<'_, bool> {
        let id = id.to_string();
        Box::pin(async move {
            self.ops.lock().unwrap().push(format!("delete:{}", id));
            if self.fail_ids.lock().unwrap().contains(&id) {
                return Err(WriteError(format!("injected failure for {}", id)));
            }
            Ok(self.store.lock().unwrap().remove(&id).is_some())
        })
    }
}

/// Connector over a [`TestWriter`], optionally failing establishment.
pub struct TestTarget {
    writer: Arc<TestWriter>,
    fail_connect: bool,
    connects: AtomicUsize,
}

impl TestTarget {
    pub fn new(writer: Arc<TestWriter>) -> Arc<Self> {
        Arc::new(Self {
            writer,
            fail_connect: false,
            connects: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            writer: TestWriter::new(),
            fail_connect: true,
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl TargetConnector for TestTarget {
    fn connect(
        &self,
        _locator: &TargetLocator,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn TargetWriter>>> + Send + '_>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail_connect;
        let writer: Arc<dyn TargetWriter> = Arc::clone(&self.writer) as _;
        Box::pin(async move {
            if fail {
                Err(ChannelError::connect_msg("scripted-target", "connection refused"))
            } else {
                Ok(writer)
            }
        })
    }
}
