// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-to-end channel tests against a scripted feed and an in-memory
//! target.

mod common;

use common::{
    delete_line, keepalive, update_line, Attempt, ScriptedFeed, Step, TestTarget, TestWriter,
};
use feed_replicator::cursor::Seq;
use feed_replicator::engine::{ConnectionState, ReplicationEngine};
use feed_replicator::error::ChannelError;
use feed_replicator::observer::Notification;
use feed_replicator::ChannelConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const SOURCE: &str = "http://127.0.0.1:5984/db";
const TARGET: &str = "http://127.0.0.1:27017/db/coll";

fn engine(
    feed: Arc<ScriptedFeed>,
    writer: Arc<TestWriter>,
) -> ReplicationEngine<ScriptedFeed> {
    common::init_tracing();
    ReplicationEngine::new(
        ChannelConfig::for_testing(SOURCE, TARGET),
        feed,
        TestTarget::new(writer),
    )
}

async fn next_notification(rx: &mut UnboundedReceiver<Notification>) -> Notification {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notification hub closed")
}

/// Receive notifications until one matches, failing on timeout.
async fn wait_for_notification(
    rx: &mut UnboundedReceiver<Notification>,
    pred: impl Fn(&Notification) -> bool,
) -> Notification {
    loop {
        let n = next_notification(rx).await;
        if pred(&n) {
            return n;
        }
    }
}

/// Poll a condition until it holds, failing after five seconds.
async fn wait_until(pred: impl Fn() -> bool) {
    let give_up = tokio::time::Instant::now() + Duration::from_secs(5);
    while !pred() {
        assert!(
            tokio::time::Instant::now() < give_up,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_update_writes_full_document() {
    let doc = json!({"_id": "a", "name": "ada", "v": 1});
    let feed = ScriptedFeed::new(vec![Attempt::Stream(vec![
        Step::Chunk(update_line(1, "a", doc.clone())),
        Step::Pending,
    ])]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));
    let mut rx = engine.subscribe();

    engine.start().await.unwrap();
    assert!(matches!(next_notification(&mut rx).await, Notification::Start));
    let copied = wait_for_notification(&mut rx, |n| matches!(n, Notification::Copy(_))).await;
    assert!(matches!(copied, Notification::Copy(d) if d == doc));

    assert_eq!(writer.get("a"), Some(doc));
    assert_eq!(writer.ops(), vec!["upsert:a"]);
    engine.stop().await;
}

#[tokio::test]
async fn test_deletion_removes_document() {
    let feed = ScriptedFeed::new(vec![Attempt::Stream(vec![
        Step::Chunk(update_line(1, "a", json!({"v": 1}))),
        Step::Chunk(delete_line(2, "a")),
        Step::Pending,
    ])]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));
    let mut rx = engine.subscribe();

    engine.start().await.unwrap();
    let deleted =
        wait_for_notification(&mut rx, |n| matches!(n, Notification::Delete(_))).await;
    assert!(matches!(deleted, Notification::Delete(id) if id == "a"));

    // Same-id writes apply in feed order: the upsert lands before the
    // delete even though both run on spawned tasks.
    assert_eq!(writer.ops(), vec!["upsert:a", "delete:a"]);
    assert!(!writer.contains("a"));
    engine.stop().await;
}

#[tokio::test]
async fn test_reserved_documents_never_reach_target() {
    let feed = ScriptedFeed::new(vec![Attempt::Stream(vec![
        Step::Chunk(update_line(1, "_design/views", json!({"language": "javascript"}))),
        Step::Chunk(update_line(2, "_local/checkpoint", json!({"seq": 9}))),
        Step::Chunk(update_line(3, "real", json!({"v": 3}))),
        Step::Pending,
    ])]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));
    let mut rx = engine.subscribe();

    engine.start().await.unwrap();
    wait_for_notification(&mut rx, |n| matches!(n, Notification::Copy(_))).await;

    assert_eq!(writer.len(), 1);
    assert!(writer.contains("real"));
    assert_eq!(writer.ops(), vec!["upsert:real"]);
    // Discards are silent: no notification of any kind for them.
    assert!(rx.try_recv().is_err());
    engine.stop().await;
}

#[tokio::test]
async fn test_reconnect_resumes_from_last_dispatched_seq() {
    let feed = ScriptedFeed::new(vec![Attempt::Stream(vec![
        Step::Chunk(update_line(1, "a", json!({"v": 1}))),
        Step::Chunk(update_line(2, "b", json!({"v": 2}))),
        // Script ends here: the connection drops.
    ])]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));

    engine.start().await.unwrap();
    {
        let feed = Arc::clone(&feed);
        wait_until(move || feed.open_count() >= 2).await;
    }

    assert_eq!(&feed.opened()[..2], &["0", "2"]);
    engine.stop().await;
}

#[tokio::test]
async fn test_dropped_connection_reconnects_without_error() {
    // An immediately-ended stream is what a mid-stream reset looks like
    // after the transport swallows it.
    let feed = ScriptedFeed::new(vec![Attempt::Stream(vec![Step::Chunk(keepalive())])]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));
    let mut rx = engine.subscribe();

    engine.start().await.unwrap();
    {
        let feed = Arc::clone(&feed);
        wait_until(move || feed.open_count() >= 2).await;
    }

    // Two starts (one per connection), no errors.
    let mut starts = 0;
    while let Ok(n) = rx.try_recv() {
        match n {
            Notification::Start => starts += 1,
            Notification::Error(e) => panic!("unexpected error notification: {}", e),
            other => panic!("unexpected notification: {}", other.kind()),
        }
    }
    assert!(starts >= 2);
    engine.stop().await;
}

#[tokio::test]
async fn test_connect_failure_reports_error_and_retries() {
    let feed = ScriptedFeed::new(vec![Attempt::FailConnect("refused".to_string())]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));
    let mut rx = engine.subscribe();

    engine.start().await.unwrap();
    let error = wait_for_notification(&mut rx, |n| matches!(n, Notification::Error(_))).await;
    assert!(matches!(error, Notification::Error(m) if m.contains("refused")));

    // The retry succeeds against the default silent stream.
    wait_for_notification(&mut rx, |n| matches!(n, Notification::Start)).await;
    assert!(feed.open_count() >= 2);
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_open_times_out_and_retries() {
    let feed = ScriptedFeed::new(vec![Attempt::HangOpen]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));

    engine.start().await.unwrap();
    {
        let feed = Arc::clone(&feed);
        wait_until(move || feed.open_count() >= 2).await;
    }
    // A hung open carries no cursor progress.
    assert_eq!(&feed.opened()[..2], &["0", "0"]);
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_inactive_stream_aborts_and_resumes_from_cursor() {
    let feed = ScriptedFeed::new(vec![Attempt::Stream(vec![
        Step::Chunk(update_line(1, "a", json!({"v": 1}))),
        Step::Pending, // then silence past the inactivity window
    ])]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));

    engine.start().await.unwrap();
    {
        let feed = Arc::clone(&feed);
        wait_until(move || feed.open_count() >= 2).await;
    }

    let opened = feed.opened();
    assert_eq!(&opened[..2], &["0", "1"]);
    // Every later retry keeps resuming from the same cursor.
    assert!(opened[2..].iter().all(|s| s == "1"));
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_keepalives_hold_off_the_inactivity_timer() {
    // Keepalives arrive at half the window; the stream must survive
    // several windows' worth of wall time on a single connection.
    let mut steps = Vec::new();
    for _ in 0..8 {
        steps.push(Step::Stall(Duration::from_millis(900)));
        steps.push(Step::Chunk(keepalive()));
    }
    steps.push(Step::Pending);
    let feed = ScriptedFeed::new(vec![Attempt::Stream(steps)]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(feed.open_count(), 1);
    engine.stop().await;
}

#[tokio::test]
async fn test_write_failure_reported_and_stream_continues() {
    let feed = ScriptedFeed::new(vec![Attempt::Stream(vec![
        Step::Chunk(update_line(1, "bad", json!({"v": 1}))),
        Step::Chunk(update_line(2, "good", json!({"v": 2}))),
        Step::Pending,
    ])]);
    let writer = TestWriter::new();
    writer.fail_writes_for("bad");
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));
    let mut rx = engine.subscribe();

    engine.start().await.unwrap();
    let error = wait_for_notification(&mut rx, |n| matches!(n, Notification::Error(_))).await;
    assert!(matches!(error, Notification::Error(m) if m.contains("bad")));
    wait_for_notification(&mut rx, |n| matches!(n, Notification::Copy(_))).await;

    assert!(writer.contains("good"));
    assert!(!writer.contains("bad"));
    engine.stop().await;
}

#[tokio::test]
async fn test_replayed_update_is_idempotent() {
    let doc = json!({"v": 1});
    // The source replays the same record on the second connection, as a
    // feed resumed from an older checkpoint would.
    let feed = ScriptedFeed::new(vec![
        Attempt::Stream(vec![Step::Chunk(update_line(1, "a", doc.clone()))]),
        Attempt::Stream(vec![Step::Chunk(update_line(1, "a", doc.clone())), Step::Pending]),
    ]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));

    engine.start().await.unwrap();
    {
        let writer = Arc::clone(&writer);
        wait_until(move || writer.ops().len() >= 2).await;
    }

    assert_eq!(writer.ops(), vec!["upsert:a", "upsert:a"]);
    assert_eq!(writer.len(), 1);
    assert_eq!(writer.get("a"), Some(doc));
    engine.stop().await;
}

#[tokio::test]
async fn test_malformed_lines_skipped_without_losing_later_records() {
    let feed = ScriptedFeed::new(vec![Attempt::Stream(vec![
        Step::Chunk(bytes::Bytes::from_static(b"{not json\n")),
        Step::Chunk(bytes::Bytes::from_static(b"{\"id\": \"noseq\"}\n")),
        Step::Chunk(update_line(5, "a", json!({"v": 5}))),
        Step::Pending,
    ])]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));
    let mut rx = engine.subscribe();

    engine.start().await.unwrap();
    wait_for_notification(&mut rx, |n| matches!(n, Notification::Copy(_))).await;
    assert_eq!(writer.ops(), vec!["upsert:a"]);
    engine.stop().await;
}

#[tokio::test]
async fn test_target_connect_failure_never_touches_source() {
    common::init_tracing();
    let feed = ScriptedFeed::new(vec![]);
    let mut engine = ReplicationEngine::new(
        ChannelConfig::for_testing(SOURCE, TARGET),
        Arc::clone(&feed),
        TestTarget::failing(),
    );
    let mut rx = engine.subscribe();

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, ChannelError::Connect { .. }));
    assert_eq!(engine.state(), ConnectionState::Failed);
    assert!(matches!(next_notification(&mut rx).await, Notification::Error(_)));
    assert_eq!(feed.open_count(), 0);
}

#[tokio::test]
async fn test_single_segment_target_is_a_config_error() {
    common::init_tracing();
    let feed = ScriptedFeed::new(vec![]);
    let writer = TestWriter::new();
    let target = TestTarget::new(Arc::clone(&writer));
    let mut engine = ReplicationEngine::new(
        ChannelConfig::for_testing(SOURCE, "http://127.0.0.1:27017/justdb"),
        Arc::clone(&feed),
        Arc::clone(&target) as Arc<dyn feed_replicator::target::TargetConnector>,
    );

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, ChannelError::Config(_)));
    // Neither side is attempted on a config error.
    assert_eq!(target.connect_count(), 0);
    assert_eq!(feed.open_count(), 0);
}

#[tokio::test]
async fn test_stop_halts_reconnect_attempts() {
    let feed = ScriptedFeed::new(vec![]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer));

    engine.start().await.unwrap();
    {
        let feed = Arc::clone(&feed);
        wait_until(move || feed.open_count() >= 1).await;
    }
    engine.stop().await;
    assert_eq!(engine.state(), ConnectionState::Stopped);

    let count = feed.open_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(feed.open_count(), count);
}

#[tokio::test]
async fn test_resume_from_saved_string_seq() {
    let feed = ScriptedFeed::new(vec![]);
    let writer = TestWriter::new();
    let mut engine = engine(Arc::clone(&feed), Arc::clone(&writer))
        .resume_from(Seq::from_value(json!("42-g1AAAA")));

    engine.start().await.unwrap();
    {
        let feed = Arc::clone(&feed);
        wait_until(move || feed.open_count() >= 1).await;
    }
    assert_eq!(feed.opened()[0], "42-g1AAAA");
    engine.stop().await;
}
