// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write dispatch with per-document-id ordering.
//!
//! Events are dispatched to the target as they are decoded, without
//! waiting for the previous write's acknowledgement — except when two
//! writes hit the *same* document id. An update and a subsequent delete
//! for one id acknowledged out of order would leave the target
//! inconsistent with the true change order, so writes are serialized per
//! id: each write task waits for its predecessor's completion signal,
//! and successors are chained in event order while the caller still
//! holds the decode loop. Dispatching never waits on an in-flight write,
//! only on the global in-flight bound, so a slow write for one id never
//! stalls decoding or writes for unrelated ids.
//!
//! A failed write is isolated: reported once via an `error`
//! notification, never retried, and never blocks later events — not even
//! later events for the same id.

use crate::decoder::ChangeEvent;
use crate::error::ChannelError;
use crate::metrics;
use crate::observer::{Notification, NotificationHub};
use crate::target::{AckLevel, TargetWriter};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{oneshot, Semaphore};
use tracing::{trace, warn};

/// Tail of one document id's write chain: the completion signal of the
/// most recently dispatched write, and which link in the chain it is.
struct ChainTail {
    epoch: u64,
    done: oneshot::Receiver<()>,
}

/// Dispatches classified change events to the target writer.
pub struct WriteDispatcher {
    writer: Arc<dyn TargetWriter>,
    hub: Arc<NotificationHub>,
    ack: AckLevel,
    max_in_flight: usize,
    permits: Arc<Semaphore>,
    /// Per-id chain tails. An entry is pruned when its write completes
    /// and no successor has been chained behind it.
    chains: Arc<StdMutex<HashMap<String, ChainTail>>>,
}

impl WriteDispatcher {
    pub fn new(
        writer: Arc<dyn TargetWriter>,
        hub: Arc<NotificationHub>,
        ack: AckLevel,
        max_in_flight: usize,
    ) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            writer,
            hub,
            ack,
            max_in_flight,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            chains: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Dispatch one event.
    ///
    /// The id's chain tail is swapped *here*, in the caller's event
    /// order, so writes for the same id are FIFO even though they
    /// complete on spawned tasks. The call blocks only while the global
    /// in-flight bound is reached — never on an individual write, so one
    /// slow document cannot stall the decode loop.
    pub async fn dispatch(&self, event: ChangeEvent) {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            // Semaphore closed: draining for shutdown, drop the event.
            return;
        };

        let (done_tx, done_rx) = oneshot::channel();
        let (epoch, predecessor) = {
            let mut chains = self.chains.lock().expect("chains poisoned");
            let (epoch, predecessor) = match chains.remove(&event.id) {
                Some(tail) => (tail.epoch.wrapping_add(1), Some(tail.done)),
                None => (0, None),
            };
            chains.insert(event.id.clone(), ChainTail { epoch, done: done_rx });
            (epoch, predecessor)
        };

        let writer = Arc::clone(&self.writer);
        let hub = Arc::clone(&self.hub);
        let chains = Arc::clone(&self.chains);
        let ack = self.ack;

        tokio::spawn(async move {
            // A closed signal counts as completion: the predecessor has
            // either finished or will never run.
            if let Some(done) = predecessor {
                let _ = done.await;
            }

            let start = Instant::now();
            perform_write(&*writer, &hub, ack, &event).await;
            metrics::record_write_latency(
                if event.deleted { "delete" } else { "upsert" },
                start.elapsed(),
            );

            let _ = done_tx.send(());
            prune_chain(&chains, &event.id, epoch);
            drop(permit);
        });
    }

    /// Wait until every dispatched write has completed.
    ///
    /// Used on shutdown; `stop()` does not roll back writes already
    /// dispatched, it only waits for them.
    pub async fn drain(&self) {
        if let Ok(all) = self.permits.acquire_many(self.max_in_flight as u32).await {
            drop(all);
        }
    }
}

/// Execute one write and emit the matching notification.
async fn perform_write(
    writer: &dyn TargetWriter,
    hub: &NotificationHub,
    ack: AckLevel,
    event: &ChangeEvent,
) {
    if event.deleted {
        match writer.delete_by_id(&event.id, ack).await {
            Ok(_removed) => {
                trace!(id = %event.id, "document deleted");
                metrics::record_write("delete", true);
                hub.emit(Notification::Delete(event.id.clone()));
            }
            Err(e) => {
                warn!(id = %event.id, error = %e, "delete failed");
                metrics::record_write("delete", false);
                hub.emit(Notification::Error(
                    ChannelError::write(&event.id, e.to_string()).to_string(),
                ));
            }
        }
        return;
    }

    let Some(doc) = &event.doc else {
        // The feed is opened with document bodies included; a body-less
        // update record cannot be replicated as a full replacement.
        warn!(id = %event.id, "update record carried no document body");
        metrics::record_write("upsert", false);
        hub.emit(Notification::Error(
            ChannelError::write(&event.id, "change record carried no document body").to_string(),
        ));
        return;
    };

    match writer.upsert_by_id(&event.id, doc, ack).await {
        Ok(()) => {
            trace!(id = %event.id, "document copied");
            metrics::record_write("upsert", true);
            hub.emit(Notification::Copy(doc.clone()));
        }
        Err(e) => {
            warn!(id = %event.id, error = %e, "upsert failed");
            metrics::record_write("upsert", false);
            hub.emit(Notification::Error(
                ChannelError::write(&event.id, e.to_string()).to_string(),
            ));
        }
    }
}

/// Remove the id's chain entry unless a successor has replaced it.
/// Chain swaps only happen under the map mutex, so a matching epoch
/// means this write is still the tail.
fn prune_chain(chains: &StdMutex<HashMap<String, ChainTail>>, id: &str, epoch: u64) {
    let mut chains = chains.lock().expect("chains poisoned");
    if chains.get(id).map(|tail| tail.epoch) == Some(epoch) {
        chains.remove(id);
    }
}
