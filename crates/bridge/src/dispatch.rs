// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The bridge's two ordered queues.
//!
//! `toR` carries Roomy events the services want appended to the space
//! stream; `toX` carries decoded stream events awaiting replay against
//! Discord. Each queue has exactly one consumer task, which is what makes
//! the per-pairing single-writer discipline hold. FIFO order is preserved
//! within a queue; nothing is promised across the two.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::phase::{Phase, PhaseCell};
use crate::roomy::client::SpaceClient;
use crate::roomy::events::Event;

/// Batch size for `toR` during the Discord backfill phase.
pub const FLUSH_THRESHOLD: usize = 100;

/// `toR` queue entries: events, or an awaited flush marker.
pub enum ToR {
    Emit(Event),
    Flush(oneshot::Sender<()>),
}

/// One `toX` queue entry. `event: None` is the backfill-complete sentinel;
/// the consumer switches the bridge to listening when it matches the batch
/// id captured at `doneBackfilling`.
#[derive(Debug, Clone)]
pub struct ToXItem {
    pub batch: u64,
    pub is_last: bool,
    pub event: Option<Event>,
}

/// Sending half of both queues, cloned into the services.
#[derive(Clone)]
pub struct EventDispatcher {
    to_r: mpsc::UnboundedSender<ToR>,
    to_x: mpsc::UnboundedSender<ToXItem>,
}

/// Receiving half, consumed once by the bridge's two consumer tasks.
pub struct DispatcherQueues {
    pub to_r: mpsc::UnboundedReceiver<ToR>,
    pub to_x: mpsc::UnboundedReceiver<ToXItem>,
}

impl EventDispatcher {
    pub fn new() -> (Self, DispatcherQueues) {
        let (to_r_tx, to_r_rx) = mpsc::unbounded_channel();
        let (to_x_tx, to_x_rx) = mpsc::unbounded_channel();
        (
            Self { to_r: to_r_tx, to_x: to_x_tx },
            DispatcherQueues { to_r: to_r_rx, to_x: to_x_rx },
        )
    }

    /// Queue an event for the space stream.
    pub fn send_to_r(&self, event: Event) {
        if self.to_r.send(ToR::Emit(event)).is_err() {
            tracing::error!("toR queue closed, dropping event");
        }
    }

    /// Flush any batched `toR` events and wait until they are appended.
    pub async fn flush_to_r(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.to_r.send(ToR::Flush(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Queue a decoded stream event (or the sentinel) for Discord replay.
    pub fn send_to_x(&self, item: ToXItem) {
        if self.to_x.send(item).is_err() {
            tracing::error!("toX queue closed, dropping event");
        }
    }
}

/// Consume the `toR` queue for the lifetime of the bridge.
///
/// During `backfillXAndSyncToR` events accumulate and are appended in
/// batches; during `listening` each event is appended as it arrives. In
/// any other phase an event is a bug in the caller and is dropped loudly.
pub async fn run_to_r_consumer(
    mut rx: mpsc::UnboundedReceiver<ToR>,
    phase: Arc<PhaseCell>,
    client: Arc<dyn SpaceClient>,
    cancel: CancellationToken,
) {
    let mut pending: Vec<Event> = Vec::new();

    loop {
        let entry = tokio::select! {
            _ = cancel.cancelled() => return,
            entry = rx.recv() => {
                let Some(entry) = entry else { return };
                entry
            }
        };
        match entry {
            ToR::Emit(event) => match phase.current() {
                Phase::BackfillXAndSyncToR => {
                    pending.push(event);
                    if pending.len() >= FLUSH_THRESHOLD {
                        append_all(&*client, &mut pending).await;
                    }
                }
                Phase::Listening => {
                    let mut single = vec![event];
                    append_all(&*client, &mut single).await;
                }
                other => {
                    tracing::error!(phase = %other, "toR event outside an emitting phase, discarding");
                }
            },
            ToR::Flush(ack) => {
                append_all(&*client, &mut pending).await;
                let _ = ack.send(());
            }
        }
    }
}

async fn append_all(client: &dyn SpaceClient, pending: &mut Vec<Event>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    if let Err(e) = client.append(&batch).await {
        // Mappings for these events are already registered; a replay after
        // restart re-appends them under the same ids.
        tracing::error!(err = %e, count = batch.len(), "failed to append events to space");
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
