// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Space stream client surface consumed by the bridge core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::roomy::events::Event;

/// One ordered slice of a space's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    /// Stream index of this batch; persisted as the subscription cursor.
    pub index: u64,
    pub events: Vec<Event>,
}

/// Messages delivered by a space subscription, in stream order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamMessage {
    /// A batch of events, replayed (during backfill) or live.
    Batch(EventBatch),
    /// The replay caught up with the head of the stream; everything after
    /// this is live.
    DoneBackfilling,
}

/// Client surface for one Roomy space.
#[async_trait]
pub trait SpaceClient: Send + Sync {
    /// Append a batch of events to the space stream.
    async fn append(&self, events: &[Event]) -> Result<()>;

    /// Subscribe from `cursor` (exclusive; `None` replays from the start).
    /// Batches arrive on the returned channel until `cancel` fires or the
    /// stream closes for good.
    async fn subscribe(
        &self,
        cursor: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamMessage>>;
}
