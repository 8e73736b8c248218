// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The four domain sync services.
//!
//! Stream events are fed through the services in a fixed priority order
//! (profile, structure, message, reaction); the first service that
//! recognizes the event kind handles it and routing stops. Services never
//! spawn their own workers: everything runs on the bridge's consumer
//! tasks, which is what keeps one pairing single-writer.

pub mod message;
pub mod profile;
pub mod reaction;
pub mod structure;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::ids::{EventUlid, Snowflake};
use crate::roomy::events::Event;

/// How a stream event is to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A bridge-origin event seen during replay: rebuild mapping tables and
    /// caches, emit nothing.
    Absorb,
    /// A native Roomy event: mirror it onto Discord.
    SyncToX,
}

/// Handler contract for stream events.
#[async_trait]
pub trait SyncService: Send + Sync {
    /// Apply one stream event. Returns `true` when the event kind belongs
    /// to this service, whether or not it resulted in any action.
    async fn apply_stream_event(&self, event: &Event, disposition: Disposition) -> Result<bool>;
}

/// Which Discord channel hosts the Discord counterpart of a Roomy message.
///
/// Message mappings store only the message ids; webhook edit/delete calls
/// also need the channel (the webhook is per channel). The index is rebuilt
/// from origin extensions during replay and kept warm by both sync
/// directions.
#[derive(Default)]
pub struct MessageIndex {
    channels: Mutex<HashMap<EventUlid, Snowflake>>,
}

impl MessageIndex {
    pub fn record(&self, message: &EventUlid, channel: Snowflake) {
        self.channels.lock().insert(message.clone(), channel);
    }

    pub fn channel_of(&self, message: &EventUlid) -> Option<Snowflake> {
        self.channels.lock().get(message).copied()
    }
}

/// Wall-clock unix milliseconds.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
