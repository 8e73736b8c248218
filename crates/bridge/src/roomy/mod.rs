// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Roomy platform surface: the typed event model the bridge emits and
//! consumes, and the space stream client it talks through.

pub mod client;
pub mod events;
pub mod ws;

pub use client::{EventBatch, SpaceClient, StreamMessage};
pub use events::{Event, Extensions, Payload};
