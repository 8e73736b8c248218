// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! roomybridge: bidirectional Discord ↔ Roomy synchronization.
//!
//! For every configured (guild, space) pairing a [`bridge::Bridge`] keeps
//! channels, threads, messages, edits, deletions, reactions, and surrogate
//! user profiles mutually reflected, idempotently and without echo loops.

pub mod bridge;
pub mod config;
pub mod discord;
pub mod dispatch;
pub mod error;
pub mod hash;
pub mod ids;
pub mod orchestrator;
pub mod phase;
pub mod roomy;
pub mod store;
pub mod sync;

#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::discord::gateway;
use crate::discord::rest::RestClient;
use crate::orchestrator::Orchestrator;
use crate::store::{RedbStore, Store};
use crate::sync::profile::BlueskyResolver;

/// Run the bridge process until shutdown.
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let store: Arc<dyn Store> = Arc::new(RedbStore::open(&config.store_path)?);
    let api = Arc::new(RestClient::new(&config.discord_token));
    let resolver = Arc::new(BlueskyResolver::new());
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        api,
        resolver,
        config.roomy_url.clone(),
        shutdown.clone(),
    ));

    let registry = config::load_pairings(&config.pairings)?;
    for pairing in &registry.pairings {
        if let Err(e) = orchestrator.register_pairing(pairing.guild_id, &pairing.space_id).await {
            tracing::error!(guild = %pairing.guild_id, err = %e, "pairing registration failed");
        }
    }

    let (gateway_tx, gateway_rx) = mpsc::unbounded_channel();
    gateway::spawn(config.discord_token.clone(), gateway_tx, shutdown.child_token());

    tokio::select! {
        _ = orchestrator.run(gateway_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
    }
    Ok(())
}
