// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide bridge registry and gateway fan-out.
//!
//! One gateway connection serves every pairing; events are routed to the
//! owning bridge by guild id and silently dropped when no bridge claims
//! them. A failing bridge never blocks the others: per-event errors are
//! handled inside each bridge's own consumer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::bridge::Bridge;
use crate::discord::api::DiscordApi;
use crate::discord::gateway::GatewayEvent;
use crate::error::{BridgeError, Result};
use crate::ids::Snowflake;
use crate::roomy::client::SpaceClient;
use crate::roomy::ws::WsSpaceClient;
use crate::store::Store;
use crate::sync::profile::ProfileResolver;

pub struct Orchestrator {
    store: Arc<dyn Store>,
    api: Arc<dyn DiscordApi>,
    resolver: Arc<dyn ProfileResolver>,
    roomy_base: String,
    bridges: RwLock<HashMap<Snowflake, Arc<Bridge>>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        api: Arc<dyn DiscordApi>,
        resolver: Arc<dyn ProfileResolver>,
        roomy_base: String,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            api,
            resolver,
            roomy_base,
            bridges: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Register a pairing against the configured Roomy endpoint.
    pub async fn register_pairing(&self, guild: Snowflake, space: &str) -> Result<Arc<Bridge>> {
        let client = Arc::new(WsSpaceClient::new(&self.roomy_base, space));
        self.register_with(guild, space, client).await
    }

    /// Register a pairing with an explicit space client (tests inject a
    /// fake here). One bridge per guild; re-registering is refused.
    pub async fn register_with(
        &self,
        guild: Snowflake,
        space: &str,
        client: Arc<dyn SpaceClient>,
    ) -> Result<Arc<Bridge>> {
        {
            let bridges = self.bridges.read().await;
            if bridges.contains_key(&guild) {
                return Err(BridgeError::platform(format!("guild {guild} already paired")));
            }
        }

        let bridge = Bridge::start(
            Arc::clone(&self.store),
            Arc::clone(&self.api),
            client,
            Arc::clone(&self.resolver),
            guild,
            space,
            &self.shutdown,
        )
        .await?;

        self.bridges.write().await.insert(guild, Arc::clone(&bridge));
        tracing::info!(guild = %guild, space = %space, "pairing registered");
        Ok(bridge)
    }

    /// Tear a pairing down and delete its persistent namespace.
    pub async fn unregister_pairing(&self, guild: Snowflake) -> Result<()> {
        let Some(bridge) = self.bridges.write().await.remove(&guild) else {
            return Ok(());
        };
        bridge.disconnect()?;
        tracing::info!(guild = %guild, "pairing unregistered");
        Ok(())
    }

    pub async fn bridge(&self, guild: Snowflake) -> Option<Arc<Bridge>> {
        self.bridges.read().await.get(&guild).cloned()
    }

    /// Route one gateway event to the owning bridge. Never propagates a
    /// failure: one bad event must not block the stream for other guilds.
    pub async fn handle_gateway_event(&self, event: GatewayEvent) {
        if let GatewayEvent::Ready { ref user } = event {
            tracing::info!(bot = %user.id, "gateway ready");
            return;
        }
        let Some(guild) = event.guild_id() else {
            return; // DMs and guild-less frames are not bridged.
        };
        if let Some(bridge) = self.bridge(guild).await {
            bridge.enqueue_gateway(event);
        }
    }

    /// Consume the gateway channel until shutdown.
    pub async fn run(&self, mut gateway_rx: mpsc::UnboundedReceiver<GatewayEvent>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                event = gateway_rx.recv() => {
                    let Some(event) = event else { return };
                    self.handle_gateway_event(event).await;
                }
            }
        }
    }
}
