// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-pairing synchronization engine.
//!
//! One `Bridge` owns everything for a single (guild, space) pairing: the
//! mapping repository, the two queues, the four services, and the phase
//! cell. Four tasks run for its lifetime:
//!
//! - the stream task replays and then follows the space stream, absorbing
//!   bridge-origin events and queueing native ones on `toX`;
//! - the `toR` consumer appends emitted events to the space (batched
//!   during the Discord backfill, immediately while listening);
//! - the `toX` consumer waits for `syncRToX`, replays queued events
//!   against Discord, and flips the bridge to `listening` at the sentinel;
//! - the gateway consumer waits for `listening` and then applies queued
//!   Discord events; anything that arrived earlier is deduplicated by the
//!   idempotent service paths.
//!
//! A failure on one event never takes the bridge down: errors are mapped
//! to their handling policy here, and the stream cursor only advances past
//! a batch once every event in it was routed.

use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::discord::api::DiscordApi;
use crate::discord::emoji;
use crate::discord::gateway::{GatewayEvent, ReactionEvent};
use crate::discord::model::{Channel, MessageReaction};
use crate::dispatch::{run_to_r_consumer, EventDispatcher, ToXItem};
use crate::error::{BridgeError, Result};
use crate::ids::Snowflake;
use crate::phase::{Phase, PhaseCell};
use crate::roomy::client::{EventBatch, SpaceClient, StreamMessage};
use crate::roomy::events::Event;
use crate::store::{MappingRepository, Store};
use crate::sync::message::MessageSyncService;
use crate::sync::profile::{ProfileResolver, ProfileSyncService};
use crate::sync::reaction::ReactionSyncService;
use crate::sync::structure::StructureSyncService;
use crate::sync::{Disposition, MessageIndex, SyncService};

pub struct Bridge {
    guild: Snowflake,
    space: String,
    repo: Arc<MappingRepository>,
    api: Arc<dyn DiscordApi>,
    space_client: Arc<dyn SpaceClient>,
    phase: Arc<PhaseCell>,
    dispatcher: EventDispatcher,
    structure: Arc<StructureSyncService>,
    message: Arc<MessageSyncService>,
    reaction: Arc<ReactionSyncService>,
    /// Routing order is fixed: profile, structure, message, reaction.
    services: Vec<Arc<dyn SyncService>>,
    gateway_tx: mpsc::UnboundedSender<GatewayEvent>,
    cancel: CancellationToken,
    /// Batch index captured when `doneBackfilling` fired; the `toX`
    /// sentinel carrying it ends the replay phase.
    last_batch: OnceLock<u64>,
}

impl Bridge {
    /// Build a bridge and spawn its tasks. Returns once the bot identity
    /// is known; the reconciliation phases proceed in the background.
    pub async fn start(
        store: Arc<dyn Store>,
        api: Arc<dyn DiscordApi>,
        space_client: Arc<dyn SpaceClient>,
        resolver: Arc<dyn ProfileResolver>,
        guild: Snowflake,
        space: &str,
        shutdown: &CancellationToken,
    ) -> Result<Arc<Self>> {
        let bot = api.current_user().await?;
        let repo = Arc::new(MappingRepository::new(store, guild, space));
        let (dispatcher, queues) = EventDispatcher::new();
        let phase = Arc::new(PhaseCell::new());
        let index = Arc::new(MessageIndex::default());

        let profile = Arc::new(ProfileSyncService::new(
            Arc::clone(&repo),
            dispatcher.clone(),
            guild,
            resolver,
        ));
        let structure = Arc::new(StructureSyncService::new(
            Arc::clone(&repo),
            Arc::clone(&api),
            dispatcher.clone(),
            guild,
        ));
        let message = Arc::new(MessageSyncService::new(
            Arc::clone(&repo),
            Arc::clone(&api),
            dispatcher.clone(),
            guild,
            bot.id,
            Arc::clone(&profile),
            Arc::clone(&index),
        ));
        let reaction = Arc::new(ReactionSyncService::new(
            Arc::clone(&repo),
            Arc::clone(&api),
            dispatcher.clone(),
            guild,
            bot.id,
            index,
        ));

        let services: Vec<Arc<dyn SyncService>> = vec![
            Arc::clone(&profile) as Arc<dyn SyncService>,
            Arc::clone(&structure) as Arc<dyn SyncService>,
            Arc::clone(&message) as Arc<dyn SyncService>,
            Arc::clone(&reaction) as Arc<dyn SyncService>,
        ];

        let (gateway_tx, gateway_rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(Self {
            guild,
            space: space.to_owned(),
            repo,
            api,
            space_client,
            phase: Arc::clone(&phase),
            dispatcher,
            structure,
            message,
            reaction,
            services,
            gateway_tx,
            cancel: shutdown.child_token(),
            last_batch: OnceLock::new(),
        });

        tokio::spawn(run_to_r_consumer(
            queues.to_r,
            phase,
            Arc::clone(&bridge.space_client),
            bridge.cancel.clone(),
        ));
        tokio::spawn(Arc::clone(&bridge).run_to_x_consumer(queues.to_x));
        tokio::spawn(Arc::clone(&bridge).run_gateway_consumer(gateway_rx));
        tokio::spawn(Arc::clone(&bridge).run_backfill_x());
        tokio::spawn(Arc::clone(&bridge).run_stream());

        Ok(bridge)
    }

    pub fn guild(&self) -> Snowflake {
        self.guild
    }

    pub fn space(&self) -> &str {
        &self.space
    }

    pub fn phase(&self) -> Phase {
        self.phase.current()
    }

    /// Resolve once the bridge has reached `target`.
    pub async fn await_phase(&self, target: Phase) {
        self.phase.reached(target).await;
    }

    /// Hand a Discord gateway event to this bridge. Events queue until the
    /// bridge is listening.
    pub fn enqueue_gateway(&self, event: GatewayEvent) {
        if self.gateway_tx.send(event).is_err() {
            tracing::error!(guild = %self.guild, "gateway queue closed, dropping event");
        }
    }

    /// Stop the bridge's tasks, leaving its data intact.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Stop the bridge and drop the pairing's entire namespace.
    pub fn disconnect(&self) -> Result<()> {
        self.cancel.cancel();
        self.repo.delete()
    }

    // -- Stream side ----------------------------------------------------------

    async fn run_stream(self: Arc<Self>) {
        // A missing cursor means a fresh (or wiped) database; rebuild room
        // mappings from topic markers before replaying anything.
        match self.repo.cursor(&self.space) {
            Ok(None) => {
                if let Err(e) = self.structure.recover_mappings().await {
                    tracing::warn!(guild = %self.guild, err = %e, "mapping recovery failed");
                }
            }
            Ok(Some(_)) => {}
            Err(e) => {
                tracing::error!(guild = %self.guild, err = %e, "cannot read cursor");
                return;
            }
        }

        let cursor = self.repo.cursor(&self.space).unwrap_or(None);
        let mut stream = match self
            .space_client
            .subscribe(cursor, self.cancel.child_token())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(guild = %self.guild, err = %e, "space subscription failed");
                return;
            }
        };

        let mut latest_batch = cursor.unwrap_or(0);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                msg = stream.recv() => {
                    let Some(msg) = msg else {
                        tracing::warn!(guild = %self.guild, "space stream closed");
                        return;
                    };
                    match msg {
                        StreamMessage::Batch(batch) => {
                            latest_batch = batch.index;
                            if let Err(e) = self.handle_batch(batch).await {
                                // Storage trouble: stop before the cursor
                                // moves; a restart replays this batch.
                                tracing::error!(guild = %self.guild, err = %e, "batch aborted");
                            }
                        }
                        StreamMessage::DoneBackfilling => self.finish_backfill_r(latest_batch),
                    }
                }
            }
        }
    }

    /// Classify one stream batch: bridge-origin events are absorbed in
    /// place, native events queue for Discord replay. The cursor advances
    /// here only when nothing was queued; otherwise the `toX` consumer
    /// advances it after the batch's last event is applied.
    async fn handle_batch(&self, batch: EventBatch) -> Result<()> {
        let index = batch.index;
        let total = batch.events.len();
        let mut queued = false;

        for (position, event) in batch.events.into_iter().enumerate() {
            let is_last = position + 1 == total;
            if event.is_bridge_origin(self.guild) {
                self.route_services(&event, Disposition::Absorb).await?;
            } else {
                self.dispatcher.send_to_x(ToXItem { batch: index, is_last, event: Some(event) });
                queued = true;
            }
        }

        if !queued {
            self.repo.set_cursor(&self.space, index)?;
        }
        Ok(())
    }

    /// `doneBackfilling`: capture the sentinel batch id, queue the
    /// sentinel, and move on to enumerating Discord.
    fn finish_backfill_r(&self, latest_batch: u64) {
        if self.phase.current() != Phase::BackfillR {
            return; // Reconnect after a finished backfill re-announces.
        }
        let _ = self.last_batch.set(latest_batch);
        self.dispatcher.send_to_x(ToXItem { batch: latest_batch, is_last: true, event: None });
        self.phase.advance(Phase::BackfillXAndSyncToR);
    }

    /// Route one stream event through the services, first-handled-wins.
    /// Only storage errors propagate; everything else is a per-event
    /// policy handled right here.
    async fn route_services(&self, event: &Event, disposition: Disposition) -> Result<()> {
        for service in &self.services {
            match service.apply_stream_event(event, disposition).await {
                Ok(true) => return Ok(()),
                Ok(false) => continue,
                Err(err @ BridgeError::Storage(_)) => return Err(err),
                Err(err) => {
                    self.log_skipped(&err);
                    return Ok(());
                }
            }
        }
        tracing::debug!(guild = %self.guild, id = %event.id, "stream event not claimed by any service");
        Ok(())
    }

    fn log_skipped(&self, err: &BridgeError) {
        if err.is_silent_skip() {
            tracing::debug!(guild = %self.guild, kind = err.kind(), "event skipped");
        } else if matches!(err, BridgeError::MappingMissing(_) | BridgeError::Permission(_)) {
            tracing::warn!(guild = %self.guild, err = %err, "event skipped");
        } else {
            tracing::error!(guild = %self.guild, err = %err, "event failed");
        }
    }

    // -- toX consumer ---------------------------------------------------------

    async fn run_to_x_consumer(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<ToXItem>) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = self.phase.reached(Phase::SyncRToX) => {}
        }

        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => return,
                item = rx.recv() => {
                    let Some(item) = item else { return };
                    item
                }
            };
            match item.event {
                Some(ref event) => {
                    if let Err(e) = self.route_services(event, Disposition::SyncToX).await {
                        tracing::error!(guild = %self.guild, err = %e, "replay aborted for event");
                        continue; // Cursor stays behind; restart retries.
                    }
                    if item.is_last {
                        if let Err(e) = self.repo.set_cursor(&self.space, item.batch) {
                            tracing::error!(guild = %self.guild, err = %e, "cursor write failed");
                        }
                    }
                }
                None => {
                    if item.is_last && self.last_batch.get() == Some(&item.batch) {
                        self.phase.advance(Phase::Listening);
                    }
                }
            }
        }
    }

    // -- Discord backfill -----------------------------------------------------

    async fn run_backfill_x(self: Arc<Self>) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = self.phase.reached(Phase::BackfillXAndSyncToR) => {}
        }
        if let Err(e) = self.backfill_x().await {
            tracing::error!(guild = %self.guild, err = %e, "discord backfill failed");
        }
        // Everything emitted so far goes out before replay starts.
        self.dispatcher.flush_to_r().await;
        self.phase.advance(Phase::SyncRToX);
    }

    /// Enumerate Discord state in fixed order: structure, then messages
    /// oldest-first, then reactions.
    async fn backfill_x(&self) -> Result<()> {
        let channels = self.api.guild_channels(self.guild).await?;

        for channel in channels.iter().filter(|c| c.kind.is_synced_channel()) {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            if let Err(e) = self.structure.sync_channel_to_r(channel).await {
                self.log_skipped(&e);
            }
        }

        let threads = match self.api.active_threads(self.guild).await {
            Ok(threads) => threads,
            Err(BridgeError::Permission(msg)) => {
                tracing::warn!(guild = %self.guild, %msg, "thread list inaccessible");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        for thread in threads.iter().filter(|c| c.kind.is_thread()) {
            if let Err(e) = self.structure.sync_thread_to_r(thread).await {
                self.log_skipped(&e);
            }
        }

        self.structure.reconcile_sidebar(&channels).await?;

        let mut message_sources: Vec<&Channel> = channels
            .iter()
            .filter(|c| c.kind.is_synced_channel())
            .collect();
        message_sources.extend(threads.iter().filter(|c| c.kind.is_thread()));

        let mut reacted: Vec<(Snowflake, Snowflake, Vec<MessageReaction>)> = Vec::new();
        for channel in &message_sources {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            match self.message.reconcile_channel(channel.id).await {
                Ok(with_reactions) => {
                    reacted.extend(
                        with_reactions.into_iter().map(|(id, r)| (channel.id, id, r)),
                    );
                }
                Err(e) => self.log_skipped(&e),
            }
        }

        for (channel, message_id, reactions) in reacted {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            for entry in reactions {
                let emoji_name = emoji::from_reaction(&entry.emoji);
                let users = match self.api.reaction_users(channel, message_id, &emoji_name).await {
                    Ok(users) => users,
                    Err(e) => {
                        self.log_skipped(&e);
                        continue;
                    }
                };
                for user in users {
                    let result = self
                        .reaction
                        .sync_x_add(&ReactionEvent {
                            user_id: user.id,
                            channel_id: channel,
                            message_id,
                            guild_id: Some(self.guild),
                            emoji: entry.emoji.clone(),
                        })
                        .await;
                    if let Err(e) = result {
                        self.log_skipped(&e);
                    }
                }
            }
        }

        Ok(())
    }

    // -- Gateway side ---------------------------------------------------------

    async fn run_gateway_consumer(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<GatewayEvent>) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = self.phase.reached(Phase::Listening) => {}
        }

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return,
                event = rx.recv() => {
                    let Some(event) = event else { return };
                    event
                }
            };
            if let Err(e) = self.apply_gateway_event(event).await {
                self.log_skipped(&e);
            }
        }
    }

    async fn apply_gateway_event(&self, event: GatewayEvent) -> Result<()> {
        match event {
            GatewayEvent::ChannelCreate(ref channel) if channel.kind.is_synced_channel() => {
                self.structure.sync_channel_to_r(channel).await?;
                self.refresh_sidebar().await
            }
            GatewayEvent::ChannelUpdate(_) => self.refresh_sidebar().await,
            GatewayEvent::ChannelDelete(ref channel) => {
                self.structure.sync_channel_delete(channel).await?;
                self.refresh_sidebar().await
            }
            GatewayEvent::ThreadCreate(ref thread) if thread.kind.is_thread() => {
                self.structure.sync_thread_to_r(thread).await.map(|_| ())
            }
            GatewayEvent::MessageCreate(ref msg) => {
                self.message.sync_x_message(msg).await.map(|_| ())
            }
            GatewayEvent::MessageUpdate(ref update) => self.message.sync_x_edit(update).await,
            GatewayEvent::MessageDelete(ref delete) => self.message.sync_x_delete(delete).await,
            GatewayEvent::ReactionAdd(ref reaction) => self.reaction.sync_x_add(reaction).await,
            GatewayEvent::ReactionRemove(ref reaction) => {
                self.reaction.sync_x_remove(reaction).await
            }
            // Voice channels, unsupported thread kinds, ready frames.
            _ => Ok(()),
        }
    }

    /// Structural gateway events re-derive the sidebar; the hash gate
    /// swallows no-op refreshes.
    async fn refresh_sidebar(&self) -> Result<()> {
        let channels = self.api.guild_channels(self.guild).await?;
        self.structure.reconcile_sidebar(&channels).await
    }
}
