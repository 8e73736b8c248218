// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Support harness for the end-to-end bridge scenarios: an in-memory
//! Discord fake, a hand-driven space stream, and a helper that brings one
//! pairing all the way to the listening phase.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use roomybridge::bridge::Bridge;
use roomybridge::discord::api::{CreateChannel, DiscordApi, EditChannel, ExecuteWebhook};
use roomybridge::discord::model::{Channel, ChannelKind, Message, User, Webhook};
use roomybridge::error::{BridgeError, Result};
use roomybridge::ids::Snowflake;
use roomybridge::orchestrator::Orchestrator;
use roomybridge::phase::Phase;
use roomybridge::roomy::client::{EventBatch, SpaceClient, StreamMessage};
use roomybridge::roomy::events::Event;
use roomybridge::store::{MappingRepository, MemoryStore, RoomyProfile, Store};
use roomybridge::sync::profile::ProfileResolver;

pub const GUILD: Snowflake = Snowflake(1);
pub const SPACE: &str = "did:plc:space";
pub const BOT_ID: Snowflake = Snowflake(999);

// -- Discord fake -------------------------------------------------------------

pub fn bot_user() -> User {
    User {
        id: BOT_ID,
        username: "bridge-bot".to_owned(),
        global_name: None,
        avatar: None,
        bot: true,
    }
}

pub fn human(id: u64, name: &str) -> User {
    User { id: Snowflake(id), username: name.to_owned(), global_name: None, avatar: None, bot: false }
}

pub fn text_channel(id: u64, name: &str) -> Channel {
    Channel {
        id: Snowflake(id),
        kind: ChannelKind::Text,
        guild_id: Some(GUILD),
        name: Some(name.to_owned()),
        topic: None,
        parent_id: None,
    }
}

pub fn message(id: u64, channel: u64, author: User, content: &str) -> Message {
    Message {
        id: Snowflake(id),
        channel_id: Snowflake(channel),
        guild_id: Some(GUILD),
        author,
        content: content.to_owned(),
        kind: 0,
        timestamp: None,
        edited_timestamp: None,
        attachments: Vec::new(),
        message_reference: None,
        webhook_id: None,
        nonce: None,
        reactions: Vec::new(),
    }
}

#[derive(Debug, Clone)]
pub struct ExecutedWebhook {
    pub webhook: Snowflake,
    pub channel: Snowflake,
    pub message_id: Snowflake,
    pub params: ExecuteWebhook,
}

#[derive(Default)]
pub struct FakeDiscord {
    pub channels: Mutex<HashMap<Snowflake, Channel>>,
    pub messages: Mutex<HashMap<Snowflake, Vec<Message>>>,
    pub threads: Mutex<Vec<Channel>>,
    pub reaction_rosters: Mutex<HashMap<(Snowflake, Snowflake, String), Vec<User>>>,
    /// Channel each bridge webhook was created on.
    pub webhooks: Mutex<HashMap<Snowflake, Snowflake>>,
    pub created_channels: Mutex<Vec<Channel>>,
    pub executed: Mutex<Vec<ExecutedWebhook>>,
    pub edited_webhook_messages: Mutex<Vec<(Snowflake, Snowflake, String)>>,
    pub deleted_webhook_messages: Mutex<Vec<(Snowflake, Snowflake)>>,
    pub reactions_added: Mutex<Vec<(Snowflake, Snowflake, String)>>,
    pub reactions_removed: Mutex<Vec<(Snowflake, Snowflake, String)>>,
    next_id: AtomicU64,
}

impl FakeDiscord {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(10_000), ..Self::default() }
    }

    pub fn seed_channel(&self, channel: Channel) {
        self.channels.lock().insert(channel.id, channel);
    }

    pub fn seed_messages(&self, channel: u64, messages: Vec<Message>) {
        self.messages.lock().entry(Snowflake(channel)).or_default().extend(messages);
    }

    fn mint_id(&self) -> Snowflake {
        Snowflake(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Number of webhook executions so far.
    pub fn executed_count(&self) -> usize {
        self.executed.lock().len()
    }
}

#[async_trait]
impl DiscordApi for FakeDiscord {
    async fn current_user(&self) -> Result<User> {
        Ok(bot_user())
    }

    async fn guild_channels(&self, _guild: Snowflake) -> Result<Vec<Channel>> {
        let mut channels: Vec<Channel> = self.channels.lock().values().cloned().collect();
        channels.sort_by_key(|c| c.id);
        Ok(channels)
    }

    async fn channel(&self, channel: Snowflake) -> Result<Channel> {
        self.channels
            .lock()
            .get(&channel)
            .cloned()
            .ok_or_else(|| BridgeError::platform(format!("no channel {channel}")))
    }

    async fn create_channel(&self, guild: Snowflake, params: CreateChannel) -> Result<Channel> {
        let channel = Channel {
            id: self.mint_id(),
            kind: params.kind,
            guild_id: Some(guild),
            name: Some(params.name),
            topic: params.topic,
            parent_id: params.parent_id,
        };
        self.channels.lock().insert(channel.id, channel.clone());
        self.created_channels.lock().push(channel.clone());
        Ok(channel)
    }

    async fn edit_channel(&self, channel: Snowflake, params: EditChannel) -> Result<Channel> {
        let mut channels = self.channels.lock();
        let entry = channels
            .get_mut(&channel)
            .ok_or_else(|| BridgeError::platform(format!("no channel {channel}")))?;
        if let Some(name) = params.name {
            entry.name = Some(name);
        }
        if let Some(topic) = params.topic {
            entry.topic = Some(topic);
        }
        Ok(entry.clone())
    }

    async fn create_thread(&self, channel: Snowflake, name: String) -> Result<Channel> {
        let thread = Channel {
            id: self.mint_id(),
            kind: ChannelKind::PublicThread,
            guild_id: Some(GUILD),
            name: Some(name),
            topic: None,
            parent_id: Some(channel),
        };
        self.channels.lock().insert(thread.id, thread.clone());
        self.threads.lock().push(thread.clone());
        Ok(thread)
    }

    async fn active_threads(&self, _guild: Snowflake) -> Result<Vec<Channel>> {
        Ok(self.threads.lock().clone())
    }

    async fn messages_after(
        &self,
        channel: Snowflake,
        after: Option<Snowflake>,
        limit: u8,
    ) -> Result<Vec<Message>> {
        let messages = self.messages.lock();
        let history = messages.get(&channel).cloned().unwrap_or_default();
        Ok(history
            .into_iter()
            .filter(|m| after.is_none_or(|a| m.id > a))
            .take(limit as usize)
            .collect())
    }

    async fn message(&self, channel: Snowflake, message: Snowflake) -> Result<Message> {
        self.messages
            .lock()
            .get(&channel)
            .and_then(|history| history.iter().find(|m| m.id == message).cloned())
            .ok_or_else(|| BridgeError::platform(format!("no message {message}")))
    }

    async fn reaction_users(
        &self,
        channel: Snowflake,
        message: Snowflake,
        emoji: &str,
    ) -> Result<Vec<User>> {
        Ok(self
            .reaction_rosters
            .lock()
            .get(&(channel, message, emoji.to_owned()))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_reaction(
        &self,
        channel: Snowflake,
        message: Snowflake,
        emoji: &str,
    ) -> Result<()> {
        self.reactions_added.lock().push((channel, message, emoji.to_owned()));
        Ok(())
    }

    async fn delete_own_reaction(
        &self,
        channel: Snowflake,
        message: Snowflake,
        emoji: &str,
    ) -> Result<()> {
        self.reactions_removed.lock().push((channel, message, emoji.to_owned()));
        Ok(())
    }

    async fn create_webhook(&self, channel: Snowflake, _name: &str) -> Result<Webhook> {
        let id = self.mint_id();
        self.webhooks.lock().insert(id, channel);
        Ok(Webhook { id, token: Some(format!("token-{id}")) })
    }

    async fn execute_webhook(
        &self,
        webhook: Snowflake,
        _token: &str,
        params: ExecuteWebhook,
    ) -> Result<Message> {
        let channel = self
            .webhooks
            .lock()
            .get(&webhook)
            .copied()
            .ok_or_else(|| BridgeError::platform(format!("no webhook {webhook}")))?;
        let target = params.thread_id.unwrap_or(channel);
        let id = self.mint_id();

        let mut posted = message(id.0, target.0, bot_user(), &params.content);
        posted.webhook_id = Some(webhook);
        posted.nonce = params.nonce.clone();
        self.messages.lock().entry(target).or_default().push(posted.clone());
        self.executed.lock().push(ExecutedWebhook {
            webhook,
            channel: target,
            message_id: id,
            params,
        });
        Ok(posted)
    }

    async fn edit_webhook_message(
        &self,
        webhook: Snowflake,
        _token: &str,
        message_id: Snowflake,
        content: String,
    ) -> Result<Message> {
        self.edited_webhook_messages.lock().push((webhook, message_id, content.clone()));
        Ok(message(message_id.0, 0, bot_user(), &content))
    }

    async fn delete_webhook_message(
        &self,
        webhook: Snowflake,
        _token: &str,
        message_id: Snowflake,
    ) -> Result<()> {
        self.deleted_webhook_messages.lock().push((webhook, message_id));
        Ok(())
    }
}

// -- Space fake ---------------------------------------------------------------

/// Hand-driven space stream: tests push batches and the backfill-done
/// marker; appended events are recorded for assertions.
#[derive(Default)]
pub struct FakeSpace {
    pub appended: Mutex<Vec<Event>>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<StreamMessage>>>,
    pending: Mutex<Vec<StreamMessage>>,
}

impl FakeSpace {
    pub fn new() -> Self {
        Self::default()
    }

    fn deliver(&self, message: StreamMessage) {
        let subscriber = self.subscriber.lock();
        match subscriber.as_ref() {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => self.pending.lock().push(message),
        }
    }

    pub fn push_batch(&self, index: u64, events: Vec<Event>) {
        self.deliver(StreamMessage::Batch(EventBatch { index, events }));
    }

    pub fn done_backfilling(&self) {
        self.deliver(StreamMessage::DoneBackfilling);
    }

    /// Events appended by the bridge with the given wire kind.
    pub fn appended_of_kind(&self, kind: &str) -> Vec<Event> {
        self.appended
            .lock()
            .iter()
            .filter(|e| {
                serde_json::to_value(e).ok().and_then(|v| {
                    v.get("kind").and_then(|k| k.as_str()).map(|k| k == kind)
                }) == Some(true)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SpaceClient for FakeSpace {
    async fn append(&self, events: &[Event]) -> Result<()> {
        self.appended.lock().extend(events.iter().cloned());
        Ok(())
    }

    async fn subscribe(
        &self,
        _cursor: Option<u64>,
        _cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        for queued in self.pending.lock().drain(..) {
            let _ = tx.send(queued);
        }
        *self.subscriber.lock() = Some(tx);
        Ok(rx)
    }
}

// -- Resolver fake ------------------------------------------------------------

pub struct NoResolver;

#[async_trait]
impl ProfileResolver for NoResolver {
    async fn resolve(
        &self,
        _did: &roomybridge::ids::UserDid,
    ) -> Result<Option<RoomyProfile>> {
        Ok(None)
    }
}

// -- Harness ------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub bridge: Arc<Bridge>,
    pub discord: Arc<FakeDiscord>,
    pub space: Arc<FakeSpace>,
    pub store: Arc<MemoryStore>,
    pub shutdown: CancellationToken,
}

impl Harness {
    /// A repository view over the bridge's namespace, for assertions.
    pub fn repo(&self) -> MappingRepository {
        MappingRepository::new(self.store.clone() as Arc<dyn Store>, GUILD, SPACE)
    }
}

/// Start a pairing and drive it through an empty replay to `listening`.
pub async fn listening_harness(discord: Arc<FakeDiscord>) -> anyhow::Result<Harness> {
    let harness = registered_harness(discord).await?;
    harness.space.done_backfilling();
    await_phase(&harness.bridge, Phase::Listening).await?;
    Ok(harness)
}

/// Start a pairing but leave the replay under test control.
pub async fn registered_harness(discord: Arc<FakeDiscord>) -> anyhow::Result<Harness> {
    let store = Arc::new(MemoryStore::new());
    let space = Arc::new(FakeSpace::new());
    let shutdown = CancellationToken::new();
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone() as Arc<dyn Store>,
        discord.clone() as Arc<dyn DiscordApi>,
        Arc::new(NoResolver),
        String::new(),
        shutdown.clone(),
    ));
    let bridge = orchestrator
        .register_with(GUILD, SPACE, space.clone() as Arc<dyn SpaceClient>)
        .await?;
    Ok(Harness { orchestrator, bridge, discord, space, store, shutdown })
}

pub async fn await_phase(bridge: &Bridge, phase: Phase) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), bridge.await_phase(phase))
        .await
        .map_err(|_| anyhow::anyhow!("bridge never reached {phase}"))
}

/// Poll until `check` passes or two seconds elapse.
pub async fn eventually(check: impl Fn() -> bool) -> anyhow::Result<()> {
    for _ in 0..200 {
        if check() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("condition not reached in time")
}

/// Give in-flight queue consumers a moment to settle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
