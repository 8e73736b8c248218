// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory Discord fake shared by the service unit tests. Serves guild
//! state from mutable maps and records every mutating call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::discord::api::{CreateChannel, DiscordApi, EditChannel, ExecuteWebhook};
use crate::discord::model::{Channel, ChannelKind, Message, User, Webhook};
use crate::error::{BridgeError, Result};
use crate::ids::Snowflake;

pub fn bot_user() -> User {
    User {
        id: Snowflake(999),
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
        guild_id: Some(Snowflake(1)),
        name: Some(name.to_owned()),
        topic: None,
        parent_id: None,
    }
}

pub fn message(id: u64, channel: u64, author: User, content: &str) -> Message {
    Message {
        id: Snowflake(id),
        channel_id: Snowflake(channel),
        guild_id: Some(Snowflake(1)),
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
    pub token: String,
    pub params: ExecuteWebhook,
}

#[derive(Default)]
pub struct FakeDiscord {
    pub channels: Mutex<HashMap<Snowflake, Channel>>,
    /// Per-channel message history, oldest first.
    pub messages: Mutex<HashMap<Snowflake, Vec<Message>>>,
    pub threads: Mutex<Vec<Channel>>,
    /// Users who reacted, keyed by `(channel, message, emoji)`.
    pub reaction_rosters: Mutex<HashMap<(Snowflake, Snowflake, String), Vec<User>>>,
    pub created_channels: Mutex<Vec<Channel>>,
    pub edited_channels: Mutex<Vec<(Snowflake, EditChannel)>>,
    pub created_threads: Mutex<Vec<(Snowflake, String)>>,
    pub created_webhooks: Mutex<Vec<Snowflake>>,
    pub executed_webhooks: Mutex<Vec<ExecutedWebhook>>,
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

    pub fn with_channels(channels: &[Channel]) -> Self {
        let fake = Self::new();
        {
            let mut map = fake.channels.lock();
            for channel in channels {
                map.insert(channel.id, channel.clone());
            }
        }
        fake
    }

    pub fn add_messages(&self, channel: u64, messages: Vec<Message>) {
        self.messages.lock().entry(Snowflake(channel)).or_default().extend(messages);
    }

    fn mint_id(&self) -> Snowflake {
        Snowflake(self.next_id.fetch_add(1, Ordering::SeqCst))
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
        if let Some(ref name) = params.name {
            entry.name = Some(name.clone());
        }
        if let Some(ref topic) = params.topic {
            entry.topic = Some(topic.clone());
        }
        let updated = entry.clone();
        drop(channels);
        self.edited_channels.lock().push((channel, params));
        Ok(updated)
    }

    async fn create_thread(&self, channel: Snowflake, name: String) -> Result<Channel> {
        let thread = Channel {
            id: self.mint_id(),
            kind: ChannelKind::PublicThread,
            guild_id: Some(Snowflake(1)),
            name: Some(name.clone()),
            topic: None,
            parent_id: Some(channel),
        };
        self.channels.lock().insert(thread.id, thread.clone());
        self.threads.lock().push(thread.clone());
        self.created_threads.lock().push((channel, name));
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
        self.created_webhooks.lock().push(channel);
        let id = self.mint_id();
        Ok(Webhook { id, token: Some(format!("token-{id}")) })
    }

    async fn execute_webhook(
        &self,
        webhook: Snowflake,
        token: &str,
        params: ExecuteWebhook,
    ) -> Result<Message> {
        let id = self.mint_id();
        self.executed_webhooks.lock().push(ExecutedWebhook {
            webhook,
            token: token.to_owned(),
            params: params.clone(),
        });
        let mut message = message(id.0, 0, bot_user(), &params.content);
        message.webhook_id = Some(webhook);
        message.nonce = params.nonce;
        Ok(message)
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
