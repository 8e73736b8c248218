// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The REST surface the sync services call. Kept behind a trait so tests
//! drive the services against a recording fake.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::discord::model::{Channel, ChannelKind, Message, User, Webhook};
use crate::ids::Snowflake;

/// Parameters for creating a guild channel.
#[derive(Debug, Clone, Serialize)]
pub struct CreateChannel {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Snowflake>,
}

/// Patchable channel fields.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EditChannel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Webhook execution parameters. `wait` is always set so the created
/// message comes back and its id can be mapped.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteWebhook {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Present when posting into a thread owned by the webhook's channel.
    #[serde(skip)]
    pub thread_id: Option<Snowflake>,
}

#[async_trait]
pub trait DiscordApi: Send + Sync {
    /// The bot's own user, used for echo detection.
    async fn current_user(&self) -> Result<User>;

    async fn guild_channels(&self, guild: Snowflake) -> Result<Vec<Channel>>;

    async fn channel(&self, channel: Snowflake) -> Result<Channel>;

    async fn create_channel(&self, guild: Snowflake, params: CreateChannel) -> Result<Channel>;

    async fn edit_channel(&self, channel: Snowflake, params: EditChannel) -> Result<Channel>;

    /// Start a thread (without a starter message) under a text channel.
    async fn create_thread(&self, channel: Snowflake, name: String) -> Result<Channel>;

    /// All active threads in the guild.
    async fn active_threads(&self, guild: Snowflake) -> Result<Vec<Channel>>;

    /// Up to `limit` messages strictly after `after`, oldest first.
    async fn messages_after(
        &self,
        channel: Snowflake,
        after: Option<Snowflake>,
        limit: u8,
    ) -> Result<Vec<Message>>;

    async fn message(&self, channel: Snowflake, message: Snowflake) -> Result<Message>;

    /// Users who reacted with `emoji` (canonical form) on a message.
    async fn reaction_users(
        &self,
        channel: Snowflake,
        message: Snowflake,
        emoji: &str,
    ) -> Result<Vec<User>>;

    /// Add the bot's own reaction.
    async fn create_reaction(&self, channel: Snowflake, message: Snowflake, emoji: &str)
        -> Result<()>;

    /// Remove the bot's own reaction.
    async fn delete_own_reaction(
        &self,
        channel: Snowflake,
        message: Snowflake,
        emoji: &str,
    ) -> Result<()>;

    async fn create_webhook(&self, channel: Snowflake, name: &str) -> Result<Webhook>;

    async fn execute_webhook(
        &self,
        webhook: Snowflake,
        token: &str,
        params: ExecuteWebhook,
    ) -> Result<Message>;

    async fn edit_webhook_message(
        &self,
        webhook: Snowflake,
        token: &str,
        message: Snowflake,
        content: String,
    ) -> Result<Message>;

    async fn delete_webhook_message(
        &self,
        webhook: Snowflake,
        token: &str,
        message: Snowflake,
    ) -> Result<()>;
}
