// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discord wire types, limited to the fields the bridge reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::Snowflake;

/// Discord's epoch (first second of 2015) in unix milliseconds.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Creation time encoded in a snowflake, as unix milliseconds.
pub fn snowflake_timestamp_ms(id: Snowflake) -> i64 {
    ((id.0 >> 22) as i64) + DISCORD_EPOCH_MS
}

// -- Channels -----------------------------------------------------------------

/// Channel type codes, as Discord numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    Announcement,
    AnnouncementThread,
    PublicThread,
    PrivateThread,
    StageVoice,
    Forum,
    Media,
    Other(u8),
}

impl From<u8> for ChannelKind {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Text,
            2 => Self::Voice,
            4 => Self::Category,
            5 => Self::Announcement,
            10 => Self::AnnouncementThread,
            11 => Self::PublicThread,
            12 => Self::PrivateThread,
            13 => Self::StageVoice,
            15 => Self::Forum,
            16 => Self::Media,
            other => Self::Other(other),
        }
    }
}

impl From<ChannelKind> for u8 {
    fn from(kind: ChannelKind) -> u8 {
        match kind {
            ChannelKind::Text => 0,
            ChannelKind::Voice => 2,
            ChannelKind::Category => 4,
            ChannelKind::Announcement => 5,
            ChannelKind::AnnouncementThread => 10,
            ChannelKind::PublicThread => 11,
            ChannelKind::PrivateThread => 12,
            ChannelKind::StageVoice => 13,
            ChannelKind::Forum => 15,
            ChannelKind::Media => 16,
            ChannelKind::Other(code) => code,
        }
    }
}

impl ChannelKind {
    /// Message-bearing channels the bridge mirrors as rooms. Voice and
    /// media-heavy kinds are out of scope.
    pub fn is_synced_channel(&self) -> bool {
        matches!(self, Self::Text | Self::Announcement)
    }

    pub fn is_thread(&self) -> bool {
        matches!(self, Self::AnnouncementThread | Self::PublicThread)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Snowflake>,
}

// -- Users --------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl User {
    /// CDN URL of the user's avatar, if set.
    pub fn avatar_url(&self) -> Option<String> {
        self.avatar
            .as_ref()
            .map(|hash| format!("https://cdn.discordapp.com/avatars/{}/{hash}.png", self.id))
    }

    /// Display name shown in chat: global name when set, else username.
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

// -- Messages -----------------------------------------------------------------

/// Message type codes the bridge cares about.
pub mod message_type {
    pub const DEFAULT: u8 = 0;
    pub const CHANNEL_NAME_CHANGE: u8 = 4;
    pub const THREAD_CREATED: u8 = 18;
    pub const REPLY: u8 = 19;
    pub const THREAD_STARTER_MESSAGE: u8 = 21;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttachment {
    pub id: Snowflake,
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReference {
    #[serde(default)]
    pub message_id: Option<Snowflake>,
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<MessageAttachment>,
    #[serde(default)]
    pub message_reference: Option<MessageReference>,
    #[serde(default)]
    pub webhook_id: Option<Snowflake>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub reactions: Vec<MessageReaction>,
}

impl Message {
    /// Unix-ms creation time: the payload timestamp when present, otherwise
    /// recovered from the snowflake.
    pub fn created_ms(&self) -> i64 {
        self.timestamp.map(|t| t.timestamp_millis()).unwrap_or_else(|| snowflake_timestamp_ms(self.id))
    }

    pub fn attachment_urls(&self) -> Vec<String> {
        self.attachments.iter().map(|a| a.url.clone()).collect()
    }
}

// -- Reactions ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEmoji {
    #[serde(default)]
    pub id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub animated: bool,
}

/// Aggregate reaction entry on a fetched message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReaction {
    pub emoji: ReactionEmoji,
    #[serde(default)]
    pub count: u32,
}

// -- Webhooks -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Snowflake,
    #[serde(default)]
    pub token: Option<String>,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
