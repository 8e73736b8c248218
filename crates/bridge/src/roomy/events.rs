// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Roomy event model.
//!
//! Events are content-addressed, ULID-keyed, and carry an open `extensions`
//! bag. The bridge recognizes six extension kinds as origin markers: their
//! presence with a matching guild id means "this event was produced by the
//! bridge and must not be synced back". Extension names are part of the wire
//! protocol and must not change.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ids::{EventUlid, Snowflake, UserDid};

// -- Extension names (wire protocol) ------------------------------------------

pub const EXT_DISCORD_ORIGIN: &str = "space.roomy.extension.discordOrigin.v0";
pub const EXT_DISCORD_MESSAGE_ORIGIN: &str = "space.roomy.extension.discordMessageOrigin.v0";
pub const EXT_DISCORD_USER_ORIGIN: &str = "space.roomy.extension.discordUserOrigin.v0";
pub const EXT_DISCORD_REACTION_ORIGIN: &str = "space.roomy.extension.discordReactionOrigin.v0";
pub const EXT_DISCORD_SIDEBAR_ORIGIN: &str = "space.roomy.extension.discordSidebarOrigin.v0";
pub const EXT_DISCORD_ROOM_LINK_ORIGIN: &str = "space.roomy.extension.discordRoomLinkOrigin.v0";
pub const EXT_AUTHOR_OVERRIDE: &str = "space.roomy.extension.authorOverride.v0";
pub const EXT_TIMESTAMP_OVERRIDE: &str = "space.roomy.extension.timestampOverride.v0";
pub const EXT_ATTACHMENTS: &str = "space.roomy.extension.attachments.v0";

/// The extension names that mark an event as bridge-produced.
const ORIGIN_EXTENSIONS: [&str; 6] = [
    EXT_DISCORD_ORIGIN,
    EXT_DISCORD_MESSAGE_ORIGIN,
    EXT_DISCORD_USER_ORIGIN,
    EXT_DISCORD_REACTION_ORIGIN,
    EXT_DISCORD_SIDEBAR_ORIGIN,
    EXT_DISCORD_ROOM_LINK_ORIGIN,
];

// -- Event --------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventUlid,
    /// Authoring identity as recorded by the stream. Bridge-produced events
    /// carry the bot's identity here and the surrogate in `authorOverride`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<UserDid>,
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Extensions::is_empty")]
    pub extensions: Extensions,
}

impl Event {
    /// A fresh event with a newly minted ULID and no extensions.
    pub fn new(payload: Payload) -> Self {
        Self { id: EventUlid::generate(), author: None, payload, extensions: Extensions::default() }
    }

    pub fn with_extension<T: Serialize>(mut self, name: &str, value: &T) -> Self {
        self.extensions.set(name, value);
        self
    }

    /// True if this event was produced by the bridge for `guild`. Marker
    /// presence alone is not enough: the same space may be bridged to several
    /// guilds, so the guild ids must match.
    pub fn is_bridge_origin(&self, guild: Snowflake) -> bool {
        self.extensions.origin_guild().is_some_and(|g| g == guild)
    }
}

// -- Payloads -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomKind {
    Channel,
    Thread,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarCategory {
    pub id: EventUlid,
    pub name: String,
    pub children: Vec<EventUlid>,
}

/// A message body. `data` is raw bytes, base64 on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Body {
    pub fn markdown(text: &str) -> Self {
        Self { mime_type: "text/markdown".to_owned(), data: text.as_bytes().to_vec() }
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Event payload, discriminated by the `kind` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Payload {
    #[serde(rename = "room.createRoom")]
    CreateRoom { name: String, room_kind: RoomKind },
    #[serde(rename = "room.deleteRoom")]
    DeleteRoom { room: EventUlid },
    #[serde(rename = "room.updateParent")]
    UpdateParent { room: EventUlid, parent: Option<EventUlid> },
    #[serde(rename = "link.createRoomLink")]
    CreateRoomLink { parent: EventUlid, child: EventUlid, is_creation_link: bool },
    #[serde(rename = "space.updateSidebar.v0")]
    UpdateSidebarV0 { categories: Vec<SidebarCategory> },
    #[serde(rename = "space.updateSidebar.v1")]
    UpdateSidebar { categories: Vec<SidebarCategory> },
    #[serde(rename = "message.createMessage")]
    CreateMessage { room: EventUlid, body: Body },
    #[serde(rename = "message.editMessage")]
    EditMessage { message: EventUlid, body: Body },
    #[serde(rename = "message.deleteMessage")]
    DeleteMessage { message: EventUlid },
    #[serde(rename = "message.forwardMessages")]
    ForwardMessages { room: EventUlid, messages: Vec<EventUlid> },
    #[serde(rename = "reaction.addBridgedReaction")]
    AddBridgedReaction { reaction_to: EventUlid, reaction: String, reacting_user: UserDid },
    #[serde(rename = "reaction.removeBridgedReaction")]
    RemoveBridgedReaction { reaction: EventUlid },
    #[serde(rename = "reaction.addReaction")]
    AddReaction { reaction_to: EventUlid, reaction: String },
    #[serde(rename = "reaction.removeReaction")]
    RemoveReaction { reaction_to: EventUlid, reaction: String },
    #[serde(rename = "user.updateProfile")]
    UpdateProfile {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handle: Option<String>,
    },
    /// Any event kind the bridge does not mirror. Decoded rather than
    /// rejected so one exotic event cannot poison a whole batch.
    #[serde(other)]
    Unknown,
}

// -- Extensions ---------------------------------------------------------------

/// Open extension bag: extension name → JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extensions(BTreeMap<String, serde_json::Value>);

impl Extensions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = self.0.get(name)?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn set<T: Serialize>(&mut self, name: &str, value: &T) {
        if let Ok(json) = serde_json::to_value(value) {
            self.0.insert(name.to_owned(), json);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// The guild id of whichever origin marker is present, if any.
    pub fn origin_guild(&self) -> Option<Snowflake> {
        for name in ORIGIN_EXTENSIONS {
            if let Some(value) = self.0.get(name) {
                if let Some(guild) = value.get("guildId") {
                    if let Ok(guild) = serde_json::from_value::<Snowflake>(guild.clone()) {
                        return Some(guild);
                    }
                }
            }
        }
        None
    }
}

// -- Typed extension payloads -------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordOrigin {
    pub snowflake: Snowflake,
    pub guild_id: Snowflake,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordMessageOrigin {
    pub snowflake: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Snowflake,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordUserOrigin {
    pub user_id: Snowflake,
    pub guild_id: Snowflake,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordReactionOrigin {
    pub guild_id: Snowflake,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordSidebarOrigin {
    pub hash: String,
    pub guild_id: Snowflake,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordRoomLinkOrigin {
    pub guild_id: Snowflake,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorOverride {
    pub did: UserDid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampOverride {
    /// Unix milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentsExtension {
    pub attachments: Vec<Attachment>,
}

/// Typed message attachment, discriminated by the attachment kind string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Attachment {
    #[serde(rename = "space.roomy.attachment.reply.v0")]
    Reply { reply_to: EventUlid },
    #[serde(rename = "space.roomy.attachment.image.v0")]
    Image { url: String, name: String, mime_type: String },
    #[serde(rename = "space.roomy.attachment.video.v0")]
    Video { url: String, name: String, mime_type: String },
    #[serde(rename = "space.roomy.attachment.file.v0")]
    File { url: String, name: String, mime_type: String },
}

// -- base64 body bytes --------------------------------------------------------

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
