// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Room and layout topology.
//!
//! Discord→Roomy: channels become rooms, threads become room-plus-link
//! pairs, and the guild's category layout is folded into the space sidebar
//! behind a fingerprint gate. Roomy→Discord: rooms referenced by the
//! sidebar materialize as channels carrying a topic marker, creation links
//! become threads. The topic marker doubles as a recovery channel: if local
//! state is lost, `recover_mappings` rebuilds the room table from it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::discord::api::{CreateChannel, DiscordApi, EditChannel};
use crate::discord::model::{Channel, ChannelKind};
use crate::dispatch::EventDispatcher;
use crate::error::{BridgeError, Result};
use crate::hash;
use crate::ids::{format_topic_marker, parse_room_key, parse_topic_marker, EventUlid, Snowflake};
use crate::roomy::events::{
    DiscordOrigin, DiscordRoomLinkOrigin, DiscordSidebarOrigin, Event, Payload, RoomKind,
    SidebarCategory, EXT_DISCORD_ORIGIN, EXT_DISCORD_ROOM_LINK_ORIGIN, EXT_DISCORD_SIDEBAR_ORIGIN,
};
use crate::store::MappingRepository;
use crate::sync::{Disposition, SyncService};

/// Category that collects Discord channels sitting outside any category.
const FALLBACK_CATEGORY: &str = "general";

#[derive(Debug, Clone)]
struct CachedRoom {
    name: String,
    discord_origin: bool,
}

pub struct StructureSyncService {
    repo: Arc<MappingRepository>,
    api: Arc<dyn DiscordApi>,
    dispatcher: EventDispatcher,
    guild: Snowflake,
    /// Room names and origin flags learned from `createRoom` events.
    rooms: Mutex<HashMap<EventUlid, CachedRoom>>,
    /// Latest sidebar seen on the Roomy side, preserved verbatim during
    /// reconciliation so native rooms are never dropped.
    sidebar: Mutex<Vec<SidebarCategory>>,
}

impl StructureSyncService {
    pub fn new(
        repo: Arc<MappingRepository>,
        api: Arc<dyn DiscordApi>,
        dispatcher: EventDispatcher,
        guild: Snowflake,
    ) -> Self {
        Self {
            repo,
            api,
            dispatcher,
            guild,
            rooms: Mutex::new(HashMap::new()),
            sidebar: Mutex::new(Vec::new()),
        }
    }

    // -- Discord → Roomy ------------------------------------------------------

    /// Ensure a Discord channel has a Roomy room, returning its ULID.
    pub async fn sync_channel_to_r(&self, channel: &Channel) -> Result<EventUlid> {
        let key = channel.id.room_key();
        if let Some(existing) = self.repo.get_r(&key)? {
            return Ok(existing);
        }

        // A topic marker means the room already exists on the Roomy side
        // (it was created by us, mapped on a lost database). Adopt it.
        if let Some(marker) = channel.topic.as_deref().and_then(parse_topic_marker) {
            tracing::info!(channel = %channel.id, room = %marker, "adopted room from topic marker");
            self.repo.register_mapping(&key, &marker)?;
            return Ok(marker);
        }

        let name = channel.name.clone().unwrap_or_else(|| channel.id.to_string());
        let event = Event::new(Payload::CreateRoom { name, room_kind: RoomKind::Channel })
            .with_extension(
                EXT_DISCORD_ORIGIN,
                &DiscordOrigin { snowflake: channel.id, guild_id: self.guild },
            );
        self.repo.register_mapping(&key, &event.id)?;
        let room = event.id.clone();
        self.dispatcher.send_to_r(event);
        Ok(room)
    }

    /// Ensure a Discord thread has a Roomy room linked under its parent.
    pub async fn sync_thread_to_r(&self, thread: &Channel) -> Result<EventUlid> {
        let key = thread.id.room_key();
        if let Some(existing) = self.repo.get_r(&key)? {
            return Ok(existing);
        }

        let parent = thread
            .parent_id
            .ok_or_else(|| BridgeError::MappingMissing(format!("thread {} has no parent", thread.id)))?;
        let parent_room = self
            .repo
            .get_r(&parent.room_key())?
            .ok_or_else(|| BridgeError::MappingMissing(parent.room_key()))?;

        let name = thread.name.clone().unwrap_or_else(|| thread.id.to_string());
        let room_event = Event::new(Payload::CreateRoom { name, room_kind: RoomKind::Thread })
            .with_extension(
                EXT_DISCORD_ORIGIN,
                &DiscordOrigin { snowflake: thread.id, guild_id: self.guild },
            );
        let link_event = Event::new(Payload::CreateRoomLink {
            parent: parent_room.clone(),
            child: room_event.id.clone(),
            is_creation_link: true,
        })
        .with_extension(
            EXT_DISCORD_ROOM_LINK_ORIGIN,
            &DiscordRoomLinkOrigin { guild_id: self.guild },
        );

        self.repo.register_mapping(&key, &room_event.id)?;
        self.repo.set_room_link(&parent_room, &room_event.id, &link_event.id)?;
        let room = room_event.id.clone();
        self.dispatcher.send_to_r(room_event);
        self.dispatcher.send_to_r(link_event);
        Ok(room)
    }

    /// Mirror a Discord channel deletion as a room deletion. The mapping
    /// goes with it; messages keep theirs.
    pub async fn sync_channel_delete(&self, channel: &Channel) -> Result<()> {
        let key = channel.id.room_key();
        let Some(room) = self.repo.get_r(&key)? else {
            return Ok(());
        };
        let event = Event::new(Payload::DeleteRoom { room: room.clone() }).with_extension(
            EXT_DISCORD_ORIGIN,
            &DiscordOrigin { snowflake: channel.id, guild_id: self.guild },
        );
        self.repo.unregister_mapping(&key, &room)?;
        self.rooms.lock().remove(&room);
        self.dispatcher.send_to_r(event);
        Ok(())
    }

    /// Fold the guild's category layout into the space sidebar. Emits
    /// nothing when the resulting sidebar fingerprint matches the stored
    /// one.
    pub async fn reconcile_sidebar(&self, channels: &[Channel]) -> Result<()> {
        // Start from the Roomy-side sidebar: native rooms stay exactly
        // where space members put them.
        let mut categories = self.sidebar.lock().clone();

        for category in channels.iter().filter(|c| c.kind == ChannelKind::Category) {
            let name = category.name.clone().unwrap_or_default();
            let children = self.mapped_children(channels, Some(category.id))?;
            merge_category(&mut categories, &name, children);
        }

        let uncategorized = self.mapped_children(channels, None)?;
        if !uncategorized.is_empty() {
            merge_category(&mut categories, FALLBACK_CATEGORY, uncategorized);
        }
        if categories.is_empty() {
            return Ok(()); // Nothing mapped on either side yet.
        }

        let digest = hash::fingerprint(&categories);
        if self.repo.sidebar_hash()?.as_deref() == Some(digest.as_str()) {
            return Ok(());
        }

        let event = Event::new(Payload::UpdateSidebar { categories: categories.clone() })
            .with_extension(
                EXT_DISCORD_SIDEBAR_ORIGIN,
                &DiscordSidebarOrigin { hash: digest.clone(), guild_id: self.guild },
            );
        self.repo.set_sidebar_hash(&digest)?;
        *self.sidebar.lock() = categories;
        self.dispatcher.send_to_r(event);
        Ok(())
    }

    /// Room ULIDs of mapped, message-bearing channels under one parent.
    fn mapped_children(
        &self,
        channels: &[Channel],
        parent: Option<Snowflake>,
    ) -> Result<Vec<EventUlid>> {
        let mut children = Vec::new();
        for channel in channels {
            if channel.kind.is_synced_channel() && channel.parent_id == parent {
                if let Some(room) = self.repo.get_r(&channel.id.room_key())? {
                    children.push(room);
                }
            }
        }
        Ok(children)
    }

    /// Rebuild room mappings from topic markers after local data loss.
    pub async fn recover_mappings(&self) -> Result<usize> {
        let channels = self.api.guild_channels(self.guild).await?;
        let mut recovered = 0;
        for channel in &channels {
            let Some(room) = channel.topic.as_deref().and_then(parse_topic_marker) else {
                continue;
            };
            match self.repo.register_mapping(&channel.id.room_key(), &room) {
                Ok(()) => recovered += 1,
                Err(BridgeError::Conflict { key, existing, .. }) => {
                    tracing::error!(%key, %existing, room = %room, "topic marker disagrees with stored mapping");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(recovered, "room mapping recovery finished");
        Ok(recovered)
    }

    // -- Roomy → Discord ------------------------------------------------------

    async fn apply_create_room(&self, event: &Event, name: &str, disposition: Disposition) -> Result<()> {
        let origin = event.extensions.get::<DiscordOrigin>(EXT_DISCORD_ORIGIN);
        let renamed = {
            let mut rooms = self.rooms.lock();
            let cached = rooms.get(&event.id);
            let renamed = cached.is_some_and(|c| c.name != name);
            rooms.insert(
                event.id.clone(),
                CachedRoom { name: name.to_owned(), discord_origin: origin.is_some() },
            );
            renamed
        };

        match disposition {
            Disposition::Absorb => {
                // Replaying our own creation: rebuild the mapping table.
                if let Some(origin) = origin {
                    match self.repo.register_mapping(&origin.snowflake.room_key(), &event.id) {
                        Ok(()) | Err(BridgeError::Conflict { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            Disposition::SyncToX => {
                // Creation is deferred until the sidebar references the
                // room; only a rename of an already-materialized room acts
                // immediately.
                if renamed {
                    if let Some(channel) = self.mapped_channel(&event.id)? {
                        self.api
                            .edit_channel(
                                channel,
                                EditChannel { name: Some(name.to_owned()), topic: None },
                            )
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn apply_sidebar(
        &self,
        event: &Event,
        categories: &[SidebarCategory],
        disposition: Disposition,
    ) -> Result<()> {
        *self.sidebar.lock() = categories.to_vec();

        match disposition {
            Disposition::Absorb => {
                // Our own sidebar write: re-adopt its fingerprint so the
                // next reconciliation can skip.
                if let Some(origin) =
                    event.extensions.get::<DiscordSidebarOrigin>(EXT_DISCORD_SIDEBAR_ORIGIN)
                {
                    self.repo.set_sidebar_hash(&origin.hash)?;
                }
            }
            Disposition::SyncToX => {
                for category in categories {
                    for room in &category.children {
                        self.materialize_room(room).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Create the Discord channel for a native Roomy room, unless it
    /// already exists on the Discord side.
    async fn materialize_room(&self, room: &EventUlid) -> Result<()> {
        let cached = self.rooms.lock().get(room).cloned();
        if cached.as_ref().is_some_and(|c| c.discord_origin) {
            return Ok(()); // Discord-born; it exists by construction.
        }
        if self.repo.get_x(room)?.is_some() {
            return Ok(());
        }

        let name = cached.map(|c| c.name).unwrap_or_else(|| room.to_string());
        let channel = self
            .api
            .create_channel(
                self.guild,
                CreateChannel {
                    name,
                    kind: ChannelKind::Text,
                    topic: Some(format_topic_marker(room)),
                    parent_id: None,
                },
            )
            .await?;
        self.repo.register_mapping(&channel.id.room_key(), room)?;
        tracing::info!(room = %room, channel = %channel.id, "materialized roomy room as channel");
        Ok(())
    }

    async fn apply_room_link(
        &self,
        event: &Event,
        parent: &EventUlid,
        child: &EventUlid,
        is_creation_link: bool,
        disposition: Disposition,
    ) -> Result<()> {
        if !is_creation_link {
            return Ok(());
        }
        match disposition {
            Disposition::Absorb => {
                self.repo.set_room_link(parent, child, &event.id)?;
            }
            Disposition::SyncToX => {
                if self.repo.room_link(parent, child)?.is_some() {
                    return Ok(()); // Link already materialized.
                }
                if self.rooms.lock().get(child).is_some_and(|c| c.discord_origin) {
                    return Ok(());
                }
                let Some(parent_channel) = self.mapped_channel(parent)? else {
                    tracing::warn!(parent = %parent, "room link parent has no channel, skipping");
                    return Ok(());
                };
                let name = self
                    .rooms
                    .lock()
                    .get(child)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| child.to_string());
                let thread = self.api.create_thread(parent_channel, name).await?;
                self.repo.register_mapping(&thread.id.room_key(), child)?;
                self.repo.set_room_link(parent, child, &event.id)?;
            }
        }
        Ok(())
    }

    fn apply_delete_room(&self, room: &EventUlid) -> Result<()> {
        // Discord-side deletion is out of scope; only the mapping goes.
        if let Some(x_key) = self.repo.get_x(room)? {
            self.repo.unregister_mapping(&x_key, room)?;
        }
        self.rooms.lock().remove(room);
        Ok(())
    }

    /// The Discord channel mapped to a room, if any.
    fn mapped_channel(&self, room: &EventUlid) -> Result<Option<Snowflake>> {
        Ok(self.repo.get_x(room)?.as_deref().and_then(parse_room_key))
    }
}

/// Union `children` into the category named `name`, appending a fresh
/// category when the name is new. Existing order is preserved.
fn merge_category(categories: &mut Vec<SidebarCategory>, name: &str, children: Vec<EventUlid>) {
    if let Some(existing) = categories.iter_mut().find(|c| c.name == name) {
        for child in children {
            if !existing.children.contains(&child) {
                existing.children.push(child);
            }
        }
    } else {
        categories.push(SidebarCategory {
            id: EventUlid::generate(),
            name: name.to_owned(),
            children,
        });
    }
}

#[async_trait]
impl SyncService for StructureSyncService {
    async fn apply_stream_event(&self, event: &Event, disposition: Disposition) -> Result<bool> {
        match &event.payload {
            Payload::CreateRoom { name, .. } => {
                self.apply_create_room(event, name, disposition).await?;
            }
            Payload::DeleteRoom { room } => self.apply_delete_room(room)?,
            Payload::UpdateParent { .. } => {
                tracing::debug!("room parent changes are not mirrored");
            }
            Payload::CreateRoomLink { parent, child, is_creation_link } => {
                self.apply_room_link(event, parent, child, *is_creation_link, disposition).await?;
            }
            Payload::UpdateSidebar { categories } | Payload::UpdateSidebarV0 { categories } => {
                self.apply_sidebar(event, categories, disposition).await?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
#[path = "structure_tests.rs"]
mod tests;
