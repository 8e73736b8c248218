// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message mirroring, both directions.
//!
//! Discord→Roomy: each guild message becomes a `createMessage` event
//! carrying origin, author-override, and timestamp-override extensions;
//! edits are gated by stored edit info, deletions keep the mapping so the
//! echo can be recognized later. Roomy→Discord: messages are posted through
//! a lazily-provisioned per-channel webhook under the author's display
//! name, with the event ULID prefix as the Discord nonce. Discord only
//! lets the authoring webhook edit or delete its messages, so both paths
//! go through the stored webhook token.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::discord::api::{DiscordApi, ExecuteWebhook};
use crate::discord::gateway::{MessageDelete, MessageUpdate};
use crate::discord::model::{message_type, Channel, Message, MessageReaction};
use crate::dispatch::EventDispatcher;
use crate::error::{BridgeError, Result};
use crate::hash;
use crate::ids::{parse_room_key, EventUlid, Snowflake, UserDid};
use crate::roomy::events::{
    Attachment, AttachmentsExtension, AuthorOverride, Body, DiscordMessageOrigin, Event, Payload,
    TimestampOverride, EXT_ATTACHMENTS, EXT_AUTHOR_OVERRIDE, EXT_DISCORD_MESSAGE_ORIGIN,
    EXT_TIMESTAMP_OVERRIDE,
};
use crate::store::{EditInfo, MappingRepository};
use crate::sync::{Disposition, MessageIndex, SyncService};
use crate::sync::profile::ProfileSyncService;

/// Page size for the reconciliation walk.
const PAGE_SIZE: u8 = 100;

/// Display name for bridge-provisioned webhooks.
const WEBHOOK_NAME: &str = "roomybridge";

pub struct MessageSyncService {
    repo: Arc<MappingRepository>,
    api: Arc<dyn DiscordApi>,
    dispatcher: EventDispatcher,
    guild: Snowflake,
    bot: Snowflake,
    profile: Arc<ProfileSyncService>,
    index: Arc<MessageIndex>,
    /// Channel lookups cached for webhook targeting (threads post through
    /// their parent channel's webhook).
    channel_info: Mutex<HashMap<Snowflake, Channel>>,
}

impl MessageSyncService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<MappingRepository>,
        api: Arc<dyn DiscordApi>,
        dispatcher: EventDispatcher,
        guild: Snowflake,
        bot: Snowflake,
        profile: Arc<ProfileSyncService>,
        index: Arc<MessageIndex>,
    ) -> Self {
        Self {
            repo,
            api,
            dispatcher,
            guild,
            bot,
            profile,
            index,
            channel_info: Mutex::new(HashMap::new()),
        }
    }

    // -- Discord → Roomy ------------------------------------------------------

    /// Mirror one Discord message, returning the Roomy event id. `None`
    /// means the message is intentionally not synced (no room mapping, a
    /// system message, or one of our own webhook posts).
    pub async fn sync_x_message(&self, msg: &Message) -> Result<Option<EventUlid>> {
        let Some(room) = self.repo.get_r(&msg.channel_id.room_key())? else {
            return Ok(None);
        };
        let key = msg.id.to_string();
        if let Some(existing) = self.repo.get_r(&key)? {
            return Ok(Some(existing));
        }
        if msg.kind == message_type::THREAD_CREATED || msg.kind == message_type::CHANNEL_NAME_CHANGE
        {
            return Ok(None);
        }

        // Own-output suppression: anything posted through our webhook, and
        // the bot's own messages once a webhook exists for the channel.
        let (webhook_channel, _) = self.webhook_target(msg.channel_id).await?;
        if let Some((webhook_id, _)) = self.repo.webhook(webhook_channel)? {
            if msg.author.id == self.bot {
                return Ok(None);
            }
            if msg.webhook_id == Some(webhook_id) {
                return Ok(None);
            }
        }

        self.profile.sync_x_to_r(&msg.author).await?;

        if msg.kind == message_type::THREAD_STARTER_MESSAGE {
            return self.sync_thread_starter(msg, &room).await.map(Some);
        }

        let mut attachments = Vec::new();
        if msg.kind == message_type::REPLY {
            if let Some(replied) = msg.message_reference.as_ref().and_then(|r| r.message_id) {
                if let Some(reply_to) = self.repo.get_r(&replied.to_string())? {
                    attachments.push(Attachment::Reply { reply_to });
                }
            }
        }
        for attachment in &msg.attachments {
            let mime = attachment.content_type.clone().unwrap_or_default();
            let (url, name) = (attachment.url.clone(), attachment.filename.clone());
            attachments.push(if mime.starts_with("image/") {
                Attachment::Image { url, name, mime_type: mime }
            } else if mime.starts_with("video/") {
                Attachment::Video { url, name, mime_type: mime }
            } else {
                Attachment::File { url, name, mime_type: mime }
            });
        }

        let mut event = Event::new(Payload::CreateMessage {
            room,
            body: Body::markdown(&msg.content),
        })
        .with_extension(
            EXT_DISCORD_MESSAGE_ORIGIN,
            &DiscordMessageOrigin {
                snowflake: msg.id,
                channel_id: msg.channel_id,
                guild_id: self.guild,
            },
        )
        .with_extension(
            EXT_AUTHOR_OVERRIDE,
            &AuthorOverride { did: UserDid::surrogate(msg.author.id) },
        )
        .with_extension(
            EXT_TIMESTAMP_OVERRIDE,
            &TimestampOverride { timestamp: msg.created_ms() },
        );
        if !attachments.is_empty() {
            event = event
                .with_extension(EXT_ATTACHMENTS, &AttachmentsExtension { attachments });
        }

        self.repo.register_mapping(&key, &event.id)?;
        self.index.record(&event.id, msg.channel_id);
        let id = event.id.clone();
        self.dispatcher.send_to_r(event);
        Ok(Some(id))
    }

    /// A thread's pinned copy of its starter message becomes a forward of
    /// the already-synced original, fetching and syncing the original
    /// first when the thread is seen before its parent history.
    async fn sync_thread_starter(&self, msg: &Message, room: &EventUlid) -> Result<EventUlid> {
        let reference = msg
            .message_reference
            .as_ref()
            .and_then(|r| Some((r.channel_id?, r.message_id?)))
            .ok_or_else(|| {
                BridgeError::MappingMissing(format!("thread starter {} has no reference", msg.id))
            })?;
        let (ref_channel, ref_message) = reference;

        let referenced = match self.repo.get_r(&ref_message.to_string())? {
            Some(existing) => existing,
            None => {
                let original = self.api.message(ref_channel, ref_message).await?;
                self.sync_x_message_boxed(&original)
                    .await?
                    .ok_or_else(|| BridgeError::MappingMissing(ref_message.to_string()))?
            }
        };

        let event = Event::new(Payload::ForwardMessages {
            room: room.clone(),
            messages: vec![referenced],
        })
        .with_extension(
            EXT_DISCORD_MESSAGE_ORIGIN,
            &DiscordMessageOrigin {
                snowflake: msg.id,
                channel_id: msg.channel_id,
                guild_id: self.guild,
            },
        )
        .with_extension(
            EXT_TIMESTAMP_OVERRIDE,
            &TimestampOverride { timestamp: msg.created_ms() },
        );

        self.repo.register_mapping(&msg.id.to_string(), &event.id)?;
        self.index.record(&event.id, msg.channel_id);
        let id = event.id.clone();
        self.dispatcher.send_to_r(event);
        Ok(id)
    }

    /// Boxed indirection for the starter-message recursion.
    fn sync_x_message_boxed<'a>(
        &'a self,
        msg: &'a Message,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<EventUlid>>> + Send + 'a>>
    {
        Box::pin(self.sync_x_message(msg))
    }

    /// Mirror an edit. Edits without `edited_timestamp` are embed
    /// resolutions and are dropped; stale or duplicate edits are rejected
    /// against the stored edit info.
    pub async fn sync_x_edit(&self, update: &MessageUpdate) -> Result<()> {
        let Some(edited_at) = update.edited_timestamp else {
            return Ok(());
        };
        let Some(target) = self.repo.get_r(&update.id.to_string())? else {
            return Err(BridgeError::MappingMissing(update.id.to_string()));
        };

        let content = update.content.clone().unwrap_or_default();
        let urls: Vec<String> = update
            .attachments
            .as_ref()
            .map(|list| list.iter().map(|a| a.url.clone()).collect())
            .unwrap_or_default();
        let digest = hash::edit_hash(&content, &urls);
        let edited_ms = edited_at.timestamp_millis();

        if let Some(info) = self.repo.edit_info(update.id)? {
            let stale = info.edited_timestamp_ms > edited_ms
                || (info.edited_timestamp_ms == edited_ms && info.content_hash == digest);
            if stale {
                return Err(BridgeError::StaleEdit);
            }
        }

        let mut event = Event::new(Payload::EditMessage {
            message: target,
            body: Body::markdown(&content),
        })
        .with_extension(
            EXT_DISCORD_MESSAGE_ORIGIN,
            &DiscordMessageOrigin {
                snowflake: update.id,
                channel_id: update.channel_id,
                guild_id: self.guild,
            },
        )
        .with_extension(EXT_TIMESTAMP_OVERRIDE, &TimestampOverride { timestamp: edited_ms });
        if let Some(ref author) = update.author {
            event = event.with_extension(
                EXT_AUTHOR_OVERRIDE,
                &AuthorOverride { did: UserDid::surrogate(author.id) },
            );
        }

        self.repo.set_edit_info(
            update.id,
            &EditInfo { edited_timestamp_ms: edited_ms, content_hash: digest },
        )?;
        self.dispatcher.send_to_r(event);
        Ok(())
    }

    /// Mirror a deletion. The id mapping is kept: the delete event will
    /// come back around the loop and is recognized through it.
    pub async fn sync_x_delete(&self, delete: &MessageDelete) -> Result<()> {
        let Some(target) = self.repo.get_r(&delete.id.to_string())? else {
            return Err(BridgeError::MappingMissing(delete.id.to_string()));
        };
        let event = Event::new(Payload::DeleteMessage { message: target }).with_extension(
            EXT_DISCORD_MESSAGE_ORIGIN,
            &DiscordMessageOrigin {
                snowflake: delete.id,
                channel_id: delete.channel_id,
                guild_id: self.guild,
            },
        );
        self.dispatcher.send_to_r(event);
        Ok(())
    }

    /// Walk one channel oldest-first: build the duplicate-suppression
    /// table, sync anything unmapped, and report which messages carry
    /// reactions for the later reaction pass.
    pub async fn reconcile_channel(
        &self,
        channel: Snowflake,
    ) -> Result<Vec<(Snowflake, Vec<MessageReaction>)>> {
        self.repo.clear_message_hashes(channel)?;
        let mut reacted = Vec::new();
        let mut after: Option<Snowflake> = None;

        loop {
            let page = self.api.messages_after(channel, after, PAGE_SIZE).await?;
            let Some(last) = page.last() else { break };
            after = Some(last.id);

            for msg in &page {
                // Webhook posts keep their nonce (the event ULID prefix);
                // human messages hash with an empty prefix.
                let nonce_prefix = if msg.webhook_id.is_some() {
                    msg.nonce.clone().unwrap_or_default()
                } else {
                    String::new()
                };
                let digest = hash::edit_hash(&msg.content, &msg.attachment_urls());
                self.repo.set_message_hash(channel, &nonce_prefix, &digest, msg.id)?;

                self.sync_x_message(msg).await?;
                if !msg.reactions.is_empty() {
                    reacted.push((msg.id, msg.reactions.clone()));
                }
            }

            if page.len() < PAGE_SIZE as usize {
                break;
            }
        }
        Ok(reacted)
    }

    // -- Roomy → Discord ------------------------------------------------------

    async fn apply_create(&self, event: &Event, room: &EventUlid, body: &Body) -> Result<()> {
        let Some(x_key) = self.repo.get_x(room)? else {
            tracing::debug!(room = %room, "message for unmapped room, skipping");
            return Ok(());
        };
        let Some(channel) = parse_room_key(&x_key) else {
            return Err(BridgeError::decode(format!("room mapped to non-room key {x_key}")));
        };
        if self.repo.get_x(&event.id)?.is_some() {
            self.index.record(&event.id, channel);
            return Ok(()); // Already materialized.
        }

        let text = body.text().unwrap_or_default().to_owned();

        // Reconciliation may have already materialized this event: as our
        // own webhook post (keyed by the event's nonce) or as a matching
        // human message (keyed by the empty prefix).
        let digest = hash::edit_hash(&text, &[]);
        let materialized = match self.repo.message_hash(channel, event.id.nonce(), &digest)? {
            Some(existing) => Some(existing),
            None => self.repo.message_hash(channel, "", &digest)?,
        };
        if let Some(existing) = materialized {
            match self.repo.register_mapping(&existing.to_string(), &event.id) {
                Ok(()) | Err(BridgeError::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
            self.index.record(&event.id, channel);
            return Ok(());
        }

        let (webhook_channel, thread_id) = self.webhook_target(channel).await?;
        let (webhook, token) = self.ensure_webhook(webhook_channel).await?;

        let author = event
            .extensions
            .get::<AuthorOverride>(EXT_AUTHOR_OVERRIDE)
            .map(|o| o.did)
            .or_else(|| event.author.clone());
        let profile = match author {
            Some(ref did) => self.profile.profile_or_fetch(did).await.unwrap_or(None),
            None => None,
        };
        let username = profile
            .as_ref()
            .and_then(|p| p.name.clone().or_else(|| p.handle.clone()))
            .or_else(|| author.as_ref().map(|did| did.to_string()));

        let sent = self
            .api
            .execute_webhook(
                webhook,
                &token,
                ExecuteWebhook {
                    content: text,
                    username,
                    avatar_url: profile.as_ref().and_then(|p| p.avatar.clone()),
                    nonce: Some(event.id.nonce().to_owned()),
                    thread_id,
                },
            )
            .await?;

        self.repo.register_mapping(&sent.id.to_string(), &event.id)?;
        self.index.record(&event.id, channel);
        Ok(())
    }

    async fn apply_edit(&self, message: &EventUlid, body: &Body) -> Result<()> {
        let Some(x_id) = self.mapped_message(message)? else {
            return Err(BridgeError::MappingMissing(message.to_string()));
        };
        let Some(channel) = self.index.channel_of(message) else {
            return Err(BridgeError::MappingMissing(format!("channel of {message}")));
        };
        let (webhook_channel, _) = self.webhook_target(channel).await?;
        let Some((webhook, token)) = self.repo.webhook(webhook_channel)? else {
            // Not one of our webhook posts; Discord will not let us edit it.
            tracing::warn!(message = %message, "no webhook owns this message, skipping edit");
            return Ok(());
        };
        let content = body.text().unwrap_or_default().to_owned();
        self.api.edit_webhook_message(webhook, &token, x_id, content).await?;
        Ok(())
    }

    async fn apply_delete(&self, message: &EventUlid) -> Result<()> {
        let Some(x_id) = self.mapped_message(message)? else {
            return Err(BridgeError::MappingMissing(message.to_string()));
        };
        let Some(channel) = self.index.channel_of(message) else {
            return Err(BridgeError::MappingMissing(format!("channel of {message}")));
        };
        let (webhook_channel, _) = self.webhook_target(channel).await?;
        let Some((webhook, token)) = self.repo.webhook(webhook_channel)? else {
            tracing::warn!(message = %message, "no webhook owns this message, skipping delete");
            return Ok(());
        };
        self.api.delete_webhook_message(webhook, &token, x_id).await?;
        Ok(())
    }

    fn mapped_message(&self, message: &EventUlid) -> Result<Option<Snowflake>> {
        Ok(self.repo.get_x(message)?.and_then(|key| key.parse().ok()))
    }

    /// Where a post for `channel` actually goes: threads post through the
    /// parent channel's webhook with a thread id.
    async fn webhook_target(&self, channel: Snowflake) -> Result<(Snowflake, Option<Snowflake>)> {
        let cached = self.channel_info.lock().get(&channel).cloned();
        let info = match cached {
            Some(info) => info,
            None => {
                let info = self.api.channel(channel).await?;
                self.channel_info.lock().insert(channel, info.clone());
                info
            }
        };
        if info.kind.is_thread() {
            let parent = info.parent_id.ok_or_else(|| {
                BridgeError::MappingMissing(format!("thread {channel} has no parent"))
            })?;
            Ok((parent, Some(channel)))
        } else {
            Ok((channel, None))
        }
    }

    /// The channel's webhook, created on first use and persisted. At most
    /// one webhook per channel ever exists.
    async fn ensure_webhook(&self, channel: Snowflake) -> Result<(Snowflake, String)> {
        if let Some(existing) = self.repo.webhook(channel)? {
            return Ok(existing);
        }
        let webhook = self.api.create_webhook(channel, WEBHOOK_NAME).await?;
        let token = webhook
            .token
            .ok_or_else(|| BridgeError::platform(format!("webhook {} has no token", webhook.id)))?;
        self.repo.set_webhook(channel, webhook.id, &token)?;
        Ok((webhook.id, token))
    }

    fn absorb_origin_mapping(&self, event: &Event) -> Result<()> {
        if let Some(origin) =
            event.extensions.get::<DiscordMessageOrigin>(EXT_DISCORD_MESSAGE_ORIGIN)
        {
            match self.repo.register_mapping(&origin.snowflake.to_string(), &event.id) {
                Ok(()) | Err(BridgeError::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
            self.index.record(&event.id, origin.channel_id);
        }
        Ok(())
    }

    /// Rebuild edit-staleness state from an absorbed edit event.
    fn absorb_edit_info(&self, event: &Event, body: &Body) -> Result<()> {
        let (Some(origin), Some(stamp)) = (
            event.extensions.get::<DiscordMessageOrigin>(EXT_DISCORD_MESSAGE_ORIGIN),
            event.extensions.get::<TimestampOverride>(EXT_TIMESTAMP_OVERRIDE),
        ) else {
            return Ok(());
        };
        let replayed = EditInfo {
            edited_timestamp_ms: stamp.timestamp,
            content_hash: hash::edit_hash(body.text().unwrap_or_default(), &[]),
        };
        match self.repo.edit_info(origin.snowflake)? {
            Some(existing) if existing.edited_timestamp_ms >= replayed.edited_timestamp_ms => {}
            _ => self.repo.set_edit_info(origin.snowflake, &replayed)?,
        }
        Ok(())
    }
}

#[async_trait]
impl SyncService for MessageSyncService {
    async fn apply_stream_event(&self, event: &Event, disposition: Disposition) -> Result<bool> {
        match (&event.payload, disposition) {
            (Payload::CreateMessage { .. } | Payload::ForwardMessages { .. }, Disposition::Absorb) => {
                self.absorb_origin_mapping(event)?;
            }
            (Payload::EditMessage { body, .. }, Disposition::Absorb) => {
                self.absorb_edit_info(event, body)?;
            }
            (Payload::DeleteMessage { .. }, Disposition::Absorb) => {
                // Mapping is deliberately retained; nothing to rebuild.
            }
            (Payload::CreateMessage { room, body }, Disposition::SyncToX) => {
                self.apply_create(event, room, body).await?;
            }
            (Payload::EditMessage { message, body }, Disposition::SyncToX) => {
                self.apply_edit(message, body).await?;
            }
            (Payload::DeleteMessage { message }, Disposition::SyncToX) => {
                self.apply_delete(message).await?;
            }
            (Payload::ForwardMessages { .. }, Disposition::SyncToX) => {
                tracing::debug!("native message forwards are not mirrored");
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
