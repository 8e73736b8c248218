// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reaction mirroring.
//!
//! Discord→Roomy is per-user: every (message, user, emoji) tuple becomes a
//! `addBridgedReaction` event, deduplicated through the reactionKey table.
//! Roomy→Discord is aggregate: the bot cannot react as someone else, so it
//! keeps one reaction of its own that exists exactly while the per-message
//! per-emoji set of Roomy reactors is non-empty.

use std::sync::Arc;

use async_trait::async_trait;

use crate::discord::api::DiscordApi;
use crate::discord::emoji;
use crate::discord::gateway::ReactionEvent;
use crate::dispatch::EventDispatcher;
use crate::error::{BridgeError, Result};
use crate::ids::{EventUlid, Snowflake, UserDid};
use crate::roomy::events::{
    DiscordReactionOrigin, Event, Payload, EXT_DISCORD_REACTION_ORIGIN,
};
use crate::store::MappingRepository;
use crate::sync::{Disposition, MessageIndex, SyncService};

pub struct ReactionSyncService {
    repo: Arc<MappingRepository>,
    api: Arc<dyn DiscordApi>,
    dispatcher: EventDispatcher,
    guild: Snowflake,
    bot: Snowflake,
    index: Arc<MessageIndex>,
}

impl ReactionSyncService {
    pub fn new(
        repo: Arc<MappingRepository>,
        api: Arc<dyn DiscordApi>,
        dispatcher: EventDispatcher,
        guild: Snowflake,
        bot: Snowflake,
        index: Arc<MessageIndex>,
    ) -> Self {
        Self { repo, api, dispatcher, guild, bot, index }
    }

    // -- Discord → Roomy ------------------------------------------------------

    pub async fn sync_x_add(&self, reaction: &ReactionEvent) -> Result<()> {
        if reaction.user_id == self.bot {
            // The bot's reaction is the aggregate indicator, not a user's.
            return Err(BridgeError::Echo);
        }
        let emoji = emoji::from_reaction(&reaction.emoji);
        if emoji.is_empty() {
            return Ok(());
        }
        if self
            .repo
            .reaction_event(reaction.message_id, reaction.user_id, &emoji)?
            .is_some()
        {
            return Ok(()); // Already synced.
        }
        let Some(target) = self.repo.get_r(&reaction.message_id.to_string())? else {
            return Err(BridgeError::MappingMissing(reaction.message_id.to_string()));
        };
        if self.repo.get_r(&reaction.channel_id.room_key())?.is_none() {
            return Err(BridgeError::MappingMissing(reaction.channel_id.room_key()));
        }

        let event = Event::new(Payload::AddBridgedReaction {
            reaction_to: target,
            reaction: emoji.clone(),
            reacting_user: UserDid::surrogate(reaction.user_id),
        })
        .with_extension(
            EXT_DISCORD_REACTION_ORIGIN,
            &DiscordReactionOrigin { guild_id: self.guild },
        );

        self.repo.set_reaction_event(reaction.message_id, reaction.user_id, &emoji, &event.id)?;
        self.dispatcher.send_to_r(event);
        Ok(())
    }

    pub async fn sync_x_remove(&self, reaction: &ReactionEvent) -> Result<()> {
        if reaction.user_id == self.bot {
            return Err(BridgeError::Echo);
        }
        let emoji = emoji::from_reaction(&reaction.emoji);
        let Some(added) =
            self.repo.reaction_event(reaction.message_id, reaction.user_id, &emoji)?
        else {
            return Ok(()); // Never synced; nothing to retract.
        };

        let event = Event::new(Payload::RemoveBridgedReaction { reaction: added })
            .with_extension(
                EXT_DISCORD_REACTION_ORIGIN,
                &DiscordReactionOrigin { guild_id: self.guild },
            );
        self.repo.remove_reaction_event(reaction.message_id, reaction.user_id, &emoji)?;
        self.dispatcher.send_to_r(event);
        Ok(())
    }

    // -- Roomy → Discord ------------------------------------------------------

    async fn apply_r_add(
        &self,
        target: &EventUlid,
        raw_emoji: &str,
        user: Option<UserDid>,
    ) -> Result<()> {
        let Some(user) = user else {
            return Ok(());
        };
        if user.is_surrogate() {
            // An X user's reaction coming back around the loop.
            return Err(BridgeError::Echo);
        }
        let emoji = emoji::canonical(raw_emoji);
        let (inserted, size) = self.repo.add_reaction_user(target, &emoji, &user)?;
        if inserted && size == 1 {
            self.with_discord_target(target, |channel, message| async move {
                self.api.create_reaction(channel, message, &emoji).await
            })
            .await?;
        }
        Ok(())
    }

    async fn apply_r_remove(
        &self,
        target: &EventUlid,
        raw_emoji: &str,
        user: Option<UserDid>,
    ) -> Result<()> {
        let Some(user) = user else {
            return Ok(());
        };
        if user.is_surrogate() {
            return Err(BridgeError::Echo);
        }
        let emoji = emoji::canonical(raw_emoji);
        let (removed, size) = self.repo.remove_reaction_user(target, &emoji, &user)?;
        if removed && size == 0 {
            self.with_discord_target(target, |channel, message| async move {
                self.api.delete_own_reaction(channel, message, &emoji).await
            })
            .await?;
        }
        Ok(())
    }

    /// Resolve the Discord (channel, message) pair behind a Roomy message
    /// and run `f` on it; unmapped targets are a warn-and-skip.
    async fn with_discord_target<F, Fut>(&self, target: &EventUlid, f: F) -> Result<()>
    where
        F: FnOnce(Snowflake, Snowflake) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let message = self.repo.get_x(target)?.and_then(|key| key.parse::<Snowflake>().ok());
        let channel = self.index.channel_of(target);
        match (channel, message) {
            (Some(channel), Some(message)) => f(channel, message).await,
            _ => {
                tracing::warn!(target = %target, "reaction target has no discord counterpart, skipping");
                Ok(())
            }
        }
    }

    /// Rebuild the reactionKey table from a replayed bridged reaction.
    fn absorb_bridged_add(
        &self,
        event: &Event,
        target: &EventUlid,
        raw_emoji: &str,
        reacting_user: &UserDid,
    ) -> Result<()> {
        let Some(user) = reacting_user.surrogate_snowflake() else {
            return Ok(());
        };
        let Some(message) =
            self.repo.get_x(target)?.and_then(|key| key.parse::<Snowflake>().ok())
        else {
            return Ok(());
        };
        let emoji = emoji::canonical(raw_emoji);
        self.repo.set_reaction_event(message, user, &emoji, &event.id)
    }
}

#[async_trait]
impl SyncService for ReactionSyncService {
    async fn apply_stream_event(&self, event: &Event, disposition: Disposition) -> Result<bool> {
        match (&event.payload, disposition) {
            (
                Payload::AddBridgedReaction { reaction_to, reaction, reacting_user },
                Disposition::Absorb,
            ) => {
                self.absorb_bridged_add(event, reaction_to, reaction, reacting_user)?;
            }
            (
                Payload::AddBridgedReaction { reaction_to, reaction, reacting_user },
                Disposition::SyncToX,
            ) => {
                self.apply_r_add(reaction_to, reaction, Some(reacting_user.clone())).await?;
            }
            (Payload::AddReaction { reaction_to, reaction }, Disposition::SyncToX) => {
                self.apply_r_add(reaction_to, reaction, event.author.clone()).await?;
            }
            (Payload::RemoveReaction { reaction_to, reaction }, Disposition::SyncToX) => {
                self.apply_r_remove(reaction_to, reaction, event.author.clone()).await?;
            }
            (Payload::RemoveBridgedReaction { .. }, Disposition::SyncToX) => {
                // Another bridge retracting one of its users' reactions; the
                // add event it references is not ours to resolve.
                tracing::debug!("foreign bridged reaction removal, skipping");
            }
            (
                Payload::AddReaction { .. }
                | Payload::RemoveReaction { .. }
                | Payload::RemoveBridgedReaction { .. },
                Disposition::Absorb,
            ) => {
                // Our own removals were applied when the Discord event was
                // handled; nothing to rebuild.
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
#[path = "reaction_tests.rs"]
mod tests;
