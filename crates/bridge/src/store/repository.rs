// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable bidirectional ID table and the bridge's assorted hash caches.
//!
//! One repository per pairing. Every table lives under the
//! `<guildId>/<spaceId>/` namespace; dropping the namespace removes the
//! pairing without touching any other bridge sharing the store.
//!
//! The `idMap` table holds both directions of each mapping, `x:`-prefixed
//! keys pointing at Roomy ULIDs and `r:`-prefixed keys pointing back at
//! Discord keys. A register writes both sides in one transaction, so the
//! bijection invariant cannot be half-committed.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::ids::{EventUlid, Snowflake, UserDid};
use crate::store::Store;

const T_ID_MAP: &str = "idMap";
const T_ROOM_LINK: &str = "roomLink";
const T_REACTION_KEY: &str = "reactionKey";
const T_REACTION_USERS: &str = "reactionUsers";
const T_PROFILE_HASH: &str = "profileHash";
const T_PROFILE_CACHE: &str = "profileCache";
const T_FETCH_ATTEMPT: &str = "blueskyFetchAttempt";
const T_SIDEBAR_HASH: &str = "sidebarHash";
const T_EDIT_INFO: &str = "editInfo";
const T_WEBHOOK_TOKEN: &str = "webhookToken";
const T_MESSAGE_HASHES: &str = "messageHashes";
const T_CURSOR: &str = "cursor";

/// Last applied edit, kept to reject stale or duplicate edit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditInfo {
    pub edited_timestamp_ms: i64,
    pub content_hash: String,
}

/// Mirrored Roomy profile fields, cached for webhook display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomyProfile {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub handle: Option<String>,
}

pub struct MappingRepository {
    store: Arc<dyn Store>,
    namespace: String,
}

impl MappingRepository {
    pub fn new(store: Arc<dyn Store>, guild_id: Snowflake, space_id: &str) -> Self {
        Self { store, namespace: format!("{guild_id}/{space_id}") }
    }

    fn table(&self, name: &str) -> String {
        format!("{}/{name}", self.namespace)
    }

    fn get_string(&self, table: &str, key: &str) -> Result<Option<String>> {
        let bytes = self.store.get(&self.table(table), key)?;
        match bytes {
            Some(b) => String::from_utf8(b).map(Some).map_err(BridgeError::decode),
            None => Ok(None),
        }
    }

    fn put_string(&self, table: &str, key: &str, value: &str) -> Result<()> {
        self.store.put(&self.table(table), key, value.as_bytes())
    }

    // -- idMap ----------------------------------------------------------------

    /// Commit a bidirectional mapping. Registering the identical pair again
    /// is a silent success; registering either side against a different
    /// opposite is a conflict and leaves the table untouched.
    pub fn register_mapping(&self, x_key: &str, r_id: &EventUlid) -> Result<()> {
        let forward = format!("x:{x_key}");
        let backward = format!("r:{r_id}");

        if let Some(existing) = self.get_string(T_ID_MAP, &forward)? {
            if existing == r_id.as_str() {
                return Ok(());
            }
            return Err(BridgeError::Conflict {
                key: x_key.to_owned(),
                existing,
                incoming: r_id.to_string(),
            });
        }
        if let Some(existing) = self.get_string(T_ID_MAP, &backward)? {
            return Err(BridgeError::Conflict {
                key: r_id.to_string(),
                existing,
                incoming: x_key.to_owned(),
            });
        }

        self.store.put_all(
            &self.table(T_ID_MAP),
            &[(forward.as_str(), r_id.as_str().as_bytes()), (backward.as_str(), x_key.as_bytes())],
        )
    }

    /// Remove both directions of a mapping. Silent if absent.
    pub fn unregister_mapping(&self, x_key: &str, r_id: &EventUlid) -> Result<()> {
        let table = self.table(T_ID_MAP);
        self.store.remove(&table, &format!("x:{x_key}"))?;
        self.store.remove(&table, &format!("r:{r_id}"))
    }

    pub fn get_r(&self, x_key: &str) -> Result<Option<EventUlid>> {
        let value = self.get_string(T_ID_MAP, &format!("x:{x_key}"))?;
        Ok(value.and_then(|s| EventUlid::parse(&s)))
    }

    pub fn get_x(&self, r_id: &EventUlid) -> Result<Option<String>> {
        self.get_string(T_ID_MAP, &format!("r:{r_id}"))
    }

    // -- roomLink -------------------------------------------------------------

    pub fn room_link(&self, parent: &EventUlid, child: &EventUlid) -> Result<Option<EventUlid>> {
        let value = self.get_string(T_ROOM_LINK, &format!("{parent}:{child}"))?;
        Ok(value.and_then(|s| EventUlid::parse(&s)))
    }

    pub fn set_room_link(
        &self,
        parent: &EventUlid,
        child: &EventUlid,
        link: &EventUlid,
    ) -> Result<()> {
        self.put_string(T_ROOM_LINK, &format!("{parent}:{child}"), link.as_str())
    }

    // -- reactionKey ----------------------------------------------------------

    fn reaction_key(message: Snowflake, user: Snowflake, emoji: &str) -> String {
        format!("{message}:{user}:{emoji}")
    }

    pub fn reaction_event(
        &self,
        message: Snowflake,
        user: Snowflake,
        emoji: &str,
    ) -> Result<Option<EventUlid>> {
        let value = self.get_string(T_REACTION_KEY, &Self::reaction_key(message, user, emoji))?;
        Ok(value.and_then(|s| EventUlid::parse(&s)))
    }

    pub fn set_reaction_event(
        &self,
        message: Snowflake,
        user: Snowflake,
        emoji: &str,
        event: &EventUlid,
    ) -> Result<()> {
        self.put_string(T_REACTION_KEY, &Self::reaction_key(message, user, emoji), event.as_str())
    }

    pub fn remove_reaction_event(
        &self,
        message: Snowflake,
        user: Snowflake,
        emoji: &str,
    ) -> Result<()> {
        self.store
            .remove(&self.table(T_REACTION_KEY), &Self::reaction_key(message, user, emoji))
    }

    // -- reactionUsers --------------------------------------------------------

    pub fn reaction_users(&self, message: &EventUlid, emoji: &str) -> Result<BTreeSet<UserDid>> {
        let key = format!("{message}:{emoji}");
        match self.store.get(&self.table(T_REACTION_USERS), &key)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(BridgeError::decode),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Add a user to the aggregate set. Returns whether the user was newly
    /// inserted and the set size afterwards; `(true, 1)` is the
    /// empty-to-nonempty transition that adds the bot's Discord reaction.
    pub fn add_reaction_user(
        &self,
        message: &EventUlid,
        emoji: &str,
        user: &UserDid,
    ) -> Result<(bool, usize)> {
        let mut users = self.reaction_users(message, emoji)?;
        let inserted = users.insert(user.clone());
        let key = format!("{message}:{emoji}");
        let bytes = serde_json::to_vec(&users)?;
        self.store.put(&self.table(T_REACTION_USERS), &key, &bytes)?;
        Ok((inserted, users.len()))
    }

    /// Remove a user from the aggregate set. Returns whether the user was
    /// present and the set size afterwards; `(true, 0)` is the transition
    /// that removes the bot's Discord reaction. An empty set is deleted
    /// rather than stored.
    pub fn remove_reaction_user(
        &self,
        message: &EventUlid,
        emoji: &str,
        user: &UserDid,
    ) -> Result<(bool, usize)> {
        let mut users = self.reaction_users(message, emoji)?;
        let removed = users.remove(user);
        let key = format!("{message}:{emoji}");
        if users.is_empty() {
            self.store.remove(&self.table(T_REACTION_USERS), &key)?;
        } else {
            let bytes = serde_json::to_vec(&users)?;
            self.store.put(&self.table(T_REACTION_USERS), &key, &bytes)?;
        }
        Ok((removed, users.len()))
    }

    // -- profileHash / profileCache / blueskyFetchAttempt ---------------------

    pub fn profile_hash(&self, user: Snowflake) -> Result<Option<String>> {
        self.get_string(T_PROFILE_HASH, &user.to_string())
    }

    pub fn set_profile_hash(&self, user: Snowflake, hash: &str) -> Result<()> {
        self.put_string(T_PROFILE_HASH, &user.to_string(), hash)
    }

    pub fn roomy_profile(&self, did: &UserDid) -> Result<Option<RoomyProfile>> {
        match self.store.get(&self.table(T_PROFILE_CACHE), did.as_str())? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(BridgeError::decode),
            None => Ok(None),
        }
    }

    pub fn set_roomy_profile(&self, did: &UserDid, profile: &RoomyProfile) -> Result<()> {
        let bytes = serde_json::to_vec(profile)?;
        self.store.put(&self.table(T_PROFILE_CACHE), did.as_str(), &bytes)
    }

    pub fn fetch_attempt_ms(&self, did: &UserDid) -> Result<Option<u64>> {
        let value = self.get_string(T_FETCH_ATTEMPT, did.as_str())?;
        Ok(value.and_then(|s| s.parse().ok()))
    }

    pub fn set_fetch_attempt_ms(&self, did: &UserDid, at_ms: u64) -> Result<()> {
        self.put_string(T_FETCH_ATTEMPT, did.as_str(), &at_ms.to_string())
    }

    // -- sidebarHash ----------------------------------------------------------

    pub fn sidebar_hash(&self) -> Result<Option<String>> {
        self.get_string(T_SIDEBAR_HASH, "sidebar")
    }

    pub fn set_sidebar_hash(&self, hash: &str) -> Result<()> {
        self.put_string(T_SIDEBAR_HASH, "sidebar", hash)
    }

    // -- editInfo -------------------------------------------------------------

    pub fn edit_info(&self, message: Snowflake) -> Result<Option<EditInfo>> {
        match self.store.get(&self.table(T_EDIT_INFO), &message.to_string())? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(BridgeError::decode),
            None => Ok(None),
        }
    }

    pub fn set_edit_info(&self, message: Snowflake, info: &EditInfo) -> Result<()> {
        let bytes = serde_json::to_vec(info)?;
        self.store.put(&self.table(T_EDIT_INFO), &message.to_string(), &bytes)
    }

    // -- webhookToken ---------------------------------------------------------

    pub fn webhook(&self, channel: Snowflake) -> Result<Option<(Snowflake, String)>> {
        let Some(raw) = self.get_string(T_WEBHOOK_TOKEN, &channel.to_string())? else {
            return Ok(None);
        };
        let Some((id, token)) = raw.split_once(':') else {
            return Err(BridgeError::decode(format!("malformed webhook entry: {raw}")));
        };
        let id = id.parse().map_err(BridgeError::decode)?;
        Ok(Some((id, token.to_owned())))
    }

    pub fn set_webhook(&self, channel: Snowflake, id: Snowflake, token: &str) -> Result<()> {
        self.put_string(T_WEBHOOK_TOKEN, &channel.to_string(), &format!("{id}:{token}"))
    }

    // -- messageHashes --------------------------------------------------------
    //
    // Reconciliation duplicate table, scoped per channel:
    // `<channelId>:<noncePrefix>:<contentHash>` → message snowflake. The
    // nonce prefix is empty for human-authored messages.

    fn message_hash_key(channel: Snowflake, nonce_prefix: &str, content_hash: &str) -> String {
        format!("{channel}:{nonce_prefix}:{content_hash}")
    }

    pub fn message_hash(
        &self,
        channel: Snowflake,
        nonce_prefix: &str,
        content_hash: &str,
    ) -> Result<Option<Snowflake>> {
        let key = Self::message_hash_key(channel, nonce_prefix, content_hash);
        let value = self.get_string(T_MESSAGE_HASHES, &key)?;
        Ok(value.and_then(|s| s.parse().ok()))
    }

    pub fn set_message_hash(
        &self,
        channel: Snowflake,
        nonce_prefix: &str,
        content_hash: &str,
        message: Snowflake,
    ) -> Result<()> {
        let key = Self::message_hash_key(channel, nonce_prefix, content_hash);
        self.put_string(T_MESSAGE_HASHES, &key, &message.to_string())
    }

    /// Drop every duplicate-table entry for one channel, ahead of a fresh
    /// reconciliation walk.
    pub fn clear_message_hashes(&self, channel: Snowflake) -> Result<()> {
        let table = self.table(T_MESSAGE_HASHES);
        let prefix = format!("{channel}:");
        for (key, _) in self.store.scan(&table)? {
            if key.starts_with(&prefix) {
                self.store.remove(&table, &key)?;
            }
        }
        Ok(())
    }

    // -- cursor ---------------------------------------------------------------

    pub fn cursor(&self, stream_did: &str) -> Result<Option<u64>> {
        let value = self.get_string(T_CURSOR, stream_did)?;
        Ok(value.and_then(|s| s.parse().ok()))
    }

    pub fn set_cursor(&self, stream_did: &str, index: u64) -> Result<()> {
        self.put_string(T_CURSOR, stream_did, &index.to_string())
    }

    // -- lifecycle ------------------------------------------------------------

    /// Drop the whole pairing namespace. Called on unregister.
    pub fn delete(&self) -> Result<()> {
        let prefix = format!("{}/", self.namespace);
        for table in self.store.tables()? {
            if table.starts_with(&prefix) {
                self.store.drop_table(&table)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod tests;
