// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Profile mirroring.
//!
//! Discord→Roomy: each Discord author is mirrored as a surrogate Roomy
//! profile, gated by a fingerprint so an unchanged profile never re-emits.
//! Roomy→Discord: webhook display names come from a bounded in-process LRU
//! over the persistent profile mirror, falling back to an external resolver
//! that is rate-limited by a stored attempt timestamp.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use crate::discord::model::User;
use crate::dispatch::EventDispatcher;
use crate::error::{BridgeError, Result};
use crate::hash;
use crate::ids::{Snowflake, UserDid};
use crate::roomy::events::{
    AuthorOverride, DiscordUserOrigin, Event, Payload, EXT_AUTHOR_OVERRIDE,
    EXT_DISCORD_USER_ORIGIN,
};
use crate::store::{MappingRepository, RoomyProfile};
use crate::sync::{epoch_ms, Disposition, SyncService};

/// In-process profile cache bound.
pub const LRU_CAPACITY: usize = 50;

/// Minimum spacing between external lookups for one DID.
pub const FETCH_TTL: Duration = Duration::from_secs(3600);

/// External profile lookup, behind a trait so tests can stub it.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve(&self, did: &UserDid) -> Result<Option<RoomyProfile>>;
}

pub struct ProfileSyncService {
    repo: Arc<MappingRepository>,
    dispatcher: EventDispatcher,
    guild: Snowflake,
    resolver: Arc<dyn ProfileResolver>,
    lru: Mutex<LruCache<UserDid, RoomyProfile>>,
}

impl ProfileSyncService {
    pub fn new(
        repo: Arc<MappingRepository>,
        dispatcher: EventDispatcher,
        guild: Snowflake,
        resolver: Arc<dyn ProfileResolver>,
    ) -> Self {
        let capacity = NonZeroUsize::new(LRU_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self { repo, dispatcher, guild, resolver, lru: Mutex::new(LruCache::new(capacity)) }
    }

    /// Mirror a Discord user to Roomy if their profile changed since the
    /// last sync.
    pub async fn sync_x_to_r(&self, user: &User) -> Result<()> {
        let digest =
            hash::profile_hash(&user.username, user.global_name.as_deref(), user.avatar.as_deref());
        if self.repo.profile_hash(user.id)?.as_deref() == Some(digest.as_str()) {
            return Ok(());
        }

        let did = UserDid::surrogate(user.id);
        let profile = RoomyProfile {
            name: Some(user.display_name().to_owned()),
            avatar: user.avatar_url(),
            handle: Some(user.username.clone()),
        };

        let event = Event::new(Payload::UpdateProfile {
            name: profile.name.clone(),
            avatar: profile.avatar.clone(),
            handle: profile.handle.clone(),
        })
        .with_extension(
            EXT_DISCORD_USER_ORIGIN,
            &DiscordUserOrigin { user_id: user.id, guild_id: self.guild },
        )
        .with_extension(EXT_AUTHOR_OVERRIDE, &AuthorOverride { did: did.clone() });

        self.repo.set_roomy_profile(&did, &profile)?;
        self.repo.set_profile_hash(user.id, &digest)?;
        self.lru.lock().put(did, profile);
        self.dispatcher.send_to_r(event);
        Ok(())
    }

    /// Profile for a Roomy DID: LRU, then the persistent mirror, then the
    /// external resolver (at most once per [`FETCH_TTL`] per DID).
    pub async fn profile_or_fetch(&self, did: &UserDid) -> Result<Option<RoomyProfile>> {
        if let Some(profile) = self.lru.lock().get(did) {
            return Ok(Some(profile.clone()));
        }
        if let Some(profile) = self.repo.roomy_profile(did)? {
            self.lru.lock().put(did.clone(), profile.clone());
            return Ok(Some(profile));
        }

        let now = epoch_ms();
        if let Some(attempted) = self.repo.fetch_attempt_ms(did)? {
            if now.saturating_sub(attempted) < FETCH_TTL.as_millis() as u64 {
                return Ok(None);
            }
        }
        self.repo.set_fetch_attempt_ms(did, now)?;

        let profile = self
            .resolver
            .resolve(did)
            .await
            .map_err(|e| BridgeError::ProfileFetch(e.to_string()))?;
        if let Some(ref profile) = profile {
            self.repo.set_roomy_profile(did, profile)?;
            self.lru.lock().put(did.clone(), profile.clone());
        }
        Ok(profile)
    }
}

#[async_trait]
impl SyncService for ProfileSyncService {
    async fn apply_stream_event(&self, event: &Event, _disposition: Disposition) -> Result<bool> {
        let Payload::UpdateProfile { ref name, ref avatar, ref handle } = event.payload else {
            return Ok(false);
        };

        // Whether absorbed (our own surrogate profiles, rebuilding the
        // mirror) or native (a Roomy user renamed themselves), the cached
        // profile is refreshed so webhook display names stay current.
        let did = event
            .extensions
            .get::<AuthorOverride>(EXT_AUTHOR_OVERRIDE)
            .map(|o| o.did)
            .or_else(|| event.author.clone());
        let Some(did) = did else {
            return Ok(true); // Profile event without an identity; nothing to cache.
        };

        let profile =
            RoomyProfile { name: name.clone(), avatar: avatar.clone(), handle: handle.clone() };
        self.repo.set_roomy_profile(&did, &profile)?;
        self.lru.lock().put(did, profile);
        Ok(true)
    }
}

// -- Bluesky resolver ---------------------------------------------------------

const BSKY_API: &str = "https://public.api.bsky.app";

/// Resolves native Roomy identities through the public Bluesky appview.
pub struct BlueskyResolver {
    base: String,
    http: reqwest::Client,
}

impl BlueskyResolver {
    pub fn new() -> Self {
        Self::with_base(BSKY_API)
    }

    pub fn with_base(base: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { base: base.trim_end_matches('/').to_owned(), http }
    }
}

impl Default for BlueskyResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct BskyProfile {
    #[serde(default)]
    display_name: Option<String>,
    handle: String,
    #[serde(default)]
    avatar: Option<String>,
}

#[async_trait]
impl ProfileResolver for BlueskyResolver {
    async fn resolve(&self, did: &UserDid) -> Result<Option<RoomyProfile>> {
        // Surrogates are bridge-minted and have no upstream account.
        if did.is_surrogate() {
            return Ok(None);
        }
        let url = format!("{}/xrpc/app.bsky.actor.getProfile?actor={}", self.base, did);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BridgeError::ProfileFetch(e.to_string()))?;
        if resp.status().as_u16() == 400 {
            return Ok(None); // Unknown actor.
        }
        if !resp.status().is_success() {
            return Err(BridgeError::ProfileFetch(format!("status {}", resp.status())));
        }
        let profile: BskyProfile =
            resp.json().await.map_err(|e| BridgeError::ProfileFetch(e.to_string()))?;
        Ok(Some(RoomyProfile {
            name: profile.display_name,
            avatar: profile.avatar,
            handle: Some(profile.handle),
        }))
    }
}

#[cfg(test)]
#[path = "profile_tests.rs"]
mod tests;
