// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes shared across the bridge: Discord snowflakes, Roomy
//! event ULIDs, user DIDs, and the derived forms (surrogate DIDs, webhook
//! nonces, topic markers) that tie the two platforms together.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of ULID characters carried in a Discord message nonce.
///
/// Discord caps nonces at 25 characters, one short of a full ULID, so the
/// bridge truncates and matches on the prefix.
pub const NONCE_LEN: usize = 25;

// -- Snowflake ----------------------------------------------------------------

/// 64-bit Discord snowflake. Serialized as a decimal string at boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Snowflake(pub u64);

impl Snowflake {
    /// The `idMap` key for a room/channel mapping. Message mappings use the
    /// bare decimal; room keys carry a `room:` prefix so the two cannot
    /// collide within one table.
    pub fn room_key(&self) -> String {
        format!("room:{}", self.0)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Snowflake)
    }
}

impl From<u64> for Snowflake {
    fn from(raw: u64) -> Self {
        Snowflake(raw)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Discord serializes snowflakes as strings; accept bare integers too.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Num(n) => Ok(Snowflake(n)),
        }
    }
}

// -- Event ULID ---------------------------------------------------------------

/// 26-character lexicographically sortable Roomy event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventUlid(String);

impl EventUlid {
    /// Mint a fresh time-prefixed ULID.
    pub fn generate() -> Self {
        EventUlid(ulid::Ulid::new().to_string())
    }

    /// Accept a 26-char Crockford base32 string.
    pub fn parse(s: &str) -> Option<Self> {
        ulid::Ulid::from_string(s).ok().map(|_| EventUlid(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 25 characters, used as the Discord message nonce.
    pub fn nonce(&self) -> &str {
        &self.0[..NONCE_LEN.min(self.0.len())]
    }
}

impl fmt::Display for EventUlid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// -- User DID -----------------------------------------------------------------

/// Opaque decentralized identifier for a Roomy user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserDid(String);

const SURROGATE_PREFIX: &str = "did:x:";

impl UserDid {
    pub fn new(did: impl Into<String>) -> Self {
        UserDid(did.into())
    }

    /// The surrogate identity representing a Discord user on Roomy.
    pub fn surrogate(user: Snowflake) -> Self {
        UserDid(format!("{SURROGATE_PREFIX}{user}"))
    }

    /// True if this DID was minted by [`UserDid::surrogate`]. Reactions and
    /// messages authored by a surrogate already live on Discord and must not
    /// be replayed back.
    pub fn is_surrogate(&self) -> bool {
        self.0.starts_with(SURROGATE_PREFIX)
    }

    /// Recover the Discord user behind a surrogate DID.
    pub fn surrogate_snowflake(&self) -> Option<Snowflake> {
        self.0.strip_prefix(SURROGATE_PREFIX)?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recover the channel snowflake from a `room:`-prefixed idMap key.
pub fn parse_room_key(x_key: &str) -> Option<Snowflake> {
    x_key.strip_prefix("room:")?.parse().ok()
}

// -- Topic marker -------------------------------------------------------------

/// Render the channel-topic marker that records a Roomy room mapping on the
/// Discord side: `[Synced from R: <ULID>]`.
pub fn format_topic_marker(room: &EventUlid) -> String {
    format!("[Synced from R: {room}]")
}

/// Extract a room ULID from a channel topic, tolerating surrounding prose.
pub fn parse_topic_marker(topic: &str) -> Option<EventUlid> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let re = MARKER.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // literal pattern
        Regex::new(r"\[Synced from R: ([0-9A-HJKMNP-TV-Z]{26})\]").unwrap()
    });
    let captures = re.captures(topic)?;
    EventUlid::parse(captures.get(1)?.as_str())
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
