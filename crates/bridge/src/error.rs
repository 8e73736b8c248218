// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Error kinds for the bridge core.
///
/// Each variant maps to one handling policy: storage errors abort the
/// current event without advancing the cursor, permission errors are
/// logged and skipped, stale edits and echoes are silent skips.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Backing-store failure. The current event is aborted and the stream
    /// cursor is not advanced, so the event is retried on restart.
    Storage(String),
    /// A mapping registration would violate the bijection invariant.
    Conflict { key: String, existing: String, incoming: String },
    /// A prerequisite mapping does not exist yet; the operation is a no-op.
    MappingMissing(String),
    /// An edit older than (or identical to) the already-applied one.
    StaleEdit,
    /// The event was produced by this bridge and must not round-trip.
    Echo,
    /// Discord refused the call for permission reasons; skip and continue.
    Permission(String),
    /// Discord asked us to back off; the REST client retries internally,
    /// this surfaces only when retries are exhausted.
    RateLimited { retry_after_secs: f64 },
    /// External profile lookup failed; retried after the attempt TTL.
    ProfileFetch(String),
    /// Any other Discord or Roomy transport/API failure.
    Platform(String),
    /// A wire payload did not parse.
    Decode(String),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

impl BridgeError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Conflict { .. } => "conflict",
            Self::MappingMissing(_) => "mapping_missing",
            Self::StaleEdit => "stale_edit",
            Self::Echo => "echo",
            Self::Permission(_) => "permission",
            Self::RateLimited { .. } => "rate_limited",
            Self::ProfileFetch(_) => "profile_fetch",
            Self::Platform(_) => "platform",
            Self::Decode(_) => "decode",
        }
    }

    /// True for kinds that are expected in normal operation and handled
    /// by skipping without a warning.
    pub fn is_silent_skip(&self) -> bool {
        matches!(self, Self::StaleEdit | Self::Echo)
    }

    pub fn storage(err: impl fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn platform(err: impl fmt::Display) -> Self {
        Self::Platform(err.to_string())
    }

    pub fn decode(err: impl fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(msg) => write!(f, "storage: {msg}"),
            Self::Conflict { key, existing, incoming } => {
                write!(f, "mapping conflict on {key}: {existing} already registered, refusing {incoming}")
            }
            Self::MappingMissing(key) => write!(f, "no mapping for {key}"),
            Self::StaleEdit => f.write_str("stale edit"),
            Self::Echo => f.write_str("own echo"),
            Self::Permission(msg) => write!(f, "permission: {msg}"),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {retry_after_secs}s")
            }
            Self::ProfileFetch(msg) => write!(f, "profile fetch: {msg}"),
            Self::Platform(msg) => write!(f, "platform: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
