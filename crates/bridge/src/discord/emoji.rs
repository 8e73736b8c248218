// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Emoji canonicalization.
//!
//! Reactions cross the bridge as a single canonical string: unicode emoji
//! as their literal NFC-normalized characters, custom emoji as `name:id`.
//! The canonical form doubles as the Discord API form (reaction endpoints
//! take either the literal emoji or `name:id`, never angle brackets).

use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::discord::model::ReactionEmoji;

/// Canonicalize an emoji string as it appears in message content or a
/// Roomy reaction value: `<:party:1234>` / `<a:party:1234>` → `party:1234`,
/// anything else → NFC-normalized literal.
pub fn canonical(raw: &str) -> String {
    static CUSTOM: OnceLock<Regex> = OnceLock::new();
    let re = CUSTOM.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // literal pattern
        Regex::new(r"^<(a?):([A-Za-z0-9_~]+):([0-9]+)>$").unwrap()
    });
    if let Some(captures) = re.captures(raw.trim()) {
        if let (Some(name), Some(id)) = (captures.get(2), captures.get(3)) {
            return format!("{}:{}", name.as_str(), id.as_str());
        }
    }
    raw.trim().nfc().collect()
}

/// Canonical form of a gateway reaction emoji.
pub fn from_reaction(emoji: &ReactionEmoji) -> String {
    match (&emoji.id, &emoji.name) {
        (Some(id), Some(name)) => format!("{name}:{id}"),
        (None, Some(name)) => name.nfc().collect(),
        // Emoji deleted from the guild; only the id survives.
        (Some(id), None) => format!("_:{id}"),
        (None, None) => String::new(),
    }
}

/// True if the canonical form refers to a custom (uploaded) emoji.
pub fn is_custom(canonical: &str) -> bool {
    canonical.rsplit_once(':').is_some_and(|(name, id)| {
        !name.is_empty() && !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
    })
}

#[cfg(test)]
#[path = "emoji_tests.rs"]
mod tests;
