// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic content fingerprints.
//!
//! Every gate in the bridge that asks "has this changed since last sync"
//! (edits, profiles, the sidebar) compares SHA-256 digests of a stable JSON
//! form. Values are converted to `serde_json::Value` first so object keys
//! serialize in sorted order regardless of struct field declaration order.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Profile digests are truncated to half a SHA-256 hex string.
const PROFILE_HASH_LEN: usize = 32;

/// Hex SHA-256 of the canonical JSON serialization of `value`.
pub fn fingerprint<T: Serialize>(value: &T) -> String {
    let canonical = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Fingerprint of a message's content and attachment URLs, used to reject
/// duplicate edits and to key the reconciliation duplicate table.
pub fn edit_hash(content: &str, attachment_urls: &[String]) -> String {
    fingerprint(&serde_json::json!({
        "content": content,
        "attachments": attachment_urls,
    }))
}

/// 32-char digest of the identity fields mirrored to Roomy.
pub fn profile_hash(username: &str, global_name: Option<&str>, avatar: Option<&str>) -> String {
    let mut full = fingerprint(&serde_json::json!({
        "username": username,
        "globalName": global_name,
        "avatar": avatar,
    }));
    full.truncate(PROFILE_HASH_LEN);
    full
}

#[cfg(test)]
#[path = "hash_tests.rs"]
mod tests;
