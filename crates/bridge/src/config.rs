// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ids::Snowflake;

/// Configuration for the bridge process.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "roomybridge", about = "Bidirectional Discord ↔ Roomy bridge")]
pub struct BridgeConfig {
    /// Path to the embedded database file.
    #[arg(long, default_value = "roomybridge.redb", env = "BRIDGE_STORE_PATH")]
    pub store_path: PathBuf,

    /// Discord bot token.
    #[arg(long, env = "BRIDGE_DISCORD_TOKEN")]
    pub discord_token: String,

    /// Base URL of the Roomy space stream service.
    #[arg(long, default_value = "https://stream.roomy.chat", env = "BRIDGE_ROOMY_URL")]
    pub roomy_url: String,

    /// Path to the pairings JSON file.
    #[arg(long, default_value = "pairings.json", env = "BRIDGE_PAIRINGS")]
    pub pairings: PathBuf,
}

/// One configured (guild, space) pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pairing {
    pub guild_id: Snowflake,
    pub space_id: String,
}

/// Persisted pairing registry.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PairingsFile {
    pub pairings: Vec<Pairing>,
}

/// Load the pairings file; a missing file is an empty registry.
pub fn load_pairings(path: &Path) -> anyhow::Result<PairingsFile> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PairingsFile::default()),
        Err(e) => Err(e.into()),
    }
}

/// Save the pairings file atomically (write tmp + rename).
pub fn save_pairings(path: &Path, pairings: &PairingsFile) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(pairings)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
