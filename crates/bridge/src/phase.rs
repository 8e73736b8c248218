// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bridge lifecycle phases.
//!
//! A bridge moves through exactly one forward pass:
//!
//! ```text
//! backfillR → backfillXAndSyncToR → syncRToX → listening
//! ```
//!
//! Cross-phase work serializes on [`PhaseCell::reached`], which resolves as
//! soon as the bridge is at or past the awaited phase. Backwards
//! transitions never happen; an attempt is a bug and is logged and ignored.

use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Replay the Roomy stream from the stored cursor; absorb our own
    /// echoes, queue native events for Discord.
    BackfillR,
    /// Enumerate Discord state and emit it to Roomy in batches.
    BackfillXAndSyncToR,
    /// Drain the queued native events against Discord.
    SyncRToX,
    /// Steady state: both directions flow immediately.
    Listening,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BackfillR => "backfillR",
            Self::BackfillXAndSyncToR => "backfillXAndSyncToR",
            Self::SyncRToX => "syncRToX",
            Self::Listening => "listening",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, awaitable phase holder.
pub struct PhaseCell {
    tx: watch::Sender<Phase>,
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Phase::BackfillR);
        Self { tx }
    }

    pub fn current(&self) -> Phase {
        *self.tx.borrow()
    }

    /// Move forward to `next`. Re-entering the current phase is a no-op;
    /// moving backwards is refused.
    pub fn advance(&self, next: Phase) {
        self.tx.send_if_modified(|current| {
            if next > *current {
                tracing::debug!(from = %current, to = %next, "phase transition");
                *current = next;
                true
            } else {
                if next < *current {
                    tracing::error!(from = %current, to = %next, "refusing backwards phase transition");
                }
                false
            }
        });
    }

    /// Resolve once the bridge is at or past `target`.
    pub async fn reached(&self, target: Phase) {
        let mut rx = self.tx.subscribe();
        // Err means the cell was dropped mid-shutdown; nothing left to wait for.
        let _ = rx.wait_for(|phase| *phase >= target).await;
    }
}

#[cfg(test)]
#[path = "phase_tests.rs"]
mod tests;
