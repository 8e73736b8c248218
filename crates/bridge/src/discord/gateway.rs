// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discord gateway consumer: one WebSocket connection feeding typed
//! [`GatewayEvent`]s to the orchestrator. Handles hello/identify, the
//! heartbeat cadence, and reconnect-with-backoff. Session resume is not
//! attempted; a re-identify replays nothing, which is safe because every
//! downstream write is idempotent.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::discord::model::{Channel, Message, MessageAttachment, ReactionEmoji, User};
use crate::ids::Snowflake;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILDS | GUILD_MESSAGES | GUILD_MESSAGE_REACTIONS | MESSAGE_CONTENT.
pub const INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 10) | (1 << 15);

// -- Typed events -------------------------------------------------------------

/// Partial message delivered by `MESSAGE_UPDATE`; absent fields were not
/// touched by the update.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageUpdate {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Option<Vec<MessageAttachment>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionEvent {
    pub user_id: Snowflake,
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub emoji: ReactionEmoji,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDelete {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready { user: User },
    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),
    ThreadCreate(Channel),
    MessageCreate(Box<Message>),
    MessageUpdate(Box<MessageUpdate>),
    MessageDelete(MessageDelete),
    ReactionAdd(ReactionEvent),
    ReactionRemove(ReactionEvent),
}

impl GatewayEvent {
    /// Guild the event belongs to, for orchestrator routing. `Ready` and
    /// DM-scoped events have none.
    pub fn guild_id(&self) -> Option<Snowflake> {
        match self {
            Self::Ready { .. } => None,
            Self::ChannelCreate(c) | Self::ChannelUpdate(c) | Self::ChannelDelete(c)
            | Self::ThreadCreate(c) => c.guild_id,
            Self::MessageCreate(m) => m.guild_id,
            Self::MessageUpdate(m) => m.guild_id,
            Self::MessageDelete(d) => d.guild_id,
            Self::ReactionAdd(r) | Self::ReactionRemove(r) => r.guild_id,
        }
    }
}

// -- Wire payloads ------------------------------------------------------------

#[derive(Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: serde_json::Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

#[derive(Deserialize)]
struct Ready {
    user: User,
}

/// Decode one dispatch (`op 0`) frame into a typed event. Unknown dispatch
/// names are dropped.
fn parse_dispatch(name: &str, data: serde_json::Value) -> Option<GatewayEvent> {
    let event = match name {
        "READY" => GatewayEvent::Ready { user: serde_json::from_value::<Ready>(data).ok()?.user },
        "CHANNEL_CREATE" => GatewayEvent::ChannelCreate(serde_json::from_value(data).ok()?),
        "CHANNEL_UPDATE" => GatewayEvent::ChannelUpdate(serde_json::from_value(data).ok()?),
        "CHANNEL_DELETE" => GatewayEvent::ChannelDelete(serde_json::from_value(data).ok()?),
        "THREAD_CREATE" => GatewayEvent::ThreadCreate(serde_json::from_value(data).ok()?),
        "MESSAGE_CREATE" => GatewayEvent::MessageCreate(serde_json::from_value(data).ok()?),
        "MESSAGE_UPDATE" => GatewayEvent::MessageUpdate(serde_json::from_value(data).ok()?),
        "MESSAGE_DELETE" => GatewayEvent::MessageDelete(serde_json::from_value(data).ok()?),
        "MESSAGE_REACTION_ADD" => GatewayEvent::ReactionAdd(serde_json::from_value(data).ok()?),
        "MESSAGE_REACTION_REMOVE" => {
            GatewayEvent::ReactionRemove(serde_json::from_value(data).ok()?)
        }
        _ => return None,
    };
    Some(event)
}

// -- Connection task ----------------------------------------------------------

/// Spawn the gateway consumer. Events flow to `tx` until `cancel` fires.
pub fn spawn(token: String, tx: mpsc::UnboundedSender<GatewayEvent>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut backoff = Duration::from_secs(1);
        let max_backoff = Duration::from_secs(60);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match run_connection(&token, &tx, &cancel).await {
                Ok(()) => return, // Cancelled.
                Err(e) => {
                    tracing::warn!(err = %e, "gateway connection lost");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(max_backoff);
        }
    });
}

/// Drive one gateway connection to completion. `Ok(())` means cancellation;
/// any disconnect or protocol surprise is an `Err` and triggers reconnect.
async fn run_connection(
    token: &str,
    tx: &mpsc::UnboundedSender<GatewayEvent>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(GATEWAY_URL).await?;
    let (mut write, mut read) = ws_stream.split();

    let mut heartbeat: Option<tokio::time::Interval> = None;
    let mut last_seq: Option<u64> = None;
    let mut identified = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = async {
                match heartbeat.as_mut() {
                    Some(interval) => { interval.tick().await; }
                    // No hello yet; park until the reader arm installs one.
                    None => std::future::pending().await,
                }
            } => {
                let beat = serde_json::json!({ "op": 1, "d": last_seq });
                write.send(WsMessage::Text(beat.to_string().into())).await?;
            }
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(frame))) => {
                        anyhow::bail!("gateway closed: {frame:?}");
                    }
                    Some(Ok(_)) => continue, // Binary, ping, pong.
                    Some(Err(e)) => return Err(e.into()),
                    None => anyhow::bail!("gateway stream ended"),
                };
                let payload: GatewayPayload = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(err = %e, "undecodable gateway frame");
                        continue;
                    }
                };
                if let Some(seq) = payload.s {
                    last_seq = Some(seq);
                }

                match payload.op {
                    // Hello: start heartbeating, then identify.
                    10 => {
                        let hello: Hello = serde_json::from_value(payload.d)?;
                        let mut interval = tokio::time::interval(Duration::from_millis(
                            hello.heartbeat_interval,
                        ));
                        interval.set_missed_tick_behavior(
                            tokio::time::MissedTickBehavior::Delay,
                        );
                        heartbeat = Some(interval);

                        if !identified {
                            let identify = serde_json::json!({
                                "op": 2,
                                "d": {
                                    "token": token,
                                    "intents": INTENTS,
                                    "properties": {
                                        "os": std::env::consts::OS,
                                        "browser": "roomybridge",
                                        "device": "roomybridge",
                                    },
                                },
                            });
                            write.send(WsMessage::Text(identify.to_string().into())).await?;
                            identified = true;
                        }
                    }
                    // Immediate heartbeat request.
                    1 => {
                        let beat = serde_json::json!({ "op": 1, "d": last_seq });
                        write.send(WsMessage::Text(beat.to_string().into())).await?;
                    }
                    // Heartbeat ack.
                    11 => {}
                    // Reconnect / invalid session: drop and re-identify.
                    7 | 9 => anyhow::bail!("gateway asked for reconnect (op {})", payload.op),
                    // Dispatch.
                    0 => {
                        let Some(name) = payload.t.as_deref() else { continue };
                        if let Some(event) = parse_dispatch(name, payload.d) {
                            if tx.send(event).is_err() {
                                return Ok(()); // Orchestrator gone.
                            }
                        }
                    }
                    other => {
                        tracing::debug!(op = other, "unhandled gateway op");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
