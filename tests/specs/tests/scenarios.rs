// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end bridge scenarios: one pairing, a fake Discord, a hand-driven
//! space stream.

use std::sync::Arc;

use roomybridge::discord::gateway::{GatewayEvent, MessageDelete, MessageUpdate, ReactionEvent};
use roomybridge::discord::model::ReactionEmoji;
use roomybridge::ids::{Snowflake, UserDid};
use roomybridge::phase::Phase;
use roomybridge::roomy::events::{Body, Event, Payload};

use roomybridge_specs::{
    await_phase, bot_user, eventually, human, listening_harness, message, registered_harness,
    settle, text_channel, FakeDiscord, BOT_ID, GUILD,
};

fn reaction(user: u64, message_id: u64, emoji: &str) -> ReactionEvent {
    ReactionEvent {
        user_id: Snowflake(user),
        channel_id: Snowflake(100),
        message_id: Snowflake(message_id),
        guild_id: Some(GUILD),
        emoji: ReactionEmoji { id: None, name: Some(emoji.to_owned()), animated: false },
    }
}

// ── Scenario 1: basic channel create ──────────────────────────────────

#[tokio::test]
async fn channel_create_becomes_room() -> anyhow::Result<()> {
    let discord = Arc::new(FakeDiscord::new());
    let h = listening_harness(discord).await?;

    let channel = text_channel(100, "general");
    h.discord.seed_channel(channel.clone());
    h.orchestrator.handle_gateway_event(GatewayEvent::ChannelCreate(channel)).await;

    eventually(|| !h.space.appended_of_kind("room.createRoom").is_empty()).await?;
    let rooms = h.space.appended_of_kind("room.createRoom");
    assert_eq!(rooms.len(), 1);

    let json = serde_json::to_value(&rooms[0])?;
    assert_eq!(json["name"], "general");
    assert_eq!(json["roomKind"], "channel");
    let origin = &json["extensions"]["space.roomy.extension.discordOrigin.v0"];
    assert_eq!(origin["snowflake"], "100");
    assert_eq!(origin["guildId"], "1");

    // The mapping is durable and points at exactly that event.
    assert_eq!(h.repo().get_r("room:100")?, Some(rooms[0].id.clone()));
    Ok(())
}

// ── Scenario 2: duplicate Discord message ─────────────────────────────

#[tokio::test]
async fn duplicate_message_emits_once() -> anyhow::Result<()> {
    let discord = Arc::new(FakeDiscord::new());
    let h = listening_harness(discord).await?;

    let channel = text_channel(100, "general");
    h.discord.seed_channel(channel.clone());
    h.orchestrator.handle_gateway_event(GatewayEvent::ChannelCreate(channel)).await;
    eventually(|| !h.space.appended_of_kind("room.createRoom").is_empty()).await?;

    let msg = message(5000, 100, human(7, "alice"), "hello");
    h.orchestrator
        .handle_gateway_event(GatewayEvent::MessageCreate(Box::new(msg.clone())))
        .await;
    h.orchestrator
        .handle_gateway_event(GatewayEvent::MessageCreate(Box::new(msg)))
        .await;
    settle().await;

    let created = h.space.appended_of_kind("message.createMessage");
    assert_eq!(created.len(), 1);
    assert_eq!(h.repo().get_r("5000")?, Some(created[0].id.clone()));
    Ok(())
}

// ── Scenario 3: nonce-preserving round trip ───────────────────────────

#[tokio::test]
async fn native_message_round_trip_preserves_nonce_and_suppresses_echo() -> anyhow::Result<()> {
    let discord = Arc::new(FakeDiscord::new());
    let h = listening_harness(discord).await?;

    // Map channel 100 first.
    let channel = text_channel(100, "general");
    h.discord.seed_channel(channel.clone());
    h.orchestrator.handle_gateway_event(GatewayEvent::ChannelCreate(channel)).await;
    eventually(|| !h.space.appended_of_kind("room.createRoom").is_empty()).await?;
    let room = h.space.appended_of_kind("room.createRoom")[0].id.clone();

    // A native Roomy message arrives on the live stream.
    let mut native = Event::new(Payload::CreateMessage {
        room,
        body: Body::markdown("hi"),
    });
    native.author = Some(UserDid::new("did:plc:alice"));
    h.space.push_batch(1, vec![native.clone()]);

    eventually(|| h.discord.executed_count() == 1).await?;
    let executed = h.discord.executed.lock()[0].clone();
    assert_eq!(executed.params.nonce.as_deref(), Some(native.id.nonce()));
    assert_eq!(executed.params.nonce.as_ref().map(String::len), Some(25));

    // Discord echoes the webhook post back over the gateway; it must not
    // re-enter the space.
    let mut echo = message(executed.message_id.0, 100, bot_user(), "hi");
    echo.webhook_id = Some(executed.webhook);
    echo.nonce = executed.params.nonce.clone();
    h.orchestrator.handle_gateway_event(GatewayEvent::MessageCreate(Box::new(echo))).await;
    settle().await;

    assert_eq!(h.space.appended_of_kind("message.createMessage").len(), 0);
    Ok(())
}

// ── Scenario 4: reaction aggregate ────────────────────────────────────

#[tokio::test]
async fn reaction_aggregate_drives_bot_reaction() -> anyhow::Result<()> {
    let discord = Arc::new(FakeDiscord::new());
    let h = listening_harness(discord).await?;

    let channel = text_channel(100, "general");
    h.discord.seed_channel(channel.clone());
    h.orchestrator.handle_gateway_event(GatewayEvent::ChannelCreate(channel)).await;
    eventually(|| !h.space.appended_of_kind("room.createRoom").is_empty()).await?;

    let msg = message(5000, 100, human(7, "carol"), "react to me");
    h.orchestrator.handle_gateway_event(GatewayEvent::MessageCreate(Box::new(msg))).await;
    eventually(|| !h.space.appended_of_kind("message.createMessage").is_empty()).await?;
    let target = h.space.appended_of_kind("message.createMessage")[0].id.clone();

    let add = |user: &str| {
        let mut event = Event::new(Payload::AddReaction {
            reaction_to: target.clone(),
            reaction: "👍".to_owned(),
        });
        event.author = Some(UserDid::new(user));
        event
    };
    let remove = |user: &str| {
        let mut event = Event::new(Payload::RemoveReaction {
            reaction_to: target.clone(),
            reaction: "👍".to_owned(),
        });
        event.author = Some(UserDid::new(user));
        event
    };

    // alice reacts: the bot mirrors it on Discord.
    h.space.push_batch(1, vec![add("did:plc:alice")]);
    eventually(|| h.discord.reactions_added.lock().len() == 1).await?;

    // bob piles on: no second bot reaction.
    h.space.push_batch(2, vec![add("did:plc:bob")]);
    settle().await;
    assert_eq!(h.discord.reactions_added.lock().len(), 1);

    // alice leaves: bob still reacting, bot reaction stays.
    h.space.push_batch(3, vec![remove("did:plc:alice")]);
    settle().await;
    assert!(h.discord.reactions_removed.lock().is_empty());

    // bob leaves: the set empties and the bot reaction goes.
    h.space.push_batch(4, vec![remove("did:plc:bob")]);
    eventually(|| h.discord.reactions_removed.lock().len() == 1).await?;
    Ok(())
}

// ── Scenario 5: bot echo suppression ──────────────────────────────────

#[tokio::test]
async fn bot_reaction_echo_is_discarded() -> anyhow::Result<()> {
    let discord = Arc::new(FakeDiscord::new());
    let h = listening_harness(discord).await?;

    let channel = text_channel(100, "general");
    h.discord.seed_channel(channel.clone());
    h.orchestrator.handle_gateway_event(GatewayEvent::ChannelCreate(channel)).await;
    eventually(|| !h.space.appended_of_kind("room.createRoom").is_empty()).await?;
    h.orchestrator
        .handle_gateway_event(GatewayEvent::MessageCreate(Box::new(message(
            5000,
            100,
            human(7, "carol"),
            "hello",
        ))))
        .await;
    eventually(|| !h.space.appended_of_kind("message.createMessage").is_empty()).await?;

    h.orchestrator
        .handle_gateway_event(GatewayEvent::ReactionAdd(reaction(BOT_ID.0, 5000, "👍")))
        .await;
    settle().await;

    assert!(h.space.appended_of_kind("reaction.addBridgedReaction").is_empty());
    assert!(h.repo().reaction_event(Snowflake(5000), BOT_ID, "👍")?.is_none());
    Ok(())
}

// ── Scenario 6: stale edit ────────────────────────────────────────────

#[tokio::test]
async fn stale_edit_is_silently_dropped() -> anyhow::Result<()> {
    let discord = Arc::new(FakeDiscord::new());
    let h = listening_harness(discord).await?;

    let channel = text_channel(100, "general");
    h.discord.seed_channel(channel.clone());
    h.orchestrator.handle_gateway_event(GatewayEvent::ChannelCreate(channel)).await;
    eventually(|| !h.space.appended_of_kind("room.createRoom").is_empty()).await?;
    h.orchestrator
        .handle_gateway_event(GatewayEvent::MessageCreate(Box::new(message(
            5000,
            100,
            human(7, "alice"),
            "original",
        ))))
        .await;
    eventually(|| !h.space.appended_of_kind("message.createMessage").is_empty()).await?;

    let edit_at = |ms: i64, content: &str| MessageUpdate {
        id: Snowflake(5000),
        channel_id: Snowflake(100),
        guild_id: Some(GUILD),
        author: Some(human(7, "alice")),
        content: Some(content.to_owned()),
        edited_timestamp: serde_json::from_value(serde_json::json!(
            iso_ms(ms)
        ))
        .ok(),
        attachments: None,
    };

    h.orchestrator
        .handle_gateway_event(GatewayEvent::MessageUpdate(Box::new(edit_at(1000, "v1"))))
        .await;
    eventually(|| !h.space.appended_of_kind("message.editMessage").is_empty()).await?;
    let baseline = h.repo().edit_info(Snowflake(5000))?.unwrap();

    // Older timestamp: silently dropped, edit info untouched.
    h.orchestrator
        .handle_gateway_event(GatewayEvent::MessageUpdate(Box::new(edit_at(900, "v2"))))
        .await;
    settle().await;
    assert_eq!(h.space.appended_of_kind("message.editMessage").len(), 1);
    assert_eq!(h.repo().edit_info(Snowflake(5000))?.unwrap(), baseline);
    Ok(())
}

/// RFC 3339 string for a unix-ms instant.
fn iso_ms(ms: i64) -> String {
    // 1970-01-01 plus `ms`; the test values are tiny so this stays in the
    // first second of the epoch.
    format!("1970-01-01T00:00:{:02}.{:03}Z", ms / 1000, ms % 1000)
}

// ── Reconciliation: full first sync ───────────────────────────────────

#[tokio::test]
async fn first_sync_walks_structure_then_messages() -> anyhow::Result<()> {
    let discord = Arc::new(FakeDiscord::new());
    discord.seed_channel(text_channel(100, "general"));
    discord.seed_messages(
        100,
        vec![
            message(5000, 100, human(7, "alice"), "first"),
            message(5001, 100, human(8, "bob"), "second"),
        ],
    );

    let h = registered_harness(discord).await?;
    h.space.done_backfilling();
    await_phase(&h.bridge, Phase::Listening).await?;
    settle().await;

    let appended = h.space.appended.lock().clone();
    let kinds: Vec<String> = appended
        .iter()
        .map(|e| {
            serde_json::to_value(e)
                .unwrap()["kind"]
                .as_str()
                .unwrap()
                .to_owned()
        })
        .collect();

    // Structure precedes messages.
    let room_pos = kinds.iter().position(|k| k == "room.createRoom").unwrap();
    let msg_pos = kinds.iter().position(|k| k == "message.createMessage").unwrap();
    assert!(room_pos < msg_pos);
    assert_eq!(kinds.iter().filter(|k| *k == "message.createMessage").count(), 2);

    // Both messages mapped; the duplicate table knows them.
    let repo = h.repo();
    assert!(repo.get_r("5000")?.is_some());
    assert!(repo.get_r("5001")?.is_some());
    Ok(())
}

// ── Restart: replayed stream events are absorbed, not re-emitted ──────

#[tokio::test]
async fn replayed_own_events_are_absorbed() -> anyhow::Result<()> {
    let discord = Arc::new(FakeDiscord::new());
    discord.seed_channel(text_channel(100, "general"));
    discord.seed_messages(100, vec![message(5000, 100, human(7, "alice"), "hello")]);

    let h = registered_harness(discord).await?;

    // The stream already contains the events a previous run emitted.
    // (A fresh database replays them from index zero.)
    let prior_room = Event::new(Payload::CreateRoom {
        name: "general".to_owned(),
        room_kind: roomybridge::roomy::events::RoomKind::Channel,
    })
    .with_extension(
        roomybridge::roomy::events::EXT_DISCORD_ORIGIN,
        &roomybridge::roomy::events::DiscordOrigin {
            snowflake: Snowflake(100),
            guild_id: GUILD,
        },
    );
    let prior_message = Event::new(Payload::CreateMessage {
        room: prior_room.id.clone(),
        body: Body::markdown("hello"),
    })
    .with_extension(
        roomybridge::roomy::events::EXT_DISCORD_MESSAGE_ORIGIN,
        &roomybridge::roomy::events::DiscordMessageOrigin {
            snowflake: Snowflake(5000),
            channel_id: Snowflake(100),
            guild_id: GUILD,
        },
    );
    h.space.push_batch(1, vec![prior_room.clone(), prior_message.clone()]);
    h.space.done_backfilling();
    await_phase(&h.bridge, Phase::Listening).await?;
    settle().await;

    // Absorption rebuilt the mappings, so the Discord walk emitted nothing
    // new for either entity.
    assert!(h.space.appended_of_kind("room.createRoom").is_empty());
    assert!(h.space.appended_of_kind("message.createMessage").is_empty());
    let repo = h.repo();
    assert_eq!(repo.get_r("room:100")?, Some(prior_room.id.clone()));
    assert_eq!(repo.get_r("5000")?, Some(prior_message.id.clone()));
    Ok(())
}

// ── Unregister drops the namespace ────────────────────────────────────

#[tokio::test]
async fn unregister_deletes_pairing_data() -> anyhow::Result<()> {
    let discord = Arc::new(FakeDiscord::new());
    let h = listening_harness(discord).await?;

    let channel = text_channel(100, "general");
    h.discord.seed_channel(channel.clone());
    h.orchestrator.handle_gateway_event(GatewayEvent::ChannelCreate(channel)).await;
    eventually(|| h.repo().get_r("room:100").unwrap_or(None).is_some()).await?;

    h.orchestrator.unregister_pairing(GUILD).await?;
    assert!(h.repo().get_r("room:100")?.is_none());

    // Events after unregistration fall on the floor.
    h.orchestrator
        .handle_gateway_event(GatewayEvent::MessageDelete(MessageDelete {
            id: Snowflake(1),
            channel_id: Snowflake(100),
            guild_id: Some(GUILD),
        }))
        .await;
    Ok(())
}
