// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! reqwest-backed [`DiscordApi`].
//!
//! One global-rate-limit retry is handled here (sleep for `retry_after`,
//! resend once); per-route limits are generous enough for a single bridge
//! and surface as [`BridgeError::RateLimited`] if exhausted.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::discord::api::{CreateChannel, DiscordApi, EditChannel, ExecuteWebhook};
use crate::discord::model::{Channel, ChannelKind, Message, User, Webhook};
use crate::error::{BridgeError, Result};
use crate::ids::Snowflake;

const API_BASE: &str = "https://discord.com/api/v10";

pub struct RestClient {
    token: String,
    base: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

#[derive(Deserialize)]
struct ActiveThreads {
    threads: Vec<Channel>,
}

impl RestClient {
    pub fn new(token: &str) -> Self {
        Self::with_base(token, API_BASE)
    }

    pub fn with_base(token: &str, base: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { token: token.to_owned(), base: base.trim_end_matches('/').to_owned(), http }
    }

    /// Build a URL from path segments, percent-encoding each (emoji land in
    /// reaction routes as path segments).
    fn url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base).map_err(BridgeError::platform)?;
        {
            let mut parts = url
                .path_segments_mut()
                .map_err(|()| BridgeError::platform("base url cannot be a base"))?;
            for segment in segments {
                parts.push(segment);
            }
        }
        Ok(url)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bot {}", self.token))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let retry = req.try_clone();
        let resp = self.auth(req).send().await.map_err(BridgeError::platform)?;
        self.check(resp, retry).await
    }

    async fn check(
        &self,
        resp: reqwest::Response,
        retry: Option<reqwest::RequestBuilder>,
    ) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        match status.as_u16() {
            429 => {
                let retry_after_secs = serde_json::from_str::<RateLimitBody>(&body)
                    .map(|b| b.retry_after)
                    .unwrap_or(1.0);
                if let Some(retry_req) = retry {
                    tracing::debug!(retry_after_secs, "rate limited, retrying once");
                    tokio::time::sleep(Duration::from_secs_f64(retry_after_secs)).await;
                    let resp =
                        self.auth(retry_req).send().await.map_err(BridgeError::platform)?;
                    if resp.status().is_success() {
                        return Ok(resp);
                    }
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    if status.as_u16() == 429 {
                        return Err(BridgeError::RateLimited { retry_after_secs });
                    }
                    return Err(BridgeError::platform(format!("{status}: {body}")));
                }
                Err(BridgeError::RateLimited { retry_after_secs })
            }
            403 => Err(BridgeError::Permission(body)),
            _ => Err(BridgeError::platform(format!("{status}: {body}"))),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: reqwest::Url) -> Result<T> {
        let resp = self.send(self.http.get(url)).await?;
        resp.json().await.map_err(BridgeError::decode)
    }
}

#[async_trait]
impl DiscordApi for RestClient {
    async fn current_user(&self) -> Result<User> {
        self.get_json(self.url(&["users", "@me"])?).await
    }

    async fn guild_channels(&self, guild: Snowflake) -> Result<Vec<Channel>> {
        self.get_json(self.url(&["guilds", &guild.to_string(), "channels"])?).await
    }

    async fn channel(&self, channel: Snowflake) -> Result<Channel> {
        self.get_json(self.url(&["channels", &channel.to_string()])?).await
    }

    async fn create_channel(&self, guild: Snowflake, params: CreateChannel) -> Result<Channel> {
        let url = self.url(&["guilds", &guild.to_string(), "channels"])?;
        let resp = self.send(self.http.post(url).json(&params)).await?;
        resp.json().await.map_err(BridgeError::decode)
    }

    async fn edit_channel(&self, channel: Snowflake, params: EditChannel) -> Result<Channel> {
        let url = self.url(&["channels", &channel.to_string()])?;
        let resp = self.send(self.http.patch(url).json(&params)).await?;
        resp.json().await.map_err(BridgeError::decode)
    }

    async fn create_thread(&self, channel: Snowflake, name: String) -> Result<Channel> {
        let url = self.url(&["channels", &channel.to_string(), "threads"])?;
        let body = serde_json::json!({ "name": name, "type": u8::from(ChannelKind::PublicThread) });
        let resp = self.send(self.http.post(url).json(&body)).await?;
        resp.json().await.map_err(BridgeError::decode)
    }

    async fn active_threads(&self, guild: Snowflake) -> Result<Vec<Channel>> {
        let url = self.url(&["guilds", &guild.to_string(), "threads", "active"])?;
        let listing: ActiveThreads = self.get_json(url).await?;
        Ok(listing.threads)
    }

    async fn messages_after(
        &self,
        channel: Snowflake,
        after: Option<Snowflake>,
        limit: u8,
    ) -> Result<Vec<Message>> {
        let mut url = self.url(&["channels", &channel.to_string(), "messages"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(after) = after {
                query.append_pair("after", &after.to_string());
            }
        }
        let mut messages: Vec<Message> = self.get_json(url).await?;
        // The API returns newest first; callers walk oldest first.
        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    async fn message(&self, channel: Snowflake, message: Snowflake) -> Result<Message> {
        self.get_json(self.url(&[
            "channels",
            &channel.to_string(),
            "messages",
            &message.to_string(),
        ])?)
        .await
    }

    async fn reaction_users(
        &self,
        channel: Snowflake,
        message: Snowflake,
        emoji: &str,
    ) -> Result<Vec<User>> {
        let mut url = self.url(&[
            "channels",
            &channel.to_string(),
            "messages",
            &message.to_string(),
            "reactions",
            emoji,
        ])?;
        url.query_pairs_mut().append_pair("limit", "100");
        self.get_json(url).await
    }

    async fn create_reaction(
        &self,
        channel: Snowflake,
        message: Snowflake,
        emoji: &str,
    ) -> Result<()> {
        let url = self.url(&[
            "channels",
            &channel.to_string(),
            "messages",
            &message.to_string(),
            "reactions",
            emoji,
            "@me",
        ])?;
        self.send(self.http.put(url).header("Content-Length", "0")).await?;
        Ok(())
    }

    async fn delete_own_reaction(
        &self,
        channel: Snowflake,
        message: Snowflake,
        emoji: &str,
    ) -> Result<()> {
        let url = self.url(&[
            "channels",
            &channel.to_string(),
            "messages",
            &message.to_string(),
            "reactions",
            emoji,
            "@me",
        ])?;
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn create_webhook(&self, channel: Snowflake, name: &str) -> Result<Webhook> {
        let url = self.url(&["channels", &channel.to_string(), "webhooks"])?;
        let resp = self.send(self.http.post(url).json(&serde_json::json!({ "name": name }))).await?;
        resp.json().await.map_err(BridgeError::decode)
    }

    async fn execute_webhook(
        &self,
        webhook: Snowflake,
        token: &str,
        params: ExecuteWebhook,
    ) -> Result<Message> {
        let mut url = self.url(&["webhooks", &webhook.to_string(), token])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("wait", "true");
            if let Some(thread) = params.thread_id {
                query.append_pair("thread_id", &thread.to_string());
            }
        }
        let resp = self.send(self.http.post(url).json(&params)).await?;
        resp.json().await.map_err(BridgeError::decode)
    }

    async fn edit_webhook_message(
        &self,
        webhook: Snowflake,
        token: &str,
        message: Snowflake,
        content: String,
    ) -> Result<Message> {
        let url = self.url(&[
            "webhooks",
            &webhook.to_string(),
            token,
            "messages",
            &message.to_string(),
        ])?;
        let resp = self
            .send(self.http.patch(url).json(&serde_json::json!({ "content": content })))
            .await?;
        resp.json().await.map_err(BridgeError::decode)
    }

    async fn delete_webhook_message(
        &self,
        webhook: Snowflake,
        token: &str,
        message: Snowflake,
    ) -> Result<()> {
        let url = self.url(&[
            "webhooks",
            &webhook.to_string(),
            token,
            "messages",
            &message.to_string(),
        ])?;
        self.send(self.http.delete(url)).await?;
        Ok(())
    }
}
