// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket-backed [`SpaceClient`].
//!
//! Subscribes to `<ws-base>/spaces/<did>/stream?cursor=N` and reads JSON
//! [`StreamMessage`] frames; appends go over HTTP to
//! `<http-base>/spaces/<did>/events`. Reconnects with exponential backoff;
//! on reconnect the subscription resumes from the last delivered batch
//! index, so a dropped connection cannot skip events.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::roomy::client::{SpaceClient, StreamMessage};
use crate::roomy::events::Event;

pub struct WsSpaceClient {
    http_base: String,
    space_did: String,
    http: reqwest::Client,
}

impl WsSpaceClient {
    pub fn new(base_url: &str, space_did: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http_base: base_url.trim_end_matches('/').to_owned(), space_did: space_did.to_owned(), http }
    }

    fn ws_url(&self, cursor: Option<u64>) -> String {
        let ws_base = if self.http_base.starts_with("https://") {
            self.http_base.replacen("https://", "wss://", 1)
        } else {
            self.http_base.replacen("http://", "ws://", 1)
        };
        match cursor {
            Some(cursor) => format!("{ws_base}/spaces/{}/stream?cursor={cursor}", self.space_did),
            None => format!("{ws_base}/spaces/{}/stream", self.space_did),
        }
    }
}

#[async_trait]
impl SpaceClient for WsSpaceClient {
    async fn append(&self, events: &[Event]) -> Result<()> {
        let url = format!("{}/spaces/{}/events", self.http_base, self.space_did);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "events": events }))
            .send()
            .await
            .map_err(BridgeError::platform)?;
        resp.error_for_status().map_err(BridgeError::platform)?;
        Ok(())
    }

    async fn subscribe(
        &self,
        cursor: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.ws_url(cursor);
        let space = self.space_did.clone();
        // Shared resume point, advanced as batches are delivered.
        let resume = Mutex::new(cursor);
        let base = self.http_base.clone();

        tokio::spawn(async move {
            let mut backoff = Duration::from_millis(250);
            let max_backoff = Duration::from_secs(15);
            let mut url = client;

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                match tokio_tungstenite::connect_async(&url).await {
                    Ok((ws_stream, _)) => {
                        backoff = Duration::from_millis(250);
                        let (_, mut read) = ws_stream.split();

                        loop {
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                msg = read.next() => {
                                    match msg {
                                        Some(Ok(WsMessage::Text(text))) => {
                                            match serde_json::from_str::<StreamMessage>(&text) {
                                                Ok(message) => {
                                                    if let StreamMessage::Batch(ref batch) = message {
                                                        *resume.lock() = Some(batch.index);
                                                    }
                                                    if tx.send(message).is_err() {
                                                        return; // Receiver gone.
                                                    }
                                                }
                                                Err(e) => {
                                                    tracing::warn!(space = %space, err = %e, "undecodable stream frame");
                                                }
                                            }
                                        }
                                        Some(Ok(_)) => {} // Ignore binary, ping, pong.
                                        Some(Err(e)) => {
                                            tracing::debug!(space = %space, err = %e, "stream ws error");
                                            break;
                                        }
                                        None => break, // Stream ended.
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(space = %space, err = %e, "stream connect failed");
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(max_backoff);

                // Rebuild the URL so the reconnect resumes, not replays.
                let ws_base = if base.starts_with("https://") {
                    base.replacen("https://", "wss://", 1)
                } else {
                    base.replacen("http://", "ws://", 1)
                };
                url = match *resume.lock() {
                    Some(cursor) => format!("{ws_base}/spaces/{space}/stream?cursor={cursor}"),
                    None => format!("{ws_base}/spaces/{space}/stream"),
                };
            }
        });

        Ok(rx)
    }
}
