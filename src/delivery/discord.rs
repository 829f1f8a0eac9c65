// src/delivery/discord.rs
//! Discord REST (v10) implementation of [`Delivery`] and [`MessageFeed`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    Attachment, ChannelMessage, Delivery, ForwardTarget, ForwardedMessage, MessageFeed, RenderedItem,
};
use crate::errors::DeliveryError;
use crate::model::ChannelId;

pub const API_BASE: &str = "https://discord.com/api/v10";
/// JSON error code Discord returns when posting into an archived thread.
const THREAD_ARCHIVED: u64 = 50083;
const EMBED_COLOR: u32 = 0x5865F2;

#[derive(Clone)]
pub struct DiscordRest {
    client: Client,
    token: String,
    api_base: String,
    max_retries: u8,
}

impl DiscordRest {
    pub fn new(token: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            token,
            api_base: API_BASE.to_string(),
            max_retries: 3,
        })
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn auth(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header("Authorization", format!("Bot {}", self.token))
    }

    /// Send with retries on transport errors, 429 and 5xx. Backoff starts at
    /// 500ms and doubles per attempt.
    async fn execute<F>(&self, channel: ChannelId, build: F) -> Result<Response, DeliveryError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let err = match self.auth(build()).send().await {
                Ok(rsp) if rsp.status().is_success() => return Ok(rsp),
                Ok(rsp) => {
                    let status = rsp.status();
                    let body = rsp.text().await.unwrap_or_default();
                    if !retryable(status) {
                        return Err(classify_rejection(channel, status, &body));
                    }
                    DeliveryError::Transport(format!("HTTP {status}: {}", short(&body)))
                }
                Err(e) => DeliveryError::Transport(e.to_string()),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            debug!(channel, attempt, error = %err, "discord request failed; retrying");
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }

    async fn download(&self, att: &Attachment) -> Result<Vec<u8>, DeliveryError> {
        let rsp = self
            .client
            .get(&att.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DeliveryError::Transport(format!("attachment {}: {e}", att.filename)))?;
        let bytes = rsp
            .bytes()
            .await
            .map_err(|e| DeliveryError::Transport(format!("attachment {}: {e}", att.filename)))?;
        Ok(bytes.to_vec())
    }
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn short(body: &str) -> String {
    body.chars().take(200).collect()
}

pub(crate) fn classify_rejection(channel: ChannelId, status: StatusCode, body: &str) -> DeliveryError {
    let code = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("code").and_then(Value::as_u64));
    if code == Some(THREAD_ARCHIVED) {
        return DeliveryError::Archived(channel);
    }
    DeliveryError::Rejected(format!("HTTP {status}: {}", short(body)))
}

pub(crate) fn embed_json(item: &RenderedItem) -> Value {
    let mut embed = json!({
        "title": item.title,
        "description": item.description,
        "url": item.url,
        "color": EMBED_COLOR,
        "footer": { "text": item.footer },
    });
    if let Some(author) = &item.author {
        embed["author"] = json!({ "name": author });
    }
    if let Some(thumb) = &item.thumbnail_url {
        embed["thumbnail"] = json!({ "url": thumb });
    }
    if let Some(ts) = item.timestamp {
        embed["timestamp"] = json!(ts.to_rfc3339());
    }
    embed
}

#[derive(Deserialize)]
struct RawAttachment {
    filename: String,
    url: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
    #[serde(default)]
    embeds: Vec<Value>,
}

pub(crate) fn parse_messages(channel: ChannelId, raw: &str) -> Result<Vec<ChannelMessage>, DeliveryError> {
    let list: Vec<RawMessage> =
        serde_json::from_str(raw).map_err(|e| DeliveryError::Transport(format!("bad message list: {e}")))?;
    let mut out: Vec<ChannelMessage> = list
        .into_iter()
        .filter_map(|m| {
            let id = m.id.parse::<u64>().ok()?;
            Some(ChannelMessage {
                id,
                channel,
                content: m.content,
                attachments: m
                    .attachments
                    .into_iter()
                    .map(|a| Attachment {
                        filename: a.filename,
                        url: a.url,
                        size: a.size,
                        content_type: a.content_type,
                    })
                    .collect(),
                embeds: m.embeds,
            })
        })
        .collect();
    out.sort_by_key(|m| m.id);
    Ok(out)
}

#[async_trait]
impl Delivery for DiscordRest {
    async fn deliver(&self, channel: ChannelId, item: &RenderedItem) -> Result<(), DeliveryError> {
        let url = format!("{}/channels/{channel}/messages", self.api_base);
        let body = json!({ "embeds": [embed_json(item)] });
        self.execute(channel, || self.client.post(&url).json(&body)).await?;
        Ok(())
    }

    async fn forward(&self, message: &ForwardedMessage, target: &ForwardTarget) -> Result<(), DeliveryError> {
        let url = format!("{}/channels/{}/messages", self.api_base, target.channel);

        if message.attachments.is_empty() {
            let body = json!({ "content": message.content, "embeds": message.embeds });
            self.execute(target.channel, || self.client.post(&url).json(&body)).await?;
            return Ok(());
        }

        let mut files = Vec::with_capacity(message.attachments.len());
        for att in &message.attachments {
            match self.download(att).await {
                Ok(bytes) => files.push((att.clone(), bytes)),
                Err(e) => warn!(file = %att.filename, error = %e, "skipping attachment"),
            }
        }
        let payload = json!({
            "content": message.content,
            "embeds": message.embeds,
            "attachments": files
                .iter()
                .enumerate()
                .map(|(i, (a, _))| json!({ "id": i, "filename": a.filename }))
                .collect::<Vec<_>>(),
        })
        .to_string();

        self.execute(target.channel, || {
            let mut form = Form::new().text("payload_json", payload.clone());
            for (i, (att, bytes)) in files.iter().enumerate() {
                let mut part = Part::bytes(bytes.clone()).file_name(att.filename.clone());
                if let Some(ct) = &att.content_type {
                    part = match part.mime_str(ct) {
                        Ok(p) => p,
                        Err(_) => Part::bytes(bytes.clone()).file_name(att.filename.clone()),
                    };
                }
                form = form.part(format!("files[{i}]"), part);
            }
            self.client.post(&url).multipart(form)
        })
        .await?;
        Ok(())
    }

    async fn unarchive(&self, channel: ChannelId) -> Result<(), DeliveryError> {
        let url = format!("{}/channels/{channel}", self.api_base);
        let body = json!({ "archived": false });
        self.execute(channel, || self.client.patch(&url).json(&body)).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageFeed for DiscordRest {
    async fn messages_after(
        &self,
        channel: ChannelId,
        after: Option<u64>,
    ) -> Result<Vec<ChannelMessage>, DeliveryError> {
        let url = match after {
            Some(id) => format!("{}/channels/{channel}/messages?limit=100&after={id}", self.api_base),
            None => format!("{}/channels/{channel}/messages?limit=1", self.api_base),
        };
        let rsp = self.execute(channel, || self.client.get(&url)).await?;
        let raw = rsp
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        parse_messages(channel, &raw)
    }
}
