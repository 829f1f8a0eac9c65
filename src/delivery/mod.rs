// src/delivery/mod.rs
//! Outbound chat capability: posting rendered items, forwarding messages and
//! reading channel history for the forwarder.

pub mod discord;
pub mod render;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::DeliveryError;
use crate::model::{ChannelId, DestinationKind};

pub use discord::DiscordRest;
pub use render::render_item;

/// An item rendered as a chat embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedItem {
    pub title: String,
    pub description: String,
    pub url: String,
    pub author: Option<String>,
    pub thumbnail_url: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub footer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// A message observed on a forwarding rule's source channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: u64,
    pub channel: ChannelId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<serde_json::Value>,
}

/// What actually gets re-posted after attachment and embed limits are applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardedMessage {
    pub source_channel: ChannelId,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardTarget {
    pub channel: ChannelId,
    pub kind: DestinationKind,
}

#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, channel: ChannelId, item: &RenderedItem) -> Result<(), DeliveryError>;
    async fn forward(&self, message: &ForwardedMessage, target: &ForwardTarget) -> Result<(), DeliveryError>;
    /// Reopen an archived thread destination.
    async fn unarchive(&self, channel: ChannelId) -> Result<(), DeliveryError>;
}

#[async_trait]
pub trait MessageFeed: Send + Sync {
    /// Messages newer than `after`, oldest first. With `after = None` only the
    /// newest message is returned, which is enough to baseline a rule.
    async fn messages_after(
        &self,
        channel: ChannelId,
        after: Option<u64>,
    ) -> Result<Vec<ChannelMessage>, DeliveryError>;
}

/// Transport used when no bot token is configured. Nothing is ever sent, so
/// every delivery fails and items stay queued until a token is provided.
#[derive(Debug, Default, Clone)]
pub struct LogOnlyDelivery;

#[async_trait]
impl Delivery for LogOnlyDelivery {
    async fn deliver(&self, channel: ChannelId, item: &RenderedItem) -> Result<(), DeliveryError> {
        info!(channel, title = %item.title, url = %item.url, "dry-run delivery; item stays queued");
        Err(DeliveryError::Transport("no chat token configured".into()))
    }

    async fn forward(&self, message: &ForwardedMessage, target: &ForwardTarget) -> Result<(), DeliveryError> {
        info!(
            from = message.source_channel,
            to = target.channel,
            attachments = message.attachments.len(),
            "dry-run forward"
        );
        Err(DeliveryError::Transport("no chat token configured".into()))
    }

    async fn unarchive(&self, _channel: ChannelId) -> Result<(), DeliveryError> {
        Ok(())
    }
}

#[async_trait]
impl MessageFeed for LogOnlyDelivery {
    async fn messages_after(
        &self,
        _channel: ChannelId,
        _after: Option<u64>,
    ) -> Result<Vec<ChannelMessage>, DeliveryError> {
        Ok(Vec::new())
    }
}
