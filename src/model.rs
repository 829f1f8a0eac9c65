// src/model.rs
//! Domain entities persisted through the [`crate::repository::Repository`] capability.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::watermark::Watermark;

pub type SourceId = u64;
pub type ItemId = u64;
pub type RuleId = u64;
pub type GuildId = u64;
pub type ChannelId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    NewsletterFeed,
    ChannelFeed,
    GenericFeed,
    PaperFeed,
    DiscoveredBlog,
    WebPage,
    GithubRepo,
}

impl SourceType {
    pub const ALL: [SourceType; 7] = [
        SourceType::NewsletterFeed,
        SourceType::ChannelFeed,
        SourceType::GenericFeed,
        SourceType::PaperFeed,
        SourceType::DiscoveredBlog,
        SourceType::WebPage,
        SourceType::GithubRepo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::NewsletterFeed => "newsletter_feed",
            SourceType::ChannelFeed => "channel_feed",
            SourceType::GenericFeed => "generic_feed",
            SourceType::PaperFeed => "paper_feed",
            SourceType::DiscoveredBlog => "discovered_blog",
            SourceType::WebPage => "web_page",
            SourceType::GithubRepo => "github_repo",
        }
    }

    /// Human label used in rendered footers.
    pub fn label(&self) -> &'static str {
        match self {
            SourceType::NewsletterFeed => "Newsletter",
            SourceType::ChannelFeed => "YouTube",
            SourceType::GenericFeed => "RSS",
            SourceType::PaperFeed => "arXiv",
            SourceType::DiscoveredBlog => "Blog",
            SourceType::WebPage => "Web",
            SourceType::GithubRepo => "GitHub",
        }
    }

    /// Repository monitors run on their own schedule.
    pub fn is_repository(&self) -> bool {
        matches!(self, SourceType::GithubRepo)
    }

    /// Whether items of this type go through the AI summarizer.
    pub fn wants_summary(&self) -> bool {
        !self.is_repository()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "newsletter_feed" | "newsletter" | "substack" => Ok(SourceType::NewsletterFeed),
            "channel_feed" | "channel" | "youtube" => Ok(SourceType::ChannelFeed),
            "generic_feed" | "rss" | "feed" => Ok(SourceType::GenericFeed),
            "paper_feed" | "arxiv" | "papers" => Ok(SourceType::PaperFeed),
            "discovered_blog" | "blog" => Ok(SourceType::DiscoveredBlog),
            "web_page" | "page" => Ok(SourceType::WebPage),
            "github_repo" | "github" => Ok(SourceType::GithubRepo),
            other => Err(format!("unknown source type '{other}'")),
        }
    }
}

/// CSS selectors describing a post listing on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionProfile {
    pub site_name: String,
    pub post_selector: String,
    pub title_selector: String,
    pub url_selector: String,
    #[serde(default = "default_url_attribute")]
    pub url_attribute: String,
    #[serde(default)]
    pub date_selector: Option<String>,
    #[serde(default)]
    pub date_attribute: Option<String>,
    #[serde(default)]
    pub author_selector: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_url_attribute() -> String {
    "href".to_string()
}

/// Adapter-owned state cached on a source between polls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCache {
    /// Canonical id resolved from a handle (e.g. a channel id).
    pub resolved_id: Option<String>,
    pub feed_url: Option<String>,
    pub extraction_profile: Option<ExtractionProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    FeedProbe,
    Sitemap,
    AiExtraction,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::FeedProbe => "feed_probe",
            StrategyKind::Sitemap => "sitemap",
            StrategyKind::AiExtraction => "ai_extraction",
        }
    }
}

/// Where a discovered blog actually publishes its posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedLocation {
    Feed {
        url: String,
    },
    Sitemap {
        url: String,
        url_pattern: Option<String>,
    },
    Listing {
        page_url: String,
        profile: ExtractionProfile,
    },
}

/// Cached outcome of the discovery chain for one root URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub root_url: String,
    pub strategy: StrategyKind,
    pub location: FeedLocation,
    pub expires_at: DateTime<Utc>,
}

impl DiscoveryRecord {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub guild: GuildId,
    pub name: String,
    pub source_type: SourceType,
    pub identifier: String,
    /// Destination override; falls back to the guild default.
    pub channel: Option<ChannelId>,
    pub enabled: bool,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub cache: SourceCache,
    #[serde(default)]
    pub discovery: Option<DiscoveryRecord>,
    #[serde(default)]
    pub watermark: Option<Watermark>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSource {
    pub guild: GuildId,
    pub name: String,
    pub source_type: SourceType,
    pub identifier: String,
    #[serde(default)]
    pub channel: Option<ChannelId>,
}

/// Fields an adapter extracts for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPayload {
    pub title: String,
    /// Summarization input: article text, transcript, abstract or description.
    pub body: String,
    pub author: Option<String>,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
}

/// An item discovered by an adapter, before dedup admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    pub external_id: String,
    pub payload: ContentPayload,
    /// Set when the payload still lacks its article page. The adapter fills it
    /// in only once dedup has confirmed the item is new.
    pub pending_article: Option<PendingArticle>,
}

/// A listing post whose article page has not been downloaded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingArticle {
    /// Author of last resort.
    pub site_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ItemId,
    pub source_id: SourceId,
    pub external_id: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub summarized_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn from_payload(
        id: ItemId,
        source_id: SourceId,
        external_id: String,
        payload: ContentPayload,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source_id,
            external_id,
            title: payload.title,
            body: payload.body,
            author: payload.author,
            url: payload.url,
            published_at: payload.published_at,
            thumbnail_url: payload.thumbnail_url,
            fetched_at,
            summary: None,
            summarized_at: None,
            posted_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    #[default]
    Channel,
    Thread,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub id: RuleId,
    pub guild: GuildId,
    pub source_channel: ChannelId,
    pub destination_channel: ChannelId,
    pub destination_kind: DestinationKind,
    pub paused: bool,
    /// Newest source message already handled.
    pub last_message_id: Option<u64>,
    pub messages_forwarded: u64,
    pub last_forwarded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewForwardingRule {
    pub guild: GuildId,
    pub source_channel: ChannelId,
    pub destination_channel: ChannelId,
    #[serde(default)]
    pub destination_kind: DestinationKind,
}
