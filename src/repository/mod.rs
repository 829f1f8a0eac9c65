// src/repository/mod.rs
//! Persistence capability consumed by the pipeline, the forwarder and source management.
//!
//! Every method is a single atomic operation on one entity; callers never hold
//! anything open across an external call.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::RepoError;
use crate::model::{
    ChannelId, ContentItem, ContentPayload, DiscoveryRecord, ForwardingRule, GuildId, ItemId,
    NewForwardingRule, NewSource, RuleId, Source, SourceCache, SourceId,
};
use crate::watermark::Watermark;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

#[async_trait]
pub trait Repository: Send + Sync {
    // ---- sources ----

    /// Fails with `Conflict` when `(guild, name)` already exists.
    async fn add_source(&self, new: NewSource) -> Result<Source, RepoError>;
    /// Removes the source and its items. Returns the removed source, if any.
    async fn remove_source(&self, guild: GuildId, name: &str) -> Result<Option<Source>, RepoError>;
    async fn get_source(&self, id: SourceId) -> Result<Option<Source>, RepoError>;
    async fn find_source(&self, guild: GuildId, name: &str) -> Result<Option<Source>, RepoError>;
    async fn list_sources(&self, guild: Option<GuildId>) -> Result<Vec<Source>, RepoError>;
    async fn list_enabled_sources(&self, guild: Option<GuildId>) -> Result<Vec<Source>, RepoError>;
    /// Re-enabling also clears the failure counter.
    async fn set_source_enabled(&self, id: SourceId, enabled: bool) -> Result<(), RepoError>;
    async fn disable_source(&self, id: SourceId) -> Result<(), RepoError>;
    async fn set_source_channel(
        &self,
        id: SourceId,
        channel: Option<ChannelId>,
    ) -> Result<(), RepoError>;
    async fn increment_failure(&self, id: SourceId) -> Result<u32, RepoError>;
    async fn reset_failure(&self, id: SourceId) -> Result<(), RepoError>;
    /// Stamps the poll time and, when given, replaces the watermark.
    async fn record_poll(
        &self,
        id: SourceId,
        watermark: Option<Watermark>,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError>;
    async fn set_source_cache(&self, id: SourceId, cache: SourceCache) -> Result<(), RepoError>;
    async fn get_discovery_cache(&self, id: SourceId) -> Result<Option<DiscoveryRecord>, RepoError>;
    async fn set_discovery_cache(
        &self,
        id: SourceId,
        record: Option<DiscoveryRecord>,
    ) -> Result<(), RepoError>;

    // ---- content items ----

    /// Insert-if-absent on `(source_id, external_id)`. The flag is `true` only for a fresh row.
    async fn content_item_exists(&self, source_id: SourceId, external_id: &str) -> Result<bool, RepoError>;
    async fn get_or_create_content_item(
        &self,
        source_id: SourceId,
        external_id: &str,
        payload: ContentPayload,
    ) -> Result<(ContentItem, bool), RepoError>;
    /// Items with a null summary, oldest first.
    async fn list_unsummarized(&self) -> Result<Vec<ContentItem>, RepoError>;
    async fn set_summary(&self, item_id: ItemId, text: &str, at: DateTime<Utc>) -> Result<(), RepoError>;
    /// Summarized items not yet posted, oldest first.
    async fn list_undelivered(&self) -> Result<Vec<ContentItem>, RepoError>;
    /// No-op for an item that is already posted.
    async fn mark_posted(&self, item_id: ItemId, at: DateTime<Utc>) -> Result<(), RepoError>;
    async fn items_for_source(&self, source_id: SourceId) -> Result<Vec<ContentItem>, RepoError>;

    // ---- guild defaults ----

    async fn guild_default_channel(&self, guild: GuildId) -> Result<Option<ChannelId>, RepoError>;
    async fn set_guild_default_channel(
        &self,
        guild: GuildId,
        channel: Option<ChannelId>,
    ) -> Result<(), RepoError>;

    // ---- forwarding rules ----

    /// Fails with `Conflict` when the `(guild, source, destination)` triple exists.
    async fn add_forwarding_rule(&self, new: NewForwardingRule) -> Result<ForwardingRule, RepoError>;
    async fn remove_forwarding_rule(&self, id: RuleId) -> Result<bool, RepoError>;
    async fn get_forwarding_rule(&self, id: RuleId) -> Result<Option<ForwardingRule>, RepoError>;
    async fn list_forwarding_rules(&self, guild: Option<GuildId>) -> Result<Vec<ForwardingRule>, RepoError>;
    async fn set_rule_paused(&self, id: RuleId, paused: bool) -> Result<(), RepoError>;
    /// Moves the rule's message watermark; `forwarded` is added to its counter.
    async fn record_forward(
        &self,
        id: RuleId,
        last_message_id: u64,
        forwarded: u64,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError>;
}
