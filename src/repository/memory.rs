// src/repository/memory.rs
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::Repository;
use crate::errors::RepoError;
use crate::model::{
    ChannelId, ContentItem, ContentPayload, DiscoveryRecord, ForwardingRule, GuildId, ItemId,
    NewForwardingRule, NewSource, RuleId, Source, SourceCache, SourceId,
};
use crate::watermark::Watermark;

#[derive(Debug, Default)]
struct State {
    next_source_id: SourceId,
    next_item_id: ItemId,
    next_rule_id: RuleId,
    sources: BTreeMap<SourceId, Source>,
    items: BTreeMap<ItemId, ContentItem>,
    guild_channels: BTreeMap<GuildId, ChannelId>,
    rules: BTreeMap<RuleId, ForwardingRule>,
    item_index: HashMap<(SourceId, String), ItemId>,
}

impl State {
    fn source_mut(&mut self, id: SourceId) -> Result<&mut Source, RepoError> {
        self.sources
            .get_mut(&id)
            .ok_or(RepoError::NotFound { entity: "source", id })
    }

    fn item_mut(&mut self, id: ItemId) -> Result<&mut ContentItem, RepoError> {
        self.items
            .get_mut(&id)
            .ok_or(RepoError::NotFound { entity: "content item", id })
    }

    fn rule_mut(&mut self, id: RuleId) -> Result<&mut ForwardingRule, RepoError> {
        self.rules
            .get_mut(&id)
            .ok_or(RepoError::NotFound { entity: "forwarding rule", id })
    }
}

/// In-process repository for tests and ephemeral runs. Nothing survives a
/// restart; durable deployments use [`super::SqliteRepository`].
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_oldest_first(mut items: Vec<ContentItem>) -> Vec<ContentItem> {
    items.sort_by(|a, b| a.fetched_at.cmp(&b.fetched_at).then(a.id.cmp(&b.id)));
    items
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn add_source(&self, new: NewSource) -> Result<Source, RepoError> {
        let mut st = self.state.lock().await;
        let taken = st
            .sources
            .values()
            .any(|s| s.guild == new.guild && s.name.eq_ignore_ascii_case(&new.name));
        if taken {
            return Err(RepoError::Conflict(format!(
                "source '{}' already exists in guild {}",
                new.name, new.guild
            )));
        }
        st.next_source_id += 1;
        let source = Source {
            id: st.next_source_id,
            guild: new.guild,
            name: new.name,
            source_type: new.source_type,
            identifier: new.identifier,
            channel: new.channel,
            enabled: true,
            consecutive_failures: 0,
            cache: SourceCache::default(),
            discovery: None,
            watermark: None,
            last_polled_at: None,
            created_at: Utc::now(),
        };
        st.sources.insert(source.id, source.clone());
        Ok(source)
    }

    async fn remove_source(&self, guild: GuildId, name: &str) -> Result<Option<Source>, RepoError> {
        let mut st = self.state.lock().await;
        let id = st
            .sources
            .values()
            .find(|s| s.guild == guild && s.name.eq_ignore_ascii_case(name))
            .map(|s| s.id);
        let Some(id) = id else {
            return Ok(None);
        };
        let removed = st.sources.remove(&id);
        st.items.retain(|_, it| it.source_id != id);
        st.item_index.retain(|(sid, _), _| *sid != id);
        Ok(removed)
    }

    async fn get_source(&self, id: SourceId) -> Result<Option<Source>, RepoError> {
        Ok(self.state.lock().await.sources.get(&id).cloned())
    }

    async fn find_source(&self, guild: GuildId, name: &str) -> Result<Option<Source>, RepoError> {
        let st = self.state.lock().await;
        Ok(st
            .sources
            .values()
            .find(|s| s.guild == guild && s.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn list_sources(&self, guild: Option<GuildId>) -> Result<Vec<Source>, RepoError> {
        let st = self.state.lock().await;
        Ok(st
            .sources
            .values()
            .filter(|s| guild.map_or(true, |g| s.guild == g))
            .cloned()
            .collect())
    }

    async fn list_enabled_sources(&self, guild: Option<GuildId>) -> Result<Vec<Source>, RepoError> {
        let st = self.state.lock().await;
        Ok(st
            .sources
            .values()
            .filter(|s| s.enabled && guild.map_or(true, |g| s.guild == g))
            .cloned()
            .collect())
    }

    async fn set_source_enabled(&self, id: SourceId, enabled: bool) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        let src = st.source_mut(id)?;
        src.enabled = enabled;
        if enabled {
            src.consecutive_failures = 0;
        }
        Ok(())
    }

    async fn disable_source(&self, id: SourceId) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        st.source_mut(id)?.enabled = false;
        Ok(())
    }

    async fn set_source_channel(
        &self,
        id: SourceId,
        channel: Option<ChannelId>,
    ) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        st.source_mut(id)?.channel = channel;
        Ok(())
    }

    async fn increment_failure(&self, id: SourceId) -> Result<u32, RepoError> {
        let mut st = self.state.lock().await;
        let src = st.source_mut(id)?;
        src.consecutive_failures = src.consecutive_failures.saturating_add(1);
        let count = src.consecutive_failures;
        Ok(count)
    }

    async fn reset_failure(&self, id: SourceId) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        let src = st.source_mut(id)?;
        if src.consecutive_failures == 0 {
            return Ok(());
        }
        src.consecutive_failures = 0;
        Ok(())
    }

    async fn record_poll(
        &self,
        id: SourceId,
        watermark: Option<Watermark>,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        let src = st.source_mut(id)?;
        src.last_polled_at = Some(at);
        if let Some(wm) = watermark {
            src.watermark = Some(wm);
        }
        Ok(())
    }

    async fn set_source_cache(&self, id: SourceId, cache: SourceCache) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        st.source_mut(id)?.cache = cache;
        Ok(())
    }

    async fn get_discovery_cache(&self, id: SourceId) -> Result<Option<DiscoveryRecord>, RepoError> {
        let st = self.state.lock().await;
        Ok(st.sources.get(&id).and_then(|s| s.discovery.clone()))
    }

    async fn set_discovery_cache(
        &self,
        id: SourceId,
        record: Option<DiscoveryRecord>,
    ) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        st.source_mut(id)?.discovery = record;
        Ok(())
    }

    async fn content_item_exists(&self, source_id: SourceId, external_id: &str) -> Result<bool, RepoError> {
        let st = self.state.lock().await;
        Ok(st.item_index.contains_key(&(source_id, external_id.to_string())))
    }

    async fn get_or_create_content_item(
        &self,
        source_id: SourceId,
        external_id: &str,
        payload: ContentPayload,
    ) -> Result<(ContentItem, bool), RepoError> {
        let mut st = self.state.lock().await;
        let key = (source_id, external_id.to_string());
        if let Some(existing) = st.item_index.get(&key).and_then(|id| st.items.get(id)) {
            return Ok((existing.clone(), false));
        }
        if !st.sources.contains_key(&source_id) {
            return Err(RepoError::NotFound {
                entity: "source",
                id: source_id,
            });
        }
        st.next_item_id += 1;
        let item = ContentItem::from_payload(
            st.next_item_id,
            source_id,
            external_id.to_string(),
            payload,
            Utc::now(),
        );
        st.items.insert(item.id, item.clone());
        st.item_index.insert(key, item.id);
        Ok((item, true))
    }

    async fn list_unsummarized(&self) -> Result<Vec<ContentItem>, RepoError> {
        let st = self.state.lock().await;
        let items = st
            .items
            .values()
            .filter(|it| it.summary.is_none())
            .cloned()
            .collect();
        Ok(sorted_oldest_first(items))
    }

    async fn set_summary(&self, item_id: ItemId, text: &str, at: DateTime<Utc>) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        let item = st.item_mut(item_id)?;
        item.summary = Some(text.to_string());
        item.summarized_at = Some(at);
        Ok(())
    }

    async fn list_undelivered(&self) -> Result<Vec<ContentItem>, RepoError> {
        let st = self.state.lock().await;
        let items = st
            .items
            .values()
            .filter(|it| it.summary.is_some() && it.posted_at.is_none())
            .cloned()
            .collect();
        Ok(sorted_oldest_first(items))
    }

    async fn mark_posted(&self, item_id: ItemId, at: DateTime<Utc>) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        let item = st.item_mut(item_id)?;
        if item.posted_at.is_some() {
            return Ok(());
        }
        item.posted_at = Some(at);
        Ok(())
    }

    async fn items_for_source(&self, source_id: SourceId) -> Result<Vec<ContentItem>, RepoError> {
        let st = self.state.lock().await;
        let items = st
            .items
            .values()
            .filter(|it| it.source_id == source_id)
            .cloned()
            .collect();
        Ok(sorted_oldest_first(items))
    }

    async fn guild_default_channel(&self, guild: GuildId) -> Result<Option<ChannelId>, RepoError> {
        Ok(self.state.lock().await.guild_channels.get(&guild).copied())
    }

    async fn set_guild_default_channel(
        &self,
        guild: GuildId,
        channel: Option<ChannelId>,
    ) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        match channel {
            Some(c) => st.guild_channels.insert(guild, c),
            None => st.guild_channels.remove(&guild),
        };
        Ok(())
    }

    async fn add_forwarding_rule(&self, new: NewForwardingRule) -> Result<ForwardingRule, RepoError> {
        let mut st = self.state.lock().await;
        let exists = st.rules.values().any(|r| {
            r.guild == new.guild
                && r.source_channel == new.source_channel
                && r.destination_channel == new.destination_channel
        });
        if exists {
            return Err(RepoError::Conflict(format!(
                "forwarding {} -> {} already exists",
                new.source_channel, new.destination_channel
            )));
        }
        st.next_rule_id += 1;
        let rule = ForwardingRule {
            id: st.next_rule_id,
            guild: new.guild,
            source_channel: new.source_channel,
            destination_channel: new.destination_channel,
            destination_kind: new.destination_kind,
            paused: false,
            last_message_id: None,
            messages_forwarded: 0,
            last_forwarded_at: None,
        };
        st.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn remove_forwarding_rule(&self, id: RuleId) -> Result<bool, RepoError> {
        let mut st = self.state.lock().await;
        let removed = st.rules.remove(&id).is_some();
        Ok(removed)
    }

    async fn get_forwarding_rule(&self, id: RuleId) -> Result<Option<ForwardingRule>, RepoError> {
        Ok(self.state.lock().await.rules.get(&id).cloned())
    }

    async fn list_forwarding_rules(&self, guild: Option<GuildId>) -> Result<Vec<ForwardingRule>, RepoError> {
        let st = self.state.lock().await;
        Ok(st
            .rules
            .values()
            .filter(|r| guild.map_or(true, |g| r.guild == g))
            .cloned()
            .collect())
    }

    async fn set_rule_paused(&self, id: RuleId, paused: bool) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        st.rule_mut(id)?.paused = paused;
        Ok(())
    }

    async fn record_forward(
        &self,
        id: RuleId,
        last_message_id: u64,
        forwarded: u64,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        let mut st = self.state.lock().await;
        let rule = st.rule_mut(id)?;
        rule.last_message_id = Some(rule.last_message_id.map_or(last_message_id, |c| c.max(last_message_id)));
        rule.messages_forwarded = rule.messages_forwarded.saturating_add(forwarded);
        if forwarded > 0 {
            rule.last_forwarded_at = Some(at);
        }
        Ok(())
    }
}
