// src/sources.rs
//! Source, guild-default and forwarding-rule management with add-time validation.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SeedConfig;
use crate::errors::RepoError;
use crate::ingest::discovery::{AiExtraction, DiscoveryChain};
use crate::ingest::providers::channel::parse_channel_ref;
use crate::ingest::providers::github::parse_repo_slug;
use crate::ingest::providers::paper::is_category_code;
use crate::ingest::providers::AdapterSet;
use crate::ingest::url_guard::{validate_url, validate_url_resolved, UrlGuardError};
use crate::model::{
    ChannelId, ForwardingRule, GuildId, NewForwardingRule, NewSource, RuleId, Source, SourceCache,
    SourceType,
};
use crate::repository::Repository;

/// Minimum Jaro-Winkler similarity for a "did you mean" suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.7;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source name must not be empty")]
    EmptyName,
    #[error("source type {0} is disabled in this deployment")]
    TypeDisabled(SourceType),
    #[error("invalid identifier for {kind}: {reason}")]
    InvalidIdentifier { kind: SourceType, reason: String },
    #[error(transparent)]
    UnsafeUrl(#[from] UrlGuardError),
    #[error("could not locate posts: {0}")]
    Discovery(String),
    #[error("page analysis failed: {0}")]
    Analysis(String),
    #[error("'{0}' already exists")]
    Duplicate(String),
    #[error("source '{name}' not found{}", did_you_mean(.suggestion))]
    NotFound {
        name: String,
        suggestion: Option<String>,
    },
    #[error("forwarding rule {0} not found")]
    RuleNotFound(RuleId),
    #[error("a channel cannot forward to itself")]
    SelfForward,
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for SourceError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Conflict(what) => SourceError::Duplicate(what),
            other => SourceError::Repo(other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub sources_added: usize,
    pub sources_skipped: usize,
    pub guild_channels: usize,
    pub rules_added: usize,
    pub rules_skipped: usize,
}

pub struct SourceService {
    repo: Arc<dyn Repository>,
    adapters: AdapterSet,
    discovery: Option<Arc<DiscoveryChain>>,
    analyzer: Option<Arc<AiExtraction>>,
    resolve_dns: bool,
}

impl SourceService {
    pub fn new(repo: Arc<dyn Repository>, adapters: AdapterSet) -> Self {
        Self {
            repo,
            adapters,
            discovery: None,
            analyzer: None,
            resolve_dns: true,
        }
    }

    pub fn with_discovery(mut self, chain: Arc<DiscoveryChain>) -> Self {
        self.discovery = Some(chain);
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<AiExtraction>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Skip DNS resolution in the URL guard; syntactic checks still apply.
    pub fn without_dns_check(mut self) -> Self {
        self.resolve_dns = false;
        self
    }

    async fn guard(&self, raw: &str) -> Result<String, SourceError> {
        let url = if self.resolve_dns {
            validate_url_resolved(raw).await?
        } else {
            validate_url(raw)?
        };
        Ok(url.to_string())
    }

    pub async fn add_source(&self, mut new: NewSource) -> Result<Source, SourceError> {
        new.name = new.name.trim().to_string();
        new.identifier = new.identifier.trim().to_string();
        if new.name.is_empty() {
            return Err(SourceError::EmptyName);
        }
        if !self.adapters.supports(new.source_type) {
            return Err(SourceError::TypeDisabled(new.source_type));
        }
        if self.repo.find_source(new.guild, &new.name).await?.is_some() {
            return Err(SourceError::Duplicate(format!("source '{}'", new.name)));
        }

        let invalid = |reason: &str| SourceError::InvalidIdentifier {
            kind: new.source_type,
            reason: reason.to_string(),
        };
        let mut cache = None;
        let mut discovery = None;
        match new.source_type {
            SourceType::NewsletterFeed => {
                if new.identifier.contains("://") {
                    self.guard(&new.identifier).await?;
                } else if new.identifier.is_empty()
                    || !new
                        .identifier
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-')
                {
                    return Err(invalid("expected a publication slug or URL"));
                }
            }
            SourceType::GenericFeed => {
                self.guard(&new.identifier).await?;
            }
            SourceType::PaperFeed => {
                if !is_category_code(&new.identifier) {
                    return Err(invalid("expected a category code such as cs.AI"));
                }
            }
            SourceType::ChannelFeed => {
                if parse_channel_ref(&new.identifier).is_none() {
                    return Err(invalid("expected a channel id, URL or @handle"));
                }
            }
            SourceType::GithubRepo => {
                if parse_repo_slug(&new.identifier).is_none() {
                    return Err(invalid("expected owner/repo or a github.com URL"));
                }
            }
            SourceType::DiscoveredBlog => {
                let root = self.guard(&new.identifier).await?;
                let chain = self
                    .discovery
                    .as_ref()
                    .ok_or(SourceError::TypeDisabled(new.source_type))?;
                let record = chain
                    .discover(&root)
                    .await
                    .map_err(|e| SourceError::Discovery(e.to_string()))?;
                info!(root = %root, strategy = record.strategy.as_str(), "post location discovered");
                discovery = Some(record);
            }
            SourceType::WebPage => {
                let page = self.guard(&new.identifier).await?;
                let analyzer = self
                    .analyzer
                    .as_ref()
                    .ok_or(SourceError::TypeDisabled(new.source_type))?;
                let profile = analyzer
                    .analyze(&page)
                    .await
                    .map_err(|e| SourceError::Analysis(e.to_string()))?;
                info!(page = %page, site = %profile.site_name, "page structure inferred");
                cache = Some(SourceCache {
                    extraction_profile: Some(profile),
                    ..SourceCache::default()
                });
            }
        }

        let mut source = self.repo.add_source(new).await?;
        if let Some(cache) = cache {
            self.repo.set_source_cache(source.id, cache.clone()).await?;
            source.cache = cache;
        }
        if let Some(record) = discovery {
            self.repo.set_discovery_cache(source.id, Some(record.clone())).await?;
            source.discovery = Some(record);
        }
        info!(guild = source.guild, source = %source.name, kind = %source.source_type, "source added");
        Ok(source)
    }

    async fn not_found(&self, guild: GuildId, name: &str) -> Result<SourceError, SourceError> {
        let names: Vec<String> = self
            .repo
            .list_sources(Some(guild))
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();
        Ok(SourceError::NotFound {
            name: name.to_string(),
            suggestion: suggest(name, &names),
        })
    }

    async fn require(&self, guild: GuildId, name: &str) -> Result<Source, SourceError> {
        match self.repo.find_source(guild, name.trim()).await? {
            Some(s) => Ok(s),
            None => Err(self.not_found(guild, name).await?),
        }
    }

    pub async fn remove_source(&self, guild: GuildId, name: &str) -> Result<Source, SourceError> {
        match self.repo.remove_source(guild, name.trim()).await? {
            Some(s) => {
                info!(guild, source = %s.name, "source removed");
                Ok(s)
            }
            None => Err(self.not_found(guild, name).await?),
        }
    }

    pub async fn list_sources(&self, guild: Option<GuildId>) -> Result<Vec<Source>, SourceError> {
        Ok(self.repo.list_sources(guild).await?)
    }

    pub async fn get_source(&self, guild: GuildId, name: &str) -> Result<Source, SourceError> {
        self.require(guild, name).await
    }

    pub async fn pause_source(&self, guild: GuildId, name: &str) -> Result<Source, SourceError> {
        let src = self.require(guild, name).await?;
        self.repo.set_source_enabled(src.id, false).await?;
        self.require(guild, name).await
    }

    /// Re-enables the source and clears its failure counter.
    pub async fn resume_source(&self, guild: GuildId, name: &str) -> Result<Source, SourceError> {
        let src = self.require(guild, name).await?;
        self.repo.set_source_enabled(src.id, true).await?;
        self.require(guild, name).await
    }

    pub async fn set_source_channel(
        &self,
        guild: GuildId,
        name: &str,
        channel: Option<ChannelId>,
    ) -> Result<Source, SourceError> {
        let src = self.require(guild, name).await?;
        self.repo.set_source_channel(src.id, channel).await?;
        self.require(guild, name).await
    }

    pub async fn set_guild_channel(&self, guild: GuildId, channel: Option<ChannelId>) -> Result<(), SourceError> {
        self.repo.set_guild_default_channel(guild, channel).await?;
        info!(guild, channel = ?channel, "guild default channel updated");
        Ok(())
    }

    pub async fn guild_channel(&self, guild: GuildId) -> Result<Option<ChannelId>, SourceError> {
        Ok(self.repo.guild_default_channel(guild).await?)
    }

    // ---- forwarding rules ----

    pub async fn add_forwarding_rule(&self, new: NewForwardingRule) -> Result<ForwardingRule, SourceError> {
        if new.source_channel == new.destination_channel {
            return Err(SourceError::SelfForward);
        }
        let rule = self.repo.add_forwarding_rule(new).await?;
        info!(rule = rule.id, from = rule.source_channel, to = rule.destination_channel, "forwarding rule added");
        Ok(rule)
    }

    pub async fn remove_forwarding_rule(&self, id: RuleId) -> Result<(), SourceError> {
        if self.repo.remove_forwarding_rule(id).await? {
            Ok(())
        } else {
            Err(SourceError::RuleNotFound(id))
        }
    }

    pub async fn set_rule_paused(&self, id: RuleId, paused: bool) -> Result<ForwardingRule, SourceError> {
        if self.repo.get_forwarding_rule(id).await?.is_none() {
            return Err(SourceError::RuleNotFound(id));
        }
        self.repo.set_rule_paused(id, paused).await?;
        self.repo
            .get_forwarding_rule(id)
            .await?
            .ok_or(SourceError::RuleNotFound(id))
    }

    pub async fn list_forwarding_rules(&self, guild: Option<GuildId>) -> Result<Vec<ForwardingRule>, SourceError> {
        Ok(self.repo.list_forwarding_rules(guild).await?)
    }

    /// Apply the boot seed through the normal add operations. Entries that
    /// already exist are skipped; other rejections are logged and skipped.
    pub async fn apply_seed(&self, seed: SeedConfig) -> Result<SeedReport, SourceError> {
        let mut report = SeedReport::default();
        for (guild, channel) in seed.guild_channels {
            self.set_guild_channel(guild, Some(channel)).await?;
            report.guild_channels += 1;
        }
        for new in seed.sources {
            let name = new.name.clone();
            match self.add_source(new).await {
                Ok(_) => report.sources_added += 1,
                Err(SourceError::Repo(e)) => return Err(SourceError::Repo(e)),
                Err(SourceError::Duplicate(_)) => report.sources_skipped += 1,
                Err(e) => {
                    warn!(source = %name, error = %e, "seed source rejected");
                    report.sources_skipped += 1;
                }
            }
        }
        for rule in seed.forwarding {
            match self.add_forwarding_rule(rule).await {
                Ok(_) => report.rules_added += 1,
                Err(SourceError::Repo(e)) => return Err(SourceError::Repo(e)),
                Err(e) => {
                    warn!(error = %e, "seed forwarding rule skipped");
                    report.rules_skipped += 1;
                }
            }
        }
        Ok(report)
    }
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!("; did you mean '{s}'?"))
        .unwrap_or_default()
}

/// Closest known name by Jaro-Winkler similarity, if close enough.
pub fn suggest(name: &str, known: &[String]) -> Option<String> {
    let needle = name.trim().to_lowercase();
    known
        .iter()
        .map(|k| (strsim::jaro_winkler(&needle, &k.to_lowercase()), k))
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, k)| k.clone())
}
