// src/config/sources.rs
//! Seed file: sources, guild default channels and forwarding rules applied at boot.
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::{ChannelId, GuildId, NewForwardingRule, NewSource, SourceType};

const ENV_PATH: &str = "SOURCES_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedConfig {
    pub sources: Vec<NewSource>,
    pub guild_channels: Vec<(GuildId, ChannelId)>,
    pub forwarding: Vec<NewForwardingRule>,
}

#[derive(Debug, Deserialize)]
struct RawSeed {
    #[serde(default)]
    sources: Vec<RawSource>,
    #[serde(default)]
    guild_channels: Vec<RawGuildChannel>,
    #[serde(default)]
    forwarding: Vec<NewForwardingRule>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    guild: GuildId,
    name: String,
    /// Any spelling accepted by `SourceType::from_str` ("rss", "youtube", "arxiv", ...).
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
    #[serde(default)]
    channel: Option<ChannelId>,
}

#[derive(Debug, Deserialize)]
struct RawGuildChannel {
    guild: GuildId,
    channel: ChannelId,
}

/// Load the seed from an explicit path. Supports TOML or JSON formats.
pub fn load_seed_from(path: &Path) -> Result<SeedConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources seed from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_seed(&content, ext.as_str())
}

/// Load the seed using env var + fallbacks:
/// 1) $SOURCES_CONFIG_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
pub fn load_seed_default() -> Result<SeedConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_seed_from(&pb);
        } else {
            return Err(anyhow!("SOURCES_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_seed_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_seed_from(&json_p);
    }
    Ok(SeedConfig::default())
}

fn parse_seed(s: &str, hint_ext: &str) -> Result<SeedConfig> {
    let raw: RawSeed = if hint_ext == "json" || s.trim_start().starts_with('{') {
        serde_json::from_str(s).context("parsing sources seed as JSON")?
    } else {
        toml::from_str(s).context("parsing sources seed as TOML")?
    };

    let mut sources = Vec::with_capacity(raw.sources.len());
    for r in raw.sources {
        let source_type: SourceType = r
            .kind
            .parse()
            .map_err(|e: String| anyhow!("source '{}': {e}", r.name))?;
        let name = r.name.trim().to_string();
        if name.is_empty() {
            return Err(anyhow!("source with identifier '{}' has an empty name", r.identifier));
        }
        sources.push(NewSource {
            guild: r.guild,
            name,
            source_type,
            identifier: r.identifier.trim().to_string(),
            channel: r.channel,
        });
    }

    Ok(SeedConfig {
        sources,
        guild_channels: raw
            .guild_channels
            .into_iter()
            .map(|g| (g.guild, g.channel))
            .collect(),
        forwarding: raw.forwarding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DestinationKind;

    #[test]
    fn toml_and_json_forms() {
        let toml = r#"
            [[sources]]
            guild = 1
            name = " Simon Willison "
            type = "rss"
            identifier = "https://simonwillison.net/atom/everything/"

            [[sources]]
            guild = 1
            name = "ML papers"
            type = "arxiv"
            identifier = "cs.LG"
            channel = 77

            [[guild_channels]]
            guild = 1
            channel = 42

            [[forwarding]]
            guild = 1
            source_channel = 10
            destination_channel = 11
            destination_kind = "thread"
        "#;
        let seed = parse_seed(toml, "toml").unwrap();
        assert_eq!(seed.sources.len(), 2);
        assert_eq!(seed.sources[0].name, "Simon Willison");
        assert_eq!(seed.sources[0].source_type, SourceType::GenericFeed);
        assert_eq!(seed.sources[1].channel, Some(77));
        assert_eq!(seed.guild_channels, vec![(1, 42)]);
        assert_eq!(seed.forwarding[0].destination_kind, DestinationKind::Thread);

        let json = r#"{"sources": [{"guild": 2, "name": "x", "type": "github", "identifier": "rust-lang/rust"}]}"#;
        let seed = parse_seed(json, "json").unwrap();
        assert_eq!(seed.sources[0].source_type, SourceType::GithubRepo);
        assert!(seed.forwarding.is_empty());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let toml = r#"
            [[sources]]
            guild = 1
            name = "bird"
            type = "twitter"
            identifier = "x"
        "#;
        let err = parse_seed(toml, "toml").unwrap_err();
        assert!(err.to_string().contains("bird"));
    }
}
