// tests/sources.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use intelstream::config::SeedConfig;
use intelstream::ingest::discovery::{AiExtraction, DiscoveryChain};
use intelstream::ingest::providers::AdapterSet;
use intelstream::model::{
    DestinationKind, ExtractionProfile, NewForwardingRule, NewSource, SourceType, StrategyKind,
};
use intelstream::repository::{MemoryRepository, Repository};
use intelstream::sources::{SourceError, SourceService};

use common::*;

fn all_types() -> AdapterSet {
    SourceType::ALL
        .iter()
        .fold(AdapterSet::new(), |set, t| set.with(*t, ScriptedAdapter::new()))
}

fn service() -> (Arc<dyn Repository>, SourceService) {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let svc = SourceService::new(repo.clone(), all_types()).without_dns_check();
    (repo, svc)
}

fn new_source(name: &str, source_type: SourceType, identifier: &str) -> NewSource {
    NewSource {
        guild: 1,
        name: name.into(),
        source_type,
        identifier: identifier.into(),
        channel: None,
    }
}

fn rule(from: u64, to: u64) -> NewForwardingRule {
    NewForwardingRule {
        guild: 1,
        source_channel: from,
        destination_channel: to,
        destination_kind: DestinationKind::Channel,
    }
}

#[tokio::test]
async fn identifiers_are_validated_per_type() {
    let (_repo, svc) = service();

    for (t, ok, bad) in [
        (SourceType::PaperFeed, "cs.AI", "not a category"),
        (SourceType::GithubRepo, "tokio-rs/tokio", "just-a-name"),
        (SourceType::ChannelFeed, "@example", "https://vimeo.com/someone"),
        (SourceType::NewsletterFeed, "platformer", "bad slug!"),
    ] {
        let err = svc
            .add_source(new_source(&format!("bad {}", t.as_str()), t, bad))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidIdentifier { kind, .. } if kind == t), "{t}: {err}");
        svc.add_source(new_source(&format!("good {}", t.as_str()), t, ok))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn internal_and_non_http_urls_are_refused() {
    let (_repo, svc) = service();
    for url in [
        "http://127.0.0.1/feed",
        "http://localhost/rss",
        "http://10.0.0.8/rss",
        "file:///etc/passwd",
    ] {
        let err = svc
            .add_source(new_source("internal", SourceType::GenericFeed, url))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::UnsafeUrl(_)), "{url}: {err}");
    }
    svc.add_source(new_source("public", SourceType::GenericFeed, "https://feed.test/rss"))
        .await
        .unwrap();
}

#[tokio::test]
async fn names_are_unique_per_guild_ignoring_case() {
    let (_repo, svc) = service();
    svc.add_source(new_source("Papers", SourceType::PaperFeed, "cs.AI"))
        .await
        .unwrap();
    let err = svc
        .add_source(new_source(" papers ", SourceType::PaperFeed, "cs.LG"))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Duplicate(_)));

    let mut other_guild = new_source("Papers", SourceType::PaperFeed, "cs.LG");
    other_guild.guild = 2;
    svc.add_source(other_guild).await.unwrap();

    let err = svc
        .add_source(new_source("  ", SourceType::PaperFeed, "cs.LG"))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::EmptyName));
}

#[tokio::test]
async fn types_without_an_adapter_cannot_be_added() {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let svc = SourceService::new(repo, AdapterSet::new().with(SourceType::PaperFeed, ScriptedAdapter::new()))
        .without_dns_check();
    let err = svc
        .add_source(new_source("vids", SourceType::ChannelFeed, "@example"))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::TypeDisabled(SourceType::ChannelFeed)));
}

#[tokio::test]
async fn unknown_names_come_with_a_suggestion() {
    let (_repo, svc) = service();
    svc.add_source(new_source("Simon Willison", SourceType::GenericFeed, "https://feed.test/sw"))
        .await
        .unwrap();

    match svc.remove_source(1, "simon wilison").await.unwrap_err() {
        SourceError::NotFound { suggestion, .. } => {
            assert_eq!(suggestion.as_deref(), Some("Simon Willison"))
        }
        other => panic!("unexpected {other}"),
    }
    let removed = svc.remove_source(1, "simon willison").await.unwrap();
    assert_eq!(removed.name, "Simon Willison");
    assert!(svc.list_sources(Some(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn resume_clears_the_failure_counter() {
    let (repo, svc) = service();
    let src = svc
        .add_source(new_source("Flaky", SourceType::GenericFeed, "https://feed.test/flaky"))
        .await
        .unwrap();
    repo.increment_failure(src.id).await.unwrap();
    repo.increment_failure(src.id).await.unwrap();

    let paused = svc.pause_source(1, "flaky").await.unwrap();
    assert!(!paused.enabled);
    let resumed = svc.resume_source(1, "Flaky").await.unwrap();
    assert!(resumed.enabled);
    assert_eq!(resumed.consecutive_failures, 0);
}

#[tokio::test]
async fn discovered_blog_is_located_when_added() {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let http = StubHttp::new();
    http.on("https://blog.test", 200, "<html><body>hi</body></html>");
    http.on("https://blog.test/feed", 200, &rss(&[("a", "A", ts(2, 0))]));
    let chain = Arc::new(DiscoveryChain::new(
        vec![Arc::new(intelstream::ingest::discovery::FeedProbe::new(http.clone()))],
        Duration::from_secs(3600),
    ));
    let svc = SourceService::new(repo.clone(), all_types())
        .with_discovery(chain)
        .without_dns_check();

    let src = svc
        .add_source(new_source("Blog", SourceType::DiscoveredBlog, "https://blog.test/"))
        .await
        .unwrap();
    let rec = src.discovery.clone().unwrap();
    assert_eq!(rec.strategy, StrategyKind::FeedProbe);
    let stored = repo.get_source(src.id).await.unwrap().unwrap();
    assert_eq!(stored.discovery, Some(rec));

    let err = svc
        .add_source(new_source("Nothing", SourceType::DiscoveredBlog, "https://empty.test"))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Discovery(_)));
}

#[tokio::test]
async fn web_page_profile_is_inferred_when_added() {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let http = StubHttp::new();
    http.on(
        "https://news.test/updates",
        200,
        r#"<html><body><article><a class="t" href="/u/1">Update one</a></article></body></html>"#,
    );
    let summarizer = RecordingSummarizer::new();
    *summarizer.profile.lock() = Some(ExtractionProfile {
        site_name: "News".into(),
        post_selector: "article".into(),
        title_selector: "a.t".into(),
        url_selector: "a.t".into(),
        url_attribute: "href".into(),
        date_selector: None,
        date_attribute: None,
        author_selector: None,
        base_url: None,
    });
    let svc = SourceService::new(repo.clone(), all_types())
        .with_analyzer(Arc::new(AiExtraction::new(http.clone(), summarizer.clone(), 50_000)))
        .without_dns_check();

    let src = svc
        .add_source(new_source("News", SourceType::WebPage, "https://news.test/updates"))
        .await
        .unwrap();
    let stored = repo.get_source(src.id).await.unwrap().unwrap();
    assert_eq!(
        stored.cache.extraction_profile.map(|p| p.site_name).as_deref(),
        Some("News")
    );

    *summarizer.profile.lock() = None;
    http.on("https://news.test/other", 200, "<html><body>nothing</body></html>");
    let err = svc
        .add_source(new_source("Other", SourceType::WebPage, "https://news.test/other"))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Analysis(_)));
}

#[tokio::test]
async fn forwarding_rules_reject_loops_and_duplicates() {
    let (_repo, svc) = service();
    assert!(matches!(
        svc.add_forwarding_rule(rule(5, 5)).await.unwrap_err(),
        SourceError::SelfForward
    ));
    let r = svc.add_forwarding_rule(rule(5, 6)).await.unwrap();
    assert!(matches!(
        svc.add_forwarding_rule(rule(5, 6)).await.unwrap_err(),
        SourceError::Duplicate(_)
    ));

    assert!(svc.set_rule_paused(r.id, true).await.unwrap().paused);
    assert!(!svc.set_rule_paused(r.id, false).await.unwrap().paused);
    svc.remove_forwarding_rule(r.id).await.unwrap();
    assert!(matches!(
        svc.remove_forwarding_rule(r.id).await.unwrap_err(),
        SourceError::RuleNotFound(_)
    ));
}

#[tokio::test]
async fn seed_is_idempotent() {
    let (repo, svc) = service();
    let seed = SeedConfig {
        sources: vec![
            new_source("Papers", SourceType::PaperFeed, "cs.AI"),
            new_source("Broken", SourceType::PaperFeed, "no spaces allowed"),
        ],
        guild_channels: vec![(1, 42)],
        forwarding: vec![rule(10, 11)],
    };

    let first = svc.apply_seed(seed.clone()).await.unwrap();
    assert_eq!(first.sources_added, 1);
    assert_eq!(first.sources_skipped, 1);
    assert_eq!(first.rules_added, 1);
    assert_eq!(first.guild_channels, 1);

    let second = svc.apply_seed(seed).await.unwrap();
    assert_eq!(second.sources_added, 0);
    assert_eq!(second.sources_skipped, 2);
    assert_eq!(second.rules_added, 0);
    assert_eq!(second.rules_skipped, 1);

    assert_eq!(repo.list_sources(None).await.unwrap().len(), 1);
    assert_eq!(repo.guild_default_channel(1).await.unwrap(), Some(42));
}
