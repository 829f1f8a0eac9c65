// tests/discovery.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use intelstream::ingest::discovery::feed_probe::FEED_PATHS;
use intelstream::ingest::discovery::sitemap::SITEMAP_PATHS;
use intelstream::ingest::discovery::DiscoveryChain;
use intelstream::ingest::providers::{AdapterSet, DiscoveredBlogAdapter};
use intelstream::model::{ExtractionProfile, FeedLocation, SourceType, StrategyKind};
use intelstream::pipeline::CycleScope;
use intelstream::repository::{MemoryRepository, Repository};

use common::*;

const ROOT: &str = "https://blog.test";

const PLAIN_PAGE: &str = r#"<!DOCTYPE html><html><head><title>Blog</title></head><body><p>Welcome</p></body></html>"#;

const LISTING_PAGE: &str = r#"<!DOCTYPE html><html><body>
<div class="post"><h2><a href="/p/first">First post</a></h2></div>
<div class="post"><h2><a href="/p/second">Second post</a></h2></div>
</body></html>"#;

fn chain(http: Arc<StubHttp>, summarizer: Arc<RecordingSummarizer>) -> DiscoveryChain {
    DiscoveryChain::standard(http, summarizer, 50_000, Duration::from_secs(24 * 3600))
}

fn listing_profile() -> ExtractionProfile {
    ExtractionProfile {
        site_name: "Blog Test".into(),
        post_selector: "div.post".into(),
        title_selector: "h2".into(),
        url_selector: "a".into(),
        url_attribute: "href".into(),
        date_selector: None,
        date_attribute: None,
        author_selector: None,
        base_url: None,
    }
}

#[tokio::test]
async fn conventional_feed_path_wins_and_later_strategies_are_not_consulted() {
    let http = StubHttp::new();
    http.on(ROOT, 200, PLAIN_PAGE);
    http.on("https://blog.test/feed.xml", 200, &rss(&[("a", "A", ts(2, 0))]));
    let summarizer = RecordingSummarizer::new();
    let chain = chain(http.clone(), summarizer.clone());

    let rec = chain.discover("https://blog.test/").await.unwrap();
    assert_eq!(rec.strategy, StrategyKind::FeedProbe);
    assert_eq!(
        rec.location,
        FeedLocation::Feed {
            url: "https://blog.test/feed.xml".into()
        }
    );
    assert!(!http.calls().iter().any(|u| u.ends_with("robots.txt")));
    assert_eq!(*summarizer.listing_calls.lock(), 0);
}

#[tokio::test]
async fn sitemap_is_used_when_no_feed_exists() {
    let http = StubHttp::new();
    http.on(ROOT, 200, PLAIN_PAGE);
    http.on(
        "https://blog.test/robots.txt",
        200,
        "User-agent: *\nSitemap: https://blog.test/sitemap.xml\n",
    );
    http.on(
        "https://blog.test/sitemap.xml",
        200,
        r#"<?xml version="1.0"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
<url><loc>https://blog.test/about</loc></url>
<url><loc>https://blog.test/posts/one</loc><lastmod>2025-03-02</lastmod></url>
<url><loc>https://blog.test/posts/two</loc><lastmod>2025-03-03</lastmod></url>
</urlset>"#,
    );
    let chain = chain(http.clone(), RecordingSummarizer::new());

    let rec = chain.discover("https://blog.test/posts").await.unwrap();
    assert_eq!(rec.strategy, StrategyKind::Sitemap);
    assert_eq!(
        rec.location,
        FeedLocation::Sitemap {
            url: "https://blog.test/sitemap.xml".into(),
            url_pattern: Some("/posts/".into()),
        }
    );
}

#[tokio::test]
async fn ai_listing_is_the_last_resort_and_is_memoised() {
    let http = StubHttp::new();
    http.on(ROOT, 200, LISTING_PAGE);
    let summarizer = RecordingSummarizer::new();
    *summarizer.profile.lock() = Some(listing_profile());
    let chain = chain(http.clone(), summarizer.clone());

    let rec = chain.discover(ROOT).await.unwrap();
    assert_eq!(rec.strategy, StrategyKind::AiExtraction);
    match &rec.location {
        FeedLocation::Listing { page_url, profile } => {
            assert_eq!(page_url, ROOT);
            assert_eq!(profile.post_selector, "div.post");
        }
        other => panic!("unexpected location {other:?}"),
    }
    assert_eq!(*summarizer.listing_calls.lock(), 1);

    // Every well-known feed path and then robots.txt and the sitemap paths
    // were tried before the listing page went to the model.
    let calls = http.calls();
    let position = |url: &str| {
        calls
            .iter()
            .position(|c| c == url)
            .unwrap_or_else(|| panic!("{url} was never requested; calls: {calls:?}"))
    };
    let last_feed_path = FEED_PATHS
        .iter()
        .map(|p| position(&format!("{ROOT}{p}")))
        .max()
        .unwrap();
    let robots = position("https://blog.test/robots.txt");
    assert!(position("https://blog.test/feed") < position("https://blog.test/feed.xml"));
    assert!(last_feed_path < robots);
    for p in SITEMAP_PATHS {
        assert!(position(&format!("{ROOT}{p}")) > robots);
    }

    http.reset_calls();
    let again = chain.discover(ROOT).await.unwrap();
    assert_eq!(again, rec);
    assert_eq!(http.call_count(), 0);
    assert_eq!(*summarizer.listing_calls.lock(), 1);
}

#[tokio::test]
async fn nothing_found_is_an_error() {
    let http = StubHttp::new();
    http.on(ROOT, 200, PLAIN_PAGE);
    let chain = chain(http, RecordingSummarizer::new());
    assert!(chain.discover(ROOT).await.is_err());
}

#[tokio::test]
async fn discovered_blog_persists_its_location_and_reads_the_feed() {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let src = add_source(&repo, "Blog", SourceType::DiscoveredBlog, ROOT, Some(8)).await;

    let http = StubHttp::new();
    http.on(ROOT, 200, PLAIN_PAGE);
    http.on(
        "https://blog.test/feed",
        200,
        &rss(&[("one", "One", ts(2, 0)), ("two", "Two", ts(3, 0))]),
    );
    let chain = Arc::new(chain(http.clone(), RecordingSummarizer::new()));
    let adapters = AdapterSet::new().with(
        SourceType::DiscoveredBlog,
        Arc::new(DiscoveredBlogAdapter::new(http.clone(), chain, 20)),
    );
    let h = harness(repo.clone(), adapters, &fast_settings());

    let r = h.pipeline.run_cycle(CycleScope::Content).await.unwrap();
    assert_eq!(r.admitted(), 2);
    let stored = repo.get_source(src.id).await.unwrap().unwrap();
    let rec = stored.discovery.expect("discovery persisted");
    assert_eq!(rec.strategy, StrategyKind::FeedProbe);
    let titles: Vec<_> = h.delivery.sent().into_iter().map(|s| s.title).collect();
    assert_eq!(titles, vec!["One", "Two"]);
}
