// tests/adapters.rs
//
// Source adapters against a routed HTTP stub: exact upstream URLs, cursor
// handling, cached-state reporting.
mod common;

use std::sync::Arc;

use serde_json::json;

use intelstream::errors::FailureKind;
use intelstream::ingest::discovery::AiExtraction;
use intelstream::ingest::types::SourceAdapter;
use intelstream::ingest::providers::{ChannelAdapter, PaperAdapter, RepositoryMonitor, WebPageAdapter};
use intelstream::model::{ExtractionProfile, Source, SourceCache, SourceType};
use intelstream::watermark::{RepoCursor, Watermark};

use common::*;

fn source(source_type: SourceType, identifier: &str) -> Source {
    Source {
        id: 1,
        guild: 1,
        name: "Under test".into(),
        source_type,
        identifier: identifier.into(),
        channel: None,
        enabled: true,
        consecutive_failures: 0,
        cache: SourceCache::default(),
        discovery: None,
        watermark: None,
        last_polled_at: None,
        created_at: ts(1, 0),
    }
}

fn ids(out: &intelstream::ingest::types::AdapterOutput) -> Vec<String> {
    out.items.iter().map(|i| i.external_id.clone()).collect()
}

// ---------------------------------------------------------------------------
// Papers
// ---------------------------------------------------------------------------

const PAPER_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>cs.AI updates</title>
<item><title>Older Work. (arXiv:2503.00001v1 [cs.AI])</title><link>https://arxiv.org/abs/2503.00001</link>
<description>arXiv:2503.00001v1 Announce Type: new Abstract: An older result.</description>
<pubDate>Sun, 02 Mar 2025 00:00:00 +0000</pubDate></item>
<item><title>Planning With Tools</title><link>https://arxiv.org/abs/2503.00002v2</link>
<description>arXiv:2503.00002v2 Announce Type: new Abstract: Agents plan with tools.</description>
<dc:creator xmlns:dc="http://purl.org/dc/elements/1.1/">A. Author</dc:creator>
<pubDate>Mon, 03 Mar 2025 00:00:00 +0000</pubDate></item>
<item><title>Reward Models</title><link>https://arxiv.org/abs/2503.00003</link>
<description>Abstract: Rewards, revisited.</description>
<pubDate>Tue, 04 Mar 2025 00:00:00 +0000</pubDate></item>
</channel></rss>"#;

#[tokio::test]
async fn paper_feed_reads_the_category_and_respects_the_watermark() {
    let http = StubHttp::new();
    http.on("https://rss.arxiv.org/rss/cs.AI", 200, PAPER_RSS);
    let adapter = PaperAdapter::new(http.clone(), 20);

    let since = Watermark::Published { at: ts(2, 12) };
    let out = adapter
        .fetch_new_items(&source(SourceType::PaperFeed, "cs.AI"), Some(&since))
        .await
        .unwrap();

    assert_eq!(ids(&out), vec!["arxiv:2503.00002", "arxiv:2503.00003"]);
    let first = &out.items[0].payload;
    assert_eq!(first.url, "https://arxiv.org/abs/2503.00002");
    assert_eq!(first.body, "Agents plan with tools.");
    assert_eq!(out.items[1].payload.author.as_deref(), Some("Unknown Authors"));
    assert_eq!(http.calls(), vec!["https://rss.arxiv.org/rss/cs.AI"]);
}

#[tokio::test]
async fn paper_feed_rejects_a_non_category_identifier_without_fetching() {
    let http = StubHttp::new();
    let adapter = PaperAdapter::new(http.clone(), 20);
    let err = adapter
        .fetch_new_items(&source(SourceType::PaperFeed, "not a code"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Permanent);
    assert_eq!(http.call_count(), 0);
}

// ---------------------------------------------------------------------------
// Video channels
// ---------------------------------------------------------------------------

const CHANNEL_ID: &str = "UCabcdefghijklmnopqrstuv";

const CHANNEL_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:yt="http://www.youtube.com/xml/schemas/2015">
<title>Example Channel</title>
<entry><id>yt:video:vid2</id><yt:videoId>vid2</yt:videoId><title>Second video</title>
<published>2025-03-03T00:00:00+00:00</published><author><name>Example</name></author></entry>
<entry><id>yt:video:vid1</id><yt:videoId>vid1</yt:videoId><title>First video</title>
<published>2025-03-02T00:00:00+00:00</published><author><name>Example</name></author></entry>
</feed>"#;

#[tokio::test]
async fn channel_handle_is_resolved_once_and_transcripts_replace_descriptions() {
    let http = StubHttp::new();
    http.on(
        "https://www.googleapis.com/youtube/v3/channels?part=id&forHandle=%40example&key=K",
        200,
        &json!({ "items": [{ "id": CHANNEL_ID }] }).to_string(),
    );
    let feed_url = format!("https://www.youtube.com/feeds/videos.xml?channel_id={CHANNEL_ID}");
    http.on(&feed_url, 200, CHANNEL_FEED);
    http.on(
        "https://www.youtube.com/api/timedtext?lang=en&v=vid1",
        200,
        r#"<transcript><text start="0">hello there</text><text start="2">and welcome</text></transcript>"#,
    );
    let adapter = ChannelAdapter::new(http.clone(), "K".into(), 10);

    let mut src = source(SourceType::ChannelFeed, "@example");
    let out = adapter.fetch_new_items(&src, None).await.unwrap();

    assert_eq!(ids(&out), vec!["vid1", "vid2"]);
    assert_eq!(out.items[0].payload.body, "hello there and welcome");
    assert_eq!(out.items[0].payload.url, "https://www.youtube.com/watch?v=vid1");
    assert_eq!(
        out.items[1].payload.thumbnail_url.as_deref(),
        Some("https://i.ytimg.com/vi/vid2/hqdefault.jpg")
    );
    let cache = out.source_cache.expect("resolved id is reported");
    assert_eq!(cache.resolved_id.as_deref(), Some(CHANNEL_ID));
    assert_eq!(cache.feed_url.as_deref(), Some(feed_url.as_str()));

    // With the id cached the lookup endpoint is not called again.
    src.cache = cache;
    http.reset_calls();
    let again = adapter.fetch_new_items(&src, None).await.unwrap();
    assert!(again.source_cache.is_none());
    assert!(!http.calls().iter().any(|u| u.contains("googleapis")));
}

#[tokio::test]
async fn unknown_channel_is_not_found() {
    let http = StubHttp::new();
    http.on(
        "https://www.googleapis.com/youtube/v3/channels?part=id&forHandle=%40ghost&key=K",
        200,
        r#"{"items": []}"#,
    );
    http.on(
        "https://www.googleapis.com/youtube/v3/channels?part=id&forUsername=ghost&key=K",
        200,
        r#"{}"#,
    );
    let adapter = ChannelAdapter::new(http, "K".into(), 10);
    let err = adapter
        .fetch_new_items(&source(SourceType::ChannelFeed, "ghost"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::NotFound);
}

// ---------------------------------------------------------------------------
// Repository monitor
// ---------------------------------------------------------------------------

fn route_repository(http: &StubHttp) {
    let base = "https://api.github.com/repos/tokio-rs/tokio";
    http.on(
        &format!("{base}/commits?per_page=20"),
        200,
        &json!([
            {
                "sha": "ccc1234567",
                "html_url": "https://github.com/tokio-rs/tokio/commit/ccc1234567",
                "commit": { "message": "Add tracing spans\n\nLonger body.", "author": { "name": "Alice", "date": "2025-03-03T00:00:00Z" } },
                "author": { "login": "alice" }
            },
            {
                "sha": "aaa",
                "html_url": "https://github.com/tokio-rs/tokio/commit/aaa",
                "commit": { "message": "Already seen", "author": { "name": "Bob", "date": "2025-03-01T00:00:00Z" } }
            },
            {
                "sha": "000",
                "html_url": "https://github.com/tokio-rs/tokio/commit/000",
                "commit": { "message": "Ancient", "author": { "name": "Bob", "date": "2025-02-01T00:00:00Z" } }
            }
        ])
        .to_string(),
    );
    http.on(
        &format!("{base}/pulls?state=all&sort=created&direction=desc&per_page=20"),
        200,
        &json!([
            { "number": 6, "title": "Faster timers", "html_url": "https://github.com/tokio-rs/tokio/pull/6", "user": { "login": "carol" }, "created_at": "2025-03-04T00:00:00Z" },
            { "number": 5, "title": "Docs", "body": "typo fixes", "html_url": "https://github.com/tokio-rs/tokio/pull/5", "created_at": "2025-03-02T00:00:00Z" },
            { "number": 4, "title": "Seen", "html_url": "https://github.com/tokio-rs/tokio/pull/4", "created_at": "2025-03-01T00:00:00Z" }
        ])
        .to_string(),
    );
    http.on(
        &format!("{base}/issues?state=all&sort=created&direction=desc&per_page=20"),
        200,
        &json!([
            { "number": 8, "title": "PR mirror", "html_url": "https://github.com/tokio-rs/tokio/pull/8", "created_at": "2025-03-05T00:00:00Z", "pull_request": { "url": "x" } },
            { "number": 7, "title": "Panic on shutdown", "html_url": "https://github.com/tokio-rs/tokio/issues/7", "created_at": "2025-03-03T06:00:00Z" },
            { "number": 3, "title": "Seen issue", "html_url": "https://github.com/tokio-rs/tokio/issues/3", "created_at": "2025-02-20T00:00:00Z" }
        ])
        .to_string(),
    );
}

#[tokio::test]
async fn repository_streams_are_cut_at_the_cursor_and_merged_by_date() {
    let http = StubHttp::new();
    route_repository(&http);
    let monitor = RepositoryMonitor::new(http.clone(), "token".into(), 20);
    let cursor = Watermark::Repository(RepoCursor {
        commit_sha: Some("aaa".into()),
        pull_number: Some(4),
        issue_number: Some(3),
    });

    let out = monitor
        .fetch_new_items(&source(SourceType::GithubRepo, "tokio-rs/tokio"), Some(&cursor))
        .await
        .unwrap();

    assert_eq!(ids(&out), vec!["pr:5", "commit:ccc1234567", "issue:7", "pr:6"]);
    let commit = &out.items[1].payload;
    assert_eq!(commit.title, "Commit ccc1234: Add tracing spans");
    assert_eq!(commit.author.as_deref(), Some("alice"));
    assert_eq!(out.items[2].payload.title, "Issue #7: Panic on shutdown");
    assert_eq!(out.items[3].payload.title, "PR #6: Faster timers");
}

#[tokio::test]
async fn repository_without_a_cursor_returns_everything_listed() {
    let http = StubHttp::new();
    route_repository(&http);
    let monitor = RepositoryMonitor::new(http, "token".into(), 20);
    let out = monitor
        .fetch_new_items(&source(SourceType::GithubRepo, "https://github.com/tokio-rs/tokio"), None)
        .await
        .unwrap();
    // three commits, three pulls, two real issues
    assert_eq!(out.items.len(), 8);
    assert!(!ids(&out).contains(&"issue:8".to_string()));
}

#[tokio::test]
async fn missing_repository_is_not_found() {
    let monitor = RepositoryMonitor::new(StubHttp::new(), "token".into(), 20);
    let err = monitor
        .fetch_new_items(&source(SourceType::GithubRepo, "nobody/nothing"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::NotFound);
}

// ---------------------------------------------------------------------------
// Web pages
// ---------------------------------------------------------------------------

const PAGE: &str = "https://news.test/";

const LISTING: &str = r#"<!DOCTYPE html><html><body>
<div class="post"><h2><a href="/p/newer">Newer story</a></h2></div>
<div class="post"><h2><a href="/p/older">Older story</a></h2></div>
</body></html>"#;

fn profile(post_selector: &str) -> ExtractionProfile {
    ExtractionProfile {
        site_name: "News Test".into(),
        post_selector: post_selector.into(),
        title_selector: "h2".into(),
        url_selector: "a".into(),
        url_attribute: "href".into(),
        date_selector: None,
        date_attribute: None,
        author_selector: None,
        base_url: None,
    }
}

fn web_page_adapter(http: Arc<StubHttp>, summarizer: Arc<RecordingSummarizer>) -> WebPageAdapter {
    let analyzer = Arc::new(AiExtraction::new(http.clone(), summarizer, 50_000));
    WebPageAdapter::new(http, analyzer, 10, 3)
}

#[tokio::test]
async fn stale_profile_is_only_reinferred_at_the_failure_ceiling() {
    let http = StubHttp::new();
    http.on(PAGE, 200, LISTING);
    let summarizer = RecordingSummarizer::new();
    *summarizer.profile.lock() = Some(profile("div.post"));
    let adapter = web_page_adapter(http, summarizer.clone());

    let mut src = source(SourceType::WebPage, PAGE);
    src.cache.extraction_profile = Some(profile("article.entry"));

    let err = adapter.fetch_new_items(&src, None).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Permanent);
    assert_eq!(*summarizer.listing_calls.lock(), 0);

    src.consecutive_failures = 2;
    let out = adapter.fetch_new_items(&src, None).await.unwrap();
    assert_eq!(*summarizer.listing_calls.lock(), 1);
    assert_eq!(out.items.len(), 2);
    // No article page here, so completion falls back to the site name.
    let mut first = out.items[0].clone();
    adapter.complete(&mut first).await;
    assert_eq!(first.payload.author.as_deref(), Some("News Test"));
    let cache = out.source_cache.expect("new profile is reported");
    assert_eq!(
        cache.extraction_profile.map(|p| p.post_selector),
        Some("div.post".to_string())
    );
}

#[tokio::test]
async fn working_profile_is_used_without_inference() {
    let http = StubHttp::new();
    http.on(PAGE, 200, LISTING);
    let summarizer = RecordingSummarizer::new();
    let adapter = web_page_adapter(http, summarizer.clone());

    let mut src = source(SourceType::WebPage, PAGE);
    src.cache.extraction_profile = Some(profile("div.post"));
    let out = adapter.fetch_new_items(&src, None).await.unwrap();

    assert_eq!(out.items.len(), 2);
    assert!(out.source_cache.is_none());
    assert_eq!(*summarizer.listing_calls.lock(), 0);
}

const NEWER_ARTICLE: &str = r#"<!DOCTYPE html><html><head>
<meta name="author" content="Jo Reporter">
<meta property="article:published_time" content="2025-03-04T09:00:00Z">
</head><body><article><p>The full newer story.</p></article></body></html>"#;

#[tokio::test]
async fn article_pages_wait_for_completion() {
    let http = StubHttp::new();
    http.on(PAGE, 200, LISTING);
    http.on("https://news.test/p/newer", 200, NEWER_ARTICLE);
    let adapter = web_page_adapter(http.clone(), RecordingSummarizer::new());

    let mut src = source(SourceType::WebPage, PAGE);
    src.cache.extraction_profile = Some(profile("div.post"));
    let out = adapter.fetch_new_items(&src, None).await.unwrap();

    assert_eq!(http.calls(), vec![PAGE.to_string()]);
    let newer = out
        .items
        .iter()
        .find(|i| i.external_id == "https://news.test/p/newer")
        .expect("newer post listed");
    assert!(newer.pending_article.is_some());
    assert!(newer.payload.body.is_empty());
    assert_eq!(newer.payload.title, "Newer story");

    let mut newer = newer.clone();
    adapter.complete(&mut newer).await;
    assert_eq!(http.call_count(), 2);
    assert!(newer.pending_article.is_none());
    assert_eq!(newer.payload.title, "Newer story");
    assert_eq!(newer.payload.body, "The full newer story.");
    assert_eq!(newer.payload.author.as_deref(), Some("Jo Reporter"));
    assert_eq!(newer.payload.published_at, Some(ts(4, 9)));

    // Completing twice is a no-op.
    adapter.complete(&mut newer).await;
    assert_eq!(http.call_count(), 2);
}
