// src/ingest/providers/mod.rs
//! Source adapters, one per [`SourceType`], behind the [`SourceAdapter`] trait.

pub mod channel;
pub mod discovered_blog;
pub mod feed;
pub mod github;
pub mod paper;
pub mod web_page;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::ai::DynSummarizer;
use crate::config::Settings;
use crate::errors::FetchFailure;
use crate::ingest::discovery::{AiExtraction, DiscoveryChain};
use crate::ingest::feed::{FeedEntry, ParsedFeed};
use crate::ingest::html::{extract_article, Article, ListingPost};
use crate::ingest::http::{get_text, HttpFetch};
use crate::ingest::types::SourceAdapter;
use crate::model::{CandidateItem, ContentPayload, PendingArticle, SourceType};
use crate::watermark::Watermark;

pub use channel::ChannelAdapter;
pub use discovered_blog::DiscoveredBlogAdapter;
pub use feed::{FeedAdapter, FeedFlavor};
pub use github::RepositoryMonitor;
pub use paper::PaperAdapter;
pub use web_page::WebPageAdapter;

/// The adapters enabled for this process. A type without an adapter is skipped
/// by the pipeline.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source_type: SourceType, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(source_type, adapter);
        self
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source_type).cloned()
    }

    pub fn supports(&self, source_type: SourceType) -> bool {
        self.adapters.contains_key(&source_type)
    }

    pub fn enabled_types(&self) -> Vec<SourceType> {
        SourceType::ALL
            .into_iter()
            .filter(|t| self.supports(*t))
            .collect()
    }

    /// Production wiring. Missing API keys or a disabled summarizer switch the
    /// corresponding types off for the life of the process.
    pub fn standard(
        http: Arc<dyn HttpFetch>,
        summarizer: DynSummarizer,
        discovery: Arc<DiscoveryChain>,
        settings: &Settings,
    ) -> Self {
        let max = settings.max_items_per_poll;
        let mut set = AdapterSet::new()
            .with(
                SourceType::NewsletterFeed,
                Arc::new(FeedAdapter::new(http.clone(), FeedFlavor::Newsletter, max)),
            )
            .with(
                SourceType::GenericFeed,
                Arc::new(FeedAdapter::new(http.clone(), FeedFlavor::Generic, max)),
            )
            .with(SourceType::PaperFeed, Arc::new(PaperAdapter::new(http.clone(), max)))
            .with(
                SourceType::DiscoveredBlog,
                Arc::new(DiscoveredBlogAdapter::new(http.clone(), discovery, max)),
            );

        match &settings.youtube_api_key {
            Some(key) => {
                set = set.with(
                    SourceType::ChannelFeed,
                    Arc::new(ChannelAdapter::new(http.clone(), key.clone(), settings.youtube_max_results)),
                );
            }
            None => info!("YOUTUBE_API_KEY not set; channel sources disabled"),
        }
        match &settings.github_token {
            Some(token) => {
                set = set.with(
                    SourceType::GithubRepo,
                    Arc::new(RepositoryMonitor::new(http.clone(), token.clone(), max)),
                );
            }
            None => info!("GITHUB_TOKEN not set; repository monitoring disabled"),
        }
        if summarizer.is_enabled() {
            let analyzer = Arc::new(AiExtraction::new(
                http.clone(),
                summarizer,
                settings.max_html_length,
            ));
            set = set.with(
                SourceType::WebPage,
                Arc::new(WebPageAdapter::new(
                    http,
                    analyzer,
                    max,
                    settings.max_consecutive_failures,
                )),
            );
        } else {
            info!("summarizer disabled; web page sources disabled");
        }
        set
    }
}

/// Fetch a page and pull its article text and metadata.
pub async fn fetch_article(http: &dyn HttpFetch, url: &str) -> Result<Article, FetchFailure> {
    let html = get_text(http, url).await?;
    Ok(extract_article(&html))
}

/// Newest admitted listing posts, oldest first. Article pages are not fetched
/// here; each candidate carries a [`PendingArticle`] marker for
/// [`complete_article`].
pub(crate) fn listing_candidates(
    posts: Vec<ListingPost>,
    since: Option<&Watermark>,
    max: usize,
    site_name: &str,
) -> Vec<CandidateItem> {
    let mut posts: Vec<ListingPost> = posts
        .into_iter()
        .filter(|p| Watermark::admits(since, p.published))
        .collect();
    if posts.iter().all(|p| p.published.is_some()) {
        posts.sort_by_key(|p| std::cmp::Reverse(p.published));
    }
    posts.truncate(max);
    posts.reverse();

    posts
        .into_iter()
        .map(|post| CandidateItem {
            external_id: post.url.clone(),
            payload: ContentPayload {
                title: post.title,
                body: String::new(),
                author: post.author,
                url: post.url,
                published_at: post.published,
                thumbnail_url: None,
            },
            pending_article: Some(PendingArticle {
                site_name: site_name.to_string(),
            }),
        })
        .collect()
}

/// Download the article page behind a listing candidate and merge it into the
/// payload. A page that fails to load leaves the item with an empty body.
pub(crate) async fn complete_article(http: &dyn HttpFetch, candidate: &mut CandidateItem) {
    let Some(pending) = candidate.pending_article.take() else {
        return;
    };
    let payload = &mut candidate.payload;
    let article = match fetch_article(http, &payload.url).await {
        Ok(a) => a,
        Err(e) => {
            debug!(url = %payload.url, error = %e, "article fetch failed");
            Article::default()
        }
    };
    if payload.title.is_empty() {
        payload.title = article.title.unwrap_or_else(|| "Untitled".into());
    }
    payload.body = article.text;
    if payload.author.is_none() {
        payload.author = article.author.or(Some(pending.site_name));
    }
    if payload.published_at.is_none() {
        payload.published_at = article.published;
    }
}

/// Shared tail of every feed-based adapter: watermark filter, newest `max` kept,
/// result ordered oldest first.
pub(crate) fn select_new<F>(
    feed: &ParsedFeed,
    since: Option<&Watermark>,
    max: usize,
    mut build: F,
) -> Vec<CandidateItem>
where
    F: FnMut(&FeedEntry) -> Option<CandidateItem>,
{
    let mut out: Vec<CandidateItem> = feed
        .entries
        .iter()
        .filter(|e| Watermark::admits(since, e.published))
        .filter_map(&mut build)
        .collect();

    if out.iter().all(|c| c.payload.published_at.is_some()) {
        out.sort_by_key(|c| std::cmp::Reverse(c.payload.published_at));
    }
    out.truncate(max);
    out.reverse();
    out
}
