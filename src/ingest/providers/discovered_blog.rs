// src/ingest/providers/discovered_blog.rs
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::feed::entry_to_candidate;
use super::{complete_article, listing_candidates, select_new};
use crate::errors::{FailureKind, FetchFailure};
use crate::ingest::discovery::sitemap::{collect_entries, matches_pattern};
use crate::ingest::discovery::DiscoveryChain;
use crate::ingest::feed::parse_feed;
use crate::ingest::html::{extract_posts, site_name_from_url, ListingPost};
use crate::ingest::http::{get_text, HttpFetch};
use crate::ingest::types::{AdapterOutput, SourceAdapter};
use crate::model::{CandidateItem, DiscoveryRecord, FeedLocation, Source};
use crate::watermark::Watermark;

/// Blog without a declared feed type: the discovery chain decides how to read it.
pub struct DiscoveredBlogAdapter {
    http: Arc<dyn HttpFetch>,
    chain: Arc<DiscoveryChain>,
    max_items: usize,
}

impl DiscoveredBlogAdapter {
    pub fn new(http: Arc<dyn HttpFetch>, chain: Arc<DiscoveryChain>, max_items: usize) -> Self {
        Self {
            http,
            chain,
            max_items,
        }
    }

    async fn discover(&self, root: &str) -> Result<DiscoveryRecord, FetchFailure> {
        self.chain
            .discover(root)
            .await
            .map_err(|e| FetchFailure::permanent(e.to_string()))
    }

    async fn read_location(
        &self,
        record: &DiscoveryRecord,
        since: Option<&Watermark>,
    ) -> Result<Vec<CandidateItem>, FetchFailure> {
        let site = site_name_from_url(&record.root_url);
        match &record.location {
            FeedLocation::Feed { url } => {
                let body = get_text(self.http.as_ref(), url).await?;
                let feed = parse_feed(&body).map_err(|e| FetchFailure::permanent(format!("{url}: {e}")))?;
                Ok(select_new(&feed, since, self.max_items, |e| entry_to_candidate(e, &feed)))
            }
            FeedLocation::Sitemap { url, url_pattern } => {
                let entries = collect_entries(self.http.as_ref(), url).await;
                if entries.is_empty() {
                    return Err(FetchFailure::permanent(format!("sitemap {url} listed nothing")));
                }
                let posts: Vec<ListingPost> = entries
                    .into_iter()
                    .filter(|e| matches_pattern(&e.url, url_pattern.as_deref()))
                    .map(|e| ListingPost {
                        url: e.url,
                        title: String::new(),
                        published: e.lastmod,
                        author: None,
                    })
                    .collect();
                Ok(listing_candidates(posts, since, self.max_items, &site))
            }
            FeedLocation::Listing { page_url, profile } => {
                let html = get_text(self.http.as_ref(), page_url).await?;
                let posts = extract_posts(&html, page_url, profile)
                    .map_err(|e| FetchFailure::permanent(format!("{page_url}: {e}")))?;
                if posts.is_empty() {
                    return Err(FetchFailure::permanent(format!("{page_url}: listing is empty")));
                }
                Ok(listing_candidates(posts, since, self.max_items, &profile.site_name))
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for DiscoveredBlogAdapter {
    async fn fetch_new_items(
        &self,
        source: &Source,
        since: Option<&Watermark>,
    ) -> Result<AdapterOutput, FetchFailure> {
        let root = source.identifier.trim();
        if let Some(rec) = source.discovery.clone() {
            self.chain.seed(rec).await;
        }
        let record = self.discover(root).await?;

        let (record, items) = match self.read_location(&record, since).await {
            Ok(items) => (record, items),
            Err(e) if matches!(e.kind(), FailureKind::Permanent | FailureKind::NotFound) => {
                warn!(source = %source.name, strategy = record.strategy.as_str(), error = %e, "post location stopped working; rediscovering");
                self.chain.invalidate(root).await;
                let fresh = self.discover(root).await?;
                if fresh.location == record.location {
                    return Err(e);
                }
                info!(source = %source.name, strategy = fresh.strategy.as_str(), "rediscovered post location");
                let items = self.read_location(&fresh, since).await?;
                (fresh, items)
            }
            Err(e) => return Err(e),
        };

        let changed = source.discovery.as_ref() != Some(&record);
        Ok(AdapterOutput {
            items,
            source_cache: None,
            discovery: changed.then_some(record),
        })
    }

    async fn complete(&self, candidate: &mut CandidateItem) {
        complete_article(self.http.as_ref(), candidate).await;
    }

    fn name(&self) -> &'static str {
        "discovered_blog"
    }
}
