// src/ingest/providers/web_page.rs
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{complete_article, listing_candidates};
use crate::errors::FetchFailure;
use crate::ingest::discovery::AiExtraction;
use crate::ingest::html::extract_posts;
use crate::ingest::http::{get_text, HttpFetch};
use crate::ingest::types::{AdapterOutput, SourceAdapter};
use crate::model::{CandidateItem, ExtractionProfile, Source, SourceCache};
use crate::watermark::Watermark;

/// Arbitrary page with a post listing, read through a cached [`ExtractionProfile`].
///
/// The profile is inferred once. It is only re-inferred when the cached selectors
/// match nothing and the source has been failing long enough to reach the
/// failure ceiling on this poll.
pub struct WebPageAdapter {
    http: Arc<dyn HttpFetch>,
    analyzer: Arc<AiExtraction>,
    max_items: usize,
    reanalyze_after: u32,
}

impl WebPageAdapter {
    pub fn new(
        http: Arc<dyn HttpFetch>,
        analyzer: Arc<AiExtraction>,
        max_items: usize,
        reanalyze_after: u32,
    ) -> Self {
        Self {
            http,
            analyzer,
            max_items,
            reanalyze_after: reanalyze_after.max(1),
        }
    }

    /// Infer and validate a profile for `page_url`. Used at add time.
    pub async fn analyze(&self, page_url: &str) -> Result<ExtractionProfile, FetchFailure> {
        self.analyzer.analyze(page_url).await
    }
}

fn with_profile(cache: &SourceCache, profile: ExtractionProfile) -> SourceCache {
    SourceCache {
        extraction_profile: Some(profile),
        ..cache.clone()
    }
}

#[async_trait]
impl SourceAdapter for WebPageAdapter {
    async fn fetch_new_items(
        &self,
        source: &Source,
        since: Option<&Watermark>,
    ) -> Result<AdapterOutput, FetchFailure> {
        let page_url = source.identifier.trim();
        let html = get_text(self.http.as_ref(), page_url).await?;

        let (mut profile, mut new_cache) = match &source.cache.extraction_profile {
            Some(p) => (p.clone(), None),
            None => {
                let p = self.analyzer.analyze_html(page_url, &html).await?;
                let cache = with_profile(&source.cache, p.clone());
                (p, Some(cache))
            }
        };

        let mut posts = extract_posts(&html, page_url, &profile)
            .map_err(|e| FetchFailure::permanent(format!("{page_url}: {e}")))?;

        if posts.is_empty() && new_cache.is_none() {
            if source.consecutive_failures + 1 < self.reanalyze_after {
                return Err(FetchFailure::permanent(format!(
                    "{page_url}: cached selectors matched no posts"
                )));
            }
            info!(source = %source.name, failures = source.consecutive_failures, "re-analysing page structure");
            profile = self.analyzer.analyze_html(page_url, &html).await?;
            new_cache = Some(with_profile(&source.cache, profile.clone()));
            posts = extract_posts(&html, page_url, &profile)
                .map_err(|e| FetchFailure::permanent(format!("{page_url}: {e}")))?;
        }
        if posts.is_empty() {
            warn!(source = %source.name, "page listing is empty");
            return Err(FetchFailure::permanent(format!("{page_url}: no posts found")));
        }

        let items = listing_candidates(posts, since, self.max_items, &profile.site_name);
        Ok(AdapterOutput {
            items,
            source_cache: new_cache,
            discovery: None,
        })
    }

    async fn complete(&self, candidate: &mut CandidateItem) {
        complete_article(self.http.as_ref(), candidate).await;
    }

    fn name(&self) -> &'static str {
        "web_page"
    }
}
