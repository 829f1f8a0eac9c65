// src/ingest/providers/feed.rs
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;

use super::select_new;
use crate::errors::FetchFailure;
use crate::ingest::feed::{parse_feed, FeedEntry, ParsedFeed};
use crate::ingest::http::{get_text, HttpFetch};
use crate::ingest::normalize_text;
use crate::ingest::types::{AdapterOutput, SourceAdapter};
use crate::model::{CandidateItem, ContentPayload, Source};
use crate::watermark::Watermark;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFlavor {
    /// Identifier is a publication slug or site URL.
    Newsletter,
    /// Identifier is the feed URL itself.
    Generic,
}

pub struct FeedAdapter {
    http: Arc<dyn HttpFetch>,
    flavor: FeedFlavor,
    max_items: usize,
}

/// Feed URL of a newsletter identifier: `https://{slug}.substack.com/feed`, or the
/// given site URL with `/feed` appended.
pub fn newsletter_feed_url(identifier: &str) -> String {
    let id = identifier.trim().trim_end_matches('/');
    if id.starts_with("http://") || id.starts_with("https://") {
        if id.ends_with("/feed") {
            id.to_string()
        } else {
            format!("{id}/feed")
        }
    } else {
        format!("https://{}.substack.com/feed", id.to_ascii_lowercase())
    }
}

/// Map a parsed entry to a candidate. Entries with neither id nor link are dropped.
pub(crate) fn entry_to_candidate(entry: &FeedEntry, feed: &ParsedFeed) -> Option<CandidateItem> {
    let link = entry.link.clone().filter(|l| !l.trim().is_empty());
    let external_id = entry
        .id
        .clone()
        .filter(|i| !i.trim().is_empty())
        .or_else(|| link.clone())?;
    let title = normalize_text(&entry.title);
    Some(CandidateItem {
        pending_article: None,
        payload: ContentPayload {
            title: if title.is_empty() { "Untitled".into() } else { title },
            body: normalize_text(entry.best_text()),
            author: entry
                .author
                .clone()
                .filter(|a| !a.trim().is_empty())
                .or_else(|| feed.title.clone()),
            url: link.unwrap_or_else(|| external_id.clone()),
            published_at: entry.published,
            thumbnail_url: entry.thumbnail.clone(),
        },
        external_id,
    })
}

impl FeedAdapter {
    pub fn new(http: Arc<dyn HttpFetch>, flavor: FeedFlavor, max_items: usize) -> Self {
        Self {
            http,
            flavor,
            max_items,
        }
    }

    fn feed_url(&self, source: &Source) -> String {
        if let Some(url) = &source.cache.feed_url {
            return url.clone();
        }
        match self.flavor {
            FeedFlavor::Newsletter => newsletter_feed_url(&source.identifier),
            FeedFlavor::Generic => source.identifier.trim().to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    async fn fetch_new_items(
        &self,
        source: &Source,
        since: Option<&Watermark>,
    ) -> Result<AdapterOutput, FetchFailure> {
        let url = self.feed_url(source);
        let body = get_text(self.http.as_ref(), &url).await?;
        let feed = parse_feed(&body).map_err(|e| {
            counter!("pipeline_feed_parse_errors_total", "adapter" => self.name()).increment(1);
            FetchFailure::permanent(format!("{url}: {e}"))
        })?;
        let items = select_new(&feed, since, self.max_items, |e| entry_to_candidate(e, &feed));
        Ok(AdapterOutput::items(items))
    }

    fn name(&self) -> &'static str {
        match self.flavor {
            FeedFlavor::Newsletter => "newsletter",
            FeedFlavor::Generic => "feed",
        }
    }
}
