// src/ingest/discovery/feed_probe.rs
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::DiscoveryStrategy;
use crate::ingest::feed::parse_feed;
use crate::ingest::html::find_feed_links;
use crate::ingest::http::{get_text, HttpFetch};
use crate::model::{FeedLocation, StrategyKind};

/// Conventional feed locations, most common first.
pub const FEED_PATHS: &[&str] = &[
    "/feed",
    "/feed.xml",
    "/rss",
    "/rss.xml",
    "/atom.xml",
    "/blog/feed",
    "/blog/rss",
    "/research/feed",
    "/index.xml",
    "/feeds/posts/default",
];

pub struct FeedProbe {
    http: Arc<dyn HttpFetch>,
}

impl FeedProbe {
    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self { http }
    }

    async fn is_feed(&self, url: &str) -> bool {
        match get_text(self.http.as_ref(), url).await {
            Ok(body) => parse_feed(&body).is_ok(),
            Err(e) => {
                debug!(url, error = %e, "feed probe miss");
                false
            }
        }
    }
}

#[async_trait]
impl DiscoveryStrategy for FeedProbe {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FeedProbe
    }

    async fn locate(&self, root: &str) -> Option<FeedLocation> {
        let root = root.trim_end_matches('/');

        // The page may advertise its feed, or be one.
        if let Ok(page) = get_text(self.http.as_ref(), root).await {
            if parse_feed(&page).is_ok() {
                return Some(FeedLocation::Feed { url: root.to_string() });
            }
            for link in find_feed_links(&page, root) {
                if self.is_feed(&link).await {
                    return Some(FeedLocation::Feed { url: link });
                }
            }
        }

        for path in FEED_PATHS {
            let url = format!("{root}{path}");
            if self.is_feed(&url).await {
                return Some(FeedLocation::Feed { url });
            }
        }
        None
    }
}
