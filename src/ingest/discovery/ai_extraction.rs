// src/ingest/discovery/ai_extraction.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::DiscoveryStrategy;
use crate::ai::DynSummarizer;
use crate::errors::FetchFailure;
use crate::ingest::html::{clean_html_for_analysis, content_hash, validate_profile};
use crate::ingest::http::{get_text, HttpFetch};
use crate::model::{ExtractionProfile, FeedLocation, StrategyKind};

/// Asks the summarizer to infer listing selectors for a page, then checks that
/// they actually match posts. Inference is memoised per page content hash.
pub struct AiExtraction {
    http: Arc<dyn HttpFetch>,
    summarizer: DynSummarizer,
    max_html_length: usize,
    memo: Mutex<HashMap<String, (String, ExtractionProfile)>>,
}

impl AiExtraction {
    pub fn new(http: Arc<dyn HttpFetch>, summarizer: DynSummarizer, max_html_length: usize) -> Self {
        Self {
            http,
            summarizer,
            max_html_length,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch `page_url`, infer a profile and validate it against the same page.
    pub async fn analyze(&self, page_url: &str) -> Result<ExtractionProfile, FetchFailure> {
        let html = get_text(self.http.as_ref(), page_url).await?;
        self.analyze_html(page_url, &html).await
    }

    pub async fn analyze_html(&self, page_url: &str, html: &str) -> Result<ExtractionProfile, FetchFailure> {
        let cleaned = clean_html_for_analysis(html, self.max_html_length);
        let hash = content_hash(&cleaned);

        let cached = {
            let memo = self.memo.lock().await;
            memo.get(page_url)
                .filter(|(h, _)| *h == hash)
                .map(|(_, p)| p.clone())
        };
        let profile = match cached {
            Some(p) => {
                debug!(page_url, "listing profile memo hit");
                p
            }
            None => {
                let p = self
                    .summarizer
                    .infer_listing(page_url, &cleaned)
                    .await
                    .map_err(|e| FetchFailure::permanent(format!("listing inference failed: {e}")))?;
                self.memo
                    .lock()
                    .await
                    .insert(page_url.to_string(), (hash, p.clone()));
                p
            }
        };

        let found = validate_profile(html, page_url, &profile)
            .map_err(|e| FetchFailure::permanent(format!("{page_url}: {e}")))?;
        info!(page_url, posts = found, site = %profile.site_name, "listing profile validated");
        Ok(profile)
    }
}

#[async_trait]
impl DiscoveryStrategy for AiExtraction {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AiExtraction
    }

    async fn locate(&self, root: &str) -> Option<FeedLocation> {
        match self.analyze(root).await {
            Ok(profile) => Some(FeedLocation::Listing {
                page_url: root.to_string(),
                profile,
            }),
            Err(e) => {
                warn!(root, error = %e, "AI extraction found no listing");
                None
            }
        }
    }
}
