// src/ingest/discovery/mod.rs
//! Ordered fallback chain that locates where a blog publishes its posts.
//!
//! Strategies run strictly in order; the first one that returns a location wins
//! and is memoised by root URL until the record expires.

pub mod ai_extraction;
pub mod feed_probe;
pub mod sitemap;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::ai::DynSummarizer;
use crate::ingest::http::HttpFetch;
use crate::metrics::ensure_metrics_described;
use crate::model::{DiscoveryRecord, FeedLocation, StrategyKind};

pub use ai_extraction::AiExtraction;
pub use feed_probe::FeedProbe;
pub use sitemap::SitemapStrategy;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no discovery strategy located posts under {0}")]
    Exhausted(String),
}

#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    /// `None` means "not applicable here"; the chain moves on.
    async fn locate(&self, root: &str) -> Option<FeedLocation>;
}

pub struct DiscoveryChain {
    strategies: Vec<Arc<dyn DiscoveryStrategy>>,
    ttl: chrono::Duration,
    memo: Mutex<HashMap<String, DiscoveryRecord>>,
}

/// Memo key: trailing slashes and case of scheme/host do not matter.
pub fn root_key(root: &str) -> String {
    let trimmed = root.trim().trim_end_matches('/');
    match url::Url::parse(trimmed) {
        Ok(u) => u.as_str().trim_end_matches('/').to_string(),
        Err(_) => trimmed.to_string(),
    }
}

impl DiscoveryChain {
    pub fn new(strategies: Vec<Arc<dyn DiscoveryStrategy>>, ttl: Duration) -> Self {
        Self {
            strategies,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24)),
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Feed probe, sitemap and, when the summarizer is enabled, AI extraction.
    pub fn standard(
        http: Arc<dyn HttpFetch>,
        summarizer: DynSummarizer,
        max_html_length: usize,
        ttl: Duration,
    ) -> Self {
        let mut strategies: Vec<Arc<dyn DiscoveryStrategy>> = vec![
            Arc::new(FeedProbe::new(http.clone())),
            Arc::new(SitemapStrategy::new(http.clone())),
        ];
        if summarizer.is_enabled() {
            strategies.push(Arc::new(AiExtraction::new(http, summarizer, max_html_length)));
        }
        Self::new(strategies, ttl)
    }

    pub fn strategy_kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    pub async fn discover(&self, root: &str) -> Result<DiscoveryRecord, DiscoveryError> {
        ensure_metrics_described();
        let key = root_key(root);
        let now = Utc::now();
        {
            let memo = self.memo.lock().await;
            if let Some(rec) = memo.get(&key).filter(|r| r.is_fresh(now)) {
                debug!(root = %key, strategy = rec.strategy.as_str(), "discovery memo hit");
                return Ok(rec.clone());
            }
        }

        for strategy in &self.strategies {
            let kind = strategy.kind();
            match strategy.locate(&key).await {
                Some(location) => {
                    counter!("discovery_attempts_total", "strategy" => kind.as_str(), "outcome" => "found")
                        .increment(1);
                    info!(root = %key, strategy = kind.as_str(), "discovered post location");
                    let record = DiscoveryRecord {
                        root_url: key.clone(),
                        strategy: kind,
                        location,
                        expires_at: now + self.ttl,
                    };
                    self.memo.lock().await.insert(key, record.clone());
                    return Ok(record);
                }
                None => {
                    counter!("discovery_attempts_total", "strategy" => kind.as_str(), "outcome" => "miss")
                        .increment(1);
                    debug!(root = %key, strategy = kind.as_str(), "strategy found nothing");
                }
            }
        }
        Err(DiscoveryError::Exhausted(key))
    }

    /// Forget the memoised result so the next `discover` runs the chain again.
    pub async fn invalidate(&self, root: &str) {
        self.memo.lock().await.remove(&root_key(root));
    }

    /// Pre-load a persisted record (e.g. after restart). Expired records are ignored.
    pub async fn seed(&self, record: DiscoveryRecord) {
        if record.is_fresh(Utc::now()) {
            self.memo.lock().await.insert(root_key(&record.root_url), record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        kind: StrategyKind,
        hit: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DiscoveryStrategy for Fixed {
        fn kind(&self) -> StrategyKind {
            self.kind
        }
        async fn locate(&self, root: &str) -> Option<FeedLocation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.hit.then(|| FeedLocation::Feed {
                url: format!("{root}/feed"),
            })
        }
    }

    fn fixed(kind: StrategyKind, hit: bool) -> Arc<Fixed> {
        Arc::new(Fixed {
            kind,
            hit,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn invalidate_forces_rerun() {
        let a = fixed(StrategyKind::FeedProbe, true);
        let chain = DiscoveryChain::new(vec![a.clone()], Duration::from_secs(3600));
        chain.discover("https://blog.test/").await.unwrap();
        chain.discover("https://blog.test").await.unwrap();
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        chain.invalidate("https://blog.test").await;
        chain.discover("https://blog.test").await.unwrap();
        assert_eq!(a.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_when_all_miss() {
        let chain = DiscoveryChain::new(
            vec![fixed(StrategyKind::FeedProbe, false), fixed(StrategyKind::Sitemap, false)],
            Duration::from_secs(60),
        );
        assert!(matches!(
            chain.discover("https://nothing.test").await,
            Err(DiscoveryError::Exhausted(_))
        ));
    }
}
