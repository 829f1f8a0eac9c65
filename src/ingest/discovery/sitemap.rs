// src/ingest/discovery/sitemap.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::DiscoveryStrategy;
use crate::ingest::feed::parse_timestamp;
use crate::ingest::http::{get_text, HttpFetch};
use crate::model::{FeedLocation, StrategyKind};

pub const MAX_SITEMAP_URLS: usize = 10_000;
pub const MAX_SUB_SITEMAPS: usize = 10;

pub const SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap/",
    "/sitemaps/sitemap.xml",
];

/// Path segments that usually hold posts.
pub const BLOG_SEGMENTS: &[&str] = &[
    "blog",
    "research",
    "posts",
    "articles",
    "news",
    "updates",
    "insights",
    "announcements",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub url: String,
    pub lastmod: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UrlSet {
    #[serde(rename = "url", default)]
    urls: Vec<UrlNode>,
}

#[derive(Debug, Deserialize)]
struct UrlNode {
    loc: String,
    #[serde(default)]
    lastmod: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SitemapIndex {
    #[serde(rename = "sitemap", default)]
    sitemaps: Vec<IndexNode>,
}

#[derive(Debug, Deserialize)]
struct IndexNode {
    loc: String,
}

enum Parsed {
    UrlSet(Vec<SitemapEntry>),
    Index(Vec<String>),
}

fn head(body: &str) -> &str {
    let mut end = body.len().min(500);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

pub fn looks_like_sitemap(body: &str) -> bool {
    let h = head(body);
    h.contains("<urlset") || h.contains("<sitemapindex")
}

fn parse_sitemap(body: &str) -> Option<Parsed> {
    if head(body).contains("<sitemapindex") {
        let idx: SitemapIndex = quick_xml::de::from_str(body).ok()?;
        return Some(Parsed::Index(
            idx.sitemaps.into_iter().map(|s| s.loc.trim().to_string()).collect(),
        ));
    }
    let set: UrlSet = quick_xml::de::from_str(body).ok()?;
    Some(Parsed::UrlSet(
        set.urls
            .into_iter()
            .map(|u| SitemapEntry {
                url: u.loc.trim().to_string(),
                lastmod: u.lastmod.as_deref().and_then(parse_timestamp),
            })
            .filter(|e| !e.url.is_empty())
            .collect(),
    ))
}

/// All URLs listed by a sitemap. An index is followed one level deep.
pub async fn collect_entries(http: &dyn HttpFetch, sitemap_url: &str) -> Vec<SitemapEntry> {
    let body = match get_text(http, sitemap_url).await {
        Ok(b) => b,
        Err(e) => {
            debug!(url = sitemap_url, error = %e, "sitemap fetch failed");
            return Vec::new();
        }
    };
    match parse_sitemap(&body) {
        Some(Parsed::UrlSet(mut entries)) => {
            entries.truncate(MAX_SITEMAP_URLS);
            entries
        }
        Some(Parsed::Index(children)) => {
            let mut all = Vec::new();
            for child in children.iter().take(MAX_SUB_SITEMAPS) {
                let Ok(child_body) = get_text(http, child).await else {
                    continue;
                };
                // nested indexes are not followed
                if let Some(Parsed::UrlSet(entries)) = parse_sitemap(&child_body) {
                    all.extend(entries);
                }
                if all.len() >= MAX_SITEMAP_URLS {
                    break;
                }
            }
            all.truncate(MAX_SITEMAP_URLS);
            all
        }
        None => {
            debug!(url = sitemap_url, "sitemap did not parse");
            Vec::new()
        }
    }
}

/// A path fragment like `/blog/` that selects post URLs.
///
/// A blog-ish segment of the root path wins; otherwise the first blog-ish segment
/// that occurs in at least two sitemap URLs.
pub fn infer_url_pattern(root: &str, urls: &[String]) -> Option<String> {
    if let Ok(u) = Url::parse(root) {
        for part in u.path().trim_matches('/').split('/') {
            if BLOG_SEGMENTS.contains(&part.to_ascii_lowercase().as_str()) {
                return Some(format!("/{part}/"));
            }
        }
    }
    for seg in BLOG_SEGMENTS {
        let needle = format!("/{seg}/");
        let hits = urls
            .iter()
            .filter(|u| u.to_ascii_lowercase().contains(&needle))
            .count();
        if hits >= 2 {
            return Some(needle);
        }
    }
    None
}

pub fn matches_pattern(url: &str, pattern: Option<&str>) -> bool {
    match pattern {
        Some(p) => url.to_ascii_lowercase().contains(&p.to_ascii_lowercase()),
        None => true,
    }
}

pub struct SitemapStrategy {
    http: Arc<dyn HttpFetch>,
}

impl SitemapStrategy {
    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self { http }
    }

    async fn from_robots(&self, base: &str) -> Option<String> {
        let robots = get_text(self.http.as_ref(), &format!("{base}/robots.txt")).await.ok()?;
        robots.lines().find_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("sitemap")
                .then(|| value.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }

    async fn find_sitemap(&self, base: &str) -> Option<String> {
        if let Some(url) = self.from_robots(base).await {
            return Some(url);
        }
        for path in SITEMAP_PATHS {
            let url = format!("{base}{path}");
            if let Ok(body) = get_text(self.http.as_ref(), &url).await {
                if looks_like_sitemap(&body) {
                    return Some(url);
                }
            }
        }
        None
    }
}

#[async_trait]
impl DiscoveryStrategy for SitemapStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sitemap
    }

    async fn locate(&self, root: &str) -> Option<FeedLocation> {
        let parsed = Url::parse(root).ok()?;
        let base = parsed.origin().ascii_serialization();

        let sitemap_url = self.find_sitemap(&base).await?;
        let entries = collect_entries(self.http.as_ref(), &sitemap_url).await;
        if entries.is_empty() {
            return None;
        }
        let urls: Vec<String> = entries.into_iter().map(|e| e.url).collect();
        let pattern = infer_url_pattern(root, &urls)?;
        let matching = urls
            .iter()
            .filter(|u| matches_pattern(u, Some(&pattern)))
            .count();
        if matching == 0 {
            return None;
        }
        info!(root, sitemap = %sitemap_url, pattern = %pattern, posts = matching, "sitemap lists posts");
        Some(FeedLocation::Sitemap {
            url: sitemap_url,
            url_pattern: Some(pattern),
        })
    }
}
