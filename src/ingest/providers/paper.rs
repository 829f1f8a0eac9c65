// src/ingest/providers/paper.rs
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;

use super::select_new;
use crate::errors::FetchFailure;
use crate::ingest::feed::{parse_feed, FeedEntry};
use crate::ingest::http::{get_text, HttpFetch};
use crate::ingest::normalize_text;
use crate::ingest::types::{AdapterOutput, SourceAdapter};
use crate::model::{CandidateItem, ContentPayload, Source};
use crate::watermark::Watermark;

/// Category codes such as `cs.AI`, `stat.ML`, `math`.
pub fn is_category_code(code: &str) -> bool {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z\-]*(\.[A-Za-z][A-Za-z\-]*)?$").unwrap())
        .is_match(code.trim())
}

pub fn paper_feed_url(code: &str) -> String {
    format!("https://rss.arxiv.org/rss/{}", code.trim())
}

fn arxiv_id(entry: &FeedEntry) -> Option<String> {
    static RE_ABS: OnceCell<Regex> = OnceCell::new();
    let re = RE_ABS.get_or_init(|| Regex::new(r"arxiv\.org/abs/(\d+\.\d+)").unwrap());
    if let Some(c) = entry.link.as_deref().and_then(|l| re.captures(l)) {
        return Some(c[1].to_string());
    }
    let guid = entry.id.as_deref()?;
    let rest = guid.strip_prefix("oai:arXiv.org:")?;
    // drop the version suffix ("2401.01234v2")
    Some(rest.split('v').next().unwrap_or(rest).to_string())
}

fn clean_title(raw: &str) -> String {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)^arxiv:\d+\.\d+v?\d*\s*|\s*\(arXiv:[^)]*\)\s*$").unwrap()
    });
    normalize_text(&re.replace_all(raw, ""))
}

fn abstract_text(entry: &FeedEntry) -> String {
    let text = normalize_text(entry.best_text());
    match text.find("Abstract:") {
        Some(i) => text[i + "Abstract:".len()..].trim().to_string(),
        None => text,
    }
}

fn entry_to_candidate(entry: &FeedEntry) -> Option<CandidateItem> {
    let id = arxiv_id(entry)?;
    let title = clean_title(&entry.title);
    Some(CandidateItem {
        external_id: format!("arxiv:{id}"),
        pending_article: None,
        payload: ContentPayload {
            title: if title.is_empty() { "Untitled".into() } else { title },
            body: abstract_text(entry),
            author: entry
                .author
                .clone()
                .filter(|a| !a.trim().is_empty())
                .or_else(|| Some("Unknown Authors".into())),
            url: format!("https://arxiv.org/abs/{id}"),
            published_at: entry.published,
            thumbnail_url: None,
        },
    })
}

pub struct PaperAdapter {
    http: Arc<dyn HttpFetch>,
    max_items: usize,
}

impl PaperAdapter {
    pub fn new(http: Arc<dyn HttpFetch>, max_items: usize) -> Self {
        Self { http, max_items }
    }
}

#[async_trait]
impl SourceAdapter for PaperAdapter {
    async fn fetch_new_items(
        &self,
        source: &Source,
        since: Option<&Watermark>,
    ) -> Result<AdapterOutput, FetchFailure> {
        if !is_category_code(&source.identifier) {
            return Err(FetchFailure::permanent(format!(
                "'{}' is not a paper category code",
                source.identifier
            )));
        }
        let url = paper_feed_url(&source.identifier);
        let body = get_text(self.http.as_ref(), &url).await?;
        let feed = parse_feed(&body).map_err(|e| FetchFailure::permanent(format!("{url}: {e}")))?;
        Ok(AdapterOutput::items(select_new(
            &feed,
            since,
            self.max_items,
            entry_to_candidate,
        )))
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}
