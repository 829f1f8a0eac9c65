// src/ingest/providers/channel.rs
//! Video channel adapter: handle resolution through the data API, uploads from the
//! public channel feed, transcript per video with the description as fallback.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::select_new;
use crate::errors::FetchFailure;
use crate::ingest::feed::{parse_feed, FeedEntry, ParsedFeed};
use crate::ingest::http::{get_text, HttpFetch, HttpRequest};
use crate::ingest::normalize_text;
use crate::ingest::types::{AdapterOutput, SourceAdapter};
use crate::model::{CandidateItem, ContentPayload, Source, SourceCache};
use crate::watermark::Watermark;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// How a channel identifier has to be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    Id(String),
    Handle(String),
    Username(String),
}

fn channel_id_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^UC[\w-]{22}$").unwrap())
}

/// Classify an identifier: raw channel id, channel URL, `@handle` or bare name.
pub fn parse_channel_ref(identifier: &str) -> Option<ChannelRef> {
    let id = identifier.trim();
    if id.is_empty() {
        return None;
    }
    if channel_id_re().is_match(id) {
        return Some(ChannelRef::Id(id.to_string()));
    }
    if let Ok(u) = Url::parse(id) {
        let host = u.host_str().unwrap_or_default().trim_start_matches("www.").trim_start_matches("m.");
        if host != "youtube.com" {
            return None;
        }
        let segs: Vec<&str> = u.path_segments().map(|s| s.filter(|p| !p.is_empty()).collect()).unwrap_or_default();
        return match segs.as_slice() {
            ["channel", cid, ..] if channel_id_re().is_match(cid) => Some(ChannelRef::Id(cid.to_string())),
            [first, ..] if first.starts_with('@') => Some(ChannelRef::Handle(first.to_string())),
            ["c", name, ..] => Some(ChannelRef::Handle(format!("@{name}"))),
            ["user", name, ..] => Some(ChannelRef::Username(name.to_string())),
            _ => None,
        };
    }
    if id.contains('/') || id.contains(char::is_whitespace) {
        return None;
    }
    if id.starts_with('@') {
        Some(ChannelRef::Handle(id.to_string()))
    } else {
        Some(ChannelRef::Handle(format!("@{id}")))
    }
}

pub fn channel_feed_url(channel_id: &str) -> String {
    format!("https://www.youtube.com/feeds/videos.xml?channel_id={channel_id}")
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
}

/// Join the text nodes of a timed-text document. `None` when there are none.
pub fn parse_timedtext(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_text = false;
    let mut parts: Vec<String> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"text" => in_text = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"text" => in_text = false,
            Ok(Event::Text(t)) if in_text => {
                let raw = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned());
                // captions are entity-encoded twice
                parts.push(normalize_text(&raw));
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    let joined = parts.join(" ").trim().to_string();
    (!joined.is_empty()).then_some(joined)
}

pub struct ChannelAdapter {
    http: Arc<dyn HttpFetch>,
    api_key: String,
    max_results: usize,
}

impl ChannelAdapter {
    pub fn new(http: Arc<dyn HttpFetch>, api_key: String, max_results: usize) -> Self {
        Self {
            http,
            api_key,
            max_results,
        }
    }

    async fn lookup(&self, param: &str, value: &str) -> Result<Option<String>, FetchFailure> {
        let mut url = Url::parse(&format!("{API_BASE}/channels"))
            .map_err(|e| FetchFailure::permanent(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("part", "id")
            .append_pair(param, value)
            .append_pair("key", &self.api_key);
        let resp = self.http.send(HttpRequest::get(url.as_str())).await?;
        if resp.status == 400 {
            return Err(FetchFailure::permanent("video API rejected the request (check YOUTUBE_API_KEY)"));
        }
        let resp = resp.into_success()?;
        let list: ChannelList = serde_json::from_str(&resp.body)
            .map_err(|e| FetchFailure::permanent(format!("unexpected channel lookup reply: {e}")))?;
        Ok(list.items.into_iter().next().map(|i| i.id))
    }

    /// Canonical channel id for a source identifier.
    pub async fn resolve(&self, identifier: &str) -> Result<String, FetchFailure> {
        let r = parse_channel_ref(identifier)
            .ok_or_else(|| FetchFailure::permanent(format!("'{identifier}' is not a channel reference")))?;
        let found = match &r {
            ChannelRef::Id(id) => return Ok(id.clone()),
            ChannelRef::Handle(h) => match self.lookup("forHandle", h).await? {
                Some(id) => Some(id),
                None => self.lookup("forUsername", h.trim_start_matches('@')).await?,
            },
            ChannelRef::Username(u) => self.lookup("forUsername", u).await?,
        };
        found.ok_or_else(|| FetchFailure::not_found(format!("channel '{identifier}' not found")))
    }

    async fn transcript(&self, video_id: &str) -> Option<String> {
        let url = format!("https://www.youtube.com/api/timedtext?lang=en&v={video_id}");
        match get_text(self.http.as_ref(), &url).await {
            Ok(body) if !body.trim().is_empty() => parse_timedtext(&body),
            Ok(_) => None,
            Err(e) => {
                debug!(video_id, error = %e, "no transcript");
                None
            }
        }
    }
}

fn video_id(entry: &FeedEntry) -> Option<String> {
    entry
        .video_id
        .clone()
        .or_else(|| entry.id.as_deref().and_then(|i| i.strip_prefix("yt:video:")).map(str::to_string))
        .filter(|v| !v.is_empty())
}

fn entry_to_candidate(entry: &FeedEntry, feed: &ParsedFeed) -> Option<CandidateItem> {
    let vid = video_id(entry)?;
    Some(CandidateItem {
        pending_article: None,
        payload: ContentPayload {
            title: normalize_text(&entry.title),
            body: normalize_text(entry.best_text()),
            author: entry.author.clone().or_else(|| feed.title.clone()),
            url: format!("https://www.youtube.com/watch?v={vid}"),
            published_at: entry.published,
            thumbnail_url: entry
                .thumbnail
                .clone()
                .or_else(|| Some(format!("https://i.ytimg.com/vi/{vid}/hqdefault.jpg"))),
        },
        external_id: vid,
    })
}

#[async_trait]
impl SourceAdapter for ChannelAdapter {
    async fn fetch_new_items(
        &self,
        source: &Source,
        since: Option<&Watermark>,
    ) -> Result<AdapterOutput, FetchFailure> {
        let (channel_id, new_cache) = match &source.cache.resolved_id {
            Some(id) => (id.clone(), None),
            None => {
                let id = self.resolve(&source.identifier).await?;
                info!(source = %source.name, channel_id = %id, "resolved channel");
                let cache = SourceCache {
                    resolved_id: Some(id.clone()),
                    feed_url: Some(channel_feed_url(&id)),
                    ..source.cache.clone()
                };
                (id, Some(cache))
            }
        };

        let url = channel_feed_url(&channel_id);
        let body = get_text(self.http.as_ref(), &url).await?;
        let feed = parse_feed(&body).map_err(|e| FetchFailure::permanent(format!("{url}: {e}")))?;
        let mut items = select_new(&feed, since, self.max_results, |e| entry_to_candidate(e, &feed));

        for item in &mut items {
            if let Some(t) = self.transcript(&item.external_id).await {
                item.payload.body = t;
            }
        }

        Ok(AdapterOutput {
            items,
            source_cache: new_cache,
            discovery: None,
        })
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}
