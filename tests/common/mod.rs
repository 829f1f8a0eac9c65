// tests/common/mod.rs
//
// Shared doubles for the integration tests: a routed HTTP stub, scripted
// adapters, summarizers, chat transports and alert sinks.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use intelstream::ai::{Summarizer, SummaryContext};
use intelstream::config::Settings;
use intelstream::delivery::{
    ChannelMessage, Delivery, ForwardTarget, ForwardedMessage, MessageFeed, RenderedItem,
};
use intelstream::errors::{DeliveryError, FetchFailure, SummarizeError};
use intelstream::ingest::http::{HttpFetch, HttpRequest, HttpResponse};
use intelstream::ingest::providers::AdapterSet;
use intelstream::ingest::types::{AdapterOutput, SourceAdapter};
use intelstream::model::{ChannelId, ExtractionProfile, Source};
use intelstream::notify::{Notifier, NotifierMux, OperatorAlert};
use intelstream::pipeline::{Pipeline, PipelineDeps};
use intelstream::repository::Repository;
use intelstream::watermark::Watermark;

pub fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
}

/// Settings with every delay removed.
pub fn fast_settings() -> Settings {
    Settings {
        fetch_delay: Duration::ZERO,
        summarization_delay: Duration::ZERO,
        ..Settings::default()
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Responds from a URL → (status, body) table; unknown URLs get 404.
#[derive(Default)]
pub struct StubHttp {
    routes: Mutex<HashMap<String, (u16, String)>>,
    calls: Mutex<Vec<String>>,
}

impl StubHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, url: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .insert(url.to_string(), (status, body.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl HttpFetch for StubHttp {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, FetchFailure> {
        self.calls.lock().push(req.url.clone());
        let (status, body) = self
            .routes
            .lock()
            .get(&req.url)
            .cloned()
            .unwrap_or((404, String::new()));
        Ok(HttpResponse {
            status,
            url: req.url,
            content_type: None,
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// Pops one scripted result per call; an empty script yields no items.
#[derive(Default)]
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Result<AdapterOutput, FetchFailure>>>,
    pub seen_watermarks: Mutex<Vec<Option<Watermark>>>,
}

impl ScriptedAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, r: Result<AdapterOutput, FetchFailure>) {
        self.script.lock().push_back(r);
    }

    pub fn calls(&self) -> usize {
        self.seen_watermarks.lock().len()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    async fn fetch_new_items(
        &self,
        _source: &Source,
        since: Option<&Watermark>,
    ) -> Result<AdapterOutput, FetchFailure> {
        self.seen_watermarks.lock().push(since.cloned());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(AdapterOutput::default()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Summarizer
// ---------------------------------------------------------------------------

/// Echoes a short summary; titles listed in `fail_titles` fail with a quota error.
#[derive(Default)]
pub struct RecordingSummarizer {
    pub fail_titles: Mutex<HashSet<String>>,
    pub fail_all: Mutex<bool>,
    pub calls: Mutex<Vec<(String, tokio::time::Instant)>>,
    pub inputs: Mutex<Vec<String>>,
    pub profile: Mutex<Option<ExtractionProfile>>,
    pub listing_calls: Mutex<usize>,
}

impl RecordingSummarizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_for(&self, title: &str) {
        self.fail_titles.lock().insert(title.to_string());
    }

    pub fn set_fail_all(&self, on: bool) {
        *self.fail_all.lock() = on;
    }

    pub fn titles(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl Summarizer for RecordingSummarizer {
    async fn summarize(&self, text: &str, ctx: &SummaryContext) -> Result<String, SummarizeError> {
        self.calls
            .lock()
            .push((ctx.title.clone(), tokio::time::Instant::now()));
        self.inputs.lock().push(text.to_string());
        if *self.fail_all.lock() || self.fail_titles.lock().contains(&ctx.title) {
            return Err(SummarizeError::Quota("scripted".into()));
        }
        Ok(format!("summary of {}", ctx.title))
    }

    async fn infer_listing(&self, _page_url: &str, _html: &str) -> Result<ExtractionProfile, SummarizeError> {
        *self.listing_calls.lock() += 1;
        self.profile
            .lock()
            .clone()
            .ok_or_else(|| SummarizeError::BadOutput("no listing found".into()))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

// ---------------------------------------------------------------------------
// Chat transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub channel: ChannelId,
    pub title: String,
    pub footer: String,
}

#[derive(Default)]
pub struct RecordingDelivery {
    pub sent: Mutex<Vec<Sent>>,
    pub forwarded: Mutex<Vec<(ChannelId, ForwardedMessage)>>,
    pub failing_channels: Mutex<HashSet<ChannelId>>,
    /// Channels that report "archived" until unarchived.
    pub archived: Mutex<HashSet<ChannelId>>,
    pub unarchived: Mutex<Vec<ChannelId>>,
    /// Fail the forward of messages whose content matches.
    pub reject_content: Mutex<HashSet<String>>,
    pub history: Mutex<HashMap<ChannelId, Vec<ChannelMessage>>>,
}

impl RecordingDelivery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn post_message(&self, msg: ChannelMessage) {
        self.history.lock().entry(msg.channel).or_default().push(msg);
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn deliver(&self, channel: ChannelId, item: &RenderedItem) -> Result<(), DeliveryError> {
        if self.failing_channels.lock().contains(&channel) {
            return Err(DeliveryError::Transport("scripted".into()));
        }
        self.sent.lock().push(Sent {
            channel,
            title: item.title.clone(),
            footer: item.footer.clone(),
        });
        Ok(())
    }

    async fn forward(&self, message: &ForwardedMessage, target: &ForwardTarget) -> Result<(), DeliveryError> {
        if self.archived.lock().contains(&target.channel) {
            return Err(DeliveryError::Archived(target.channel));
        }
        if self.reject_content.lock().contains(&message.content) {
            return Err(DeliveryError::Rejected("scripted".into()));
        }
        self.forwarded.lock().push((target.channel, message.clone()));
        Ok(())
    }

    async fn unarchive(&self, channel: ChannelId) -> Result<(), DeliveryError> {
        self.archived.lock().remove(&channel);
        self.unarchived.lock().push(channel);
        Ok(())
    }
}

#[async_trait]
impl MessageFeed for RecordingDelivery {
    async fn messages_after(
        &self,
        channel: ChannelId,
        after: Option<u64>,
    ) -> Result<Vec<ChannelMessage>, DeliveryError> {
        let mut msgs = self.history.lock().get(&channel).cloned().unwrap_or_default();
        msgs.sort_by_key(|m| m.id);
        Ok(match after {
            Some(id) => msgs.into_iter().filter(|m| m.id > id).collect(),
            None => msgs.into_iter().last().into_iter().collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub alerts: Arc<Mutex<Vec<OperatorAlert>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, alert: &OperatorAlert) -> anyhow::Result<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

// ---------------------------------------------------------------------------
// Pipeline harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub repo: Arc<dyn Repository>,
    pub summarizer: Arc<RecordingSummarizer>,
    pub delivery: Arc<RecordingDelivery>,
    pub alerts: RecordingNotifier,
    pub pipeline: Pipeline,
}

pub fn harness(repo: Arc<dyn Repository>, adapters: AdapterSet, settings: &Settings) -> Harness {
    let summarizer = RecordingSummarizer::new();
    let delivery = RecordingDelivery::new();
    let alerts = RecordingNotifier::default();
    let notifier = Arc::new(NotifierMux::new(
        vec![Box::new(alerts.clone())],
        Duration::from_secs(3600),
    ));
    let pipeline = Pipeline::new(
        PipelineDeps {
            repo: repo.clone(),
            adapters,
            summarizer: summarizer.clone(),
            delivery: delivery.clone(),
            notifier,
        },
        settings,
    );
    Harness {
        repo,
        summarizer,
        delivery,
        alerts,
        pipeline,
    }
}

/// RSS 2.0 document with `(guid, title, pubDate)` entries.
pub fn rss(items: &[(&str, &str, DateTime<Utc>)]) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Example Feed</title><link>https://feed.test/</link>"#,
    );
    for (guid, title, at) in items {
        out.push_str(&format!(
            "<item><guid>{guid}</guid><title>{title}</title><link>https://feed.test/{guid}</link><pubDate>{}</pubDate><description>Body of {title} with enough words to summarize.</description></item>",
            at.to_rfc2822()
        ));
    }
    out.push_str("</channel></rss>");
    out
}

pub async fn add_source(
    repo: &Arc<dyn Repository>,
    name: &str,
    source_type: intelstream::model::SourceType,
    identifier: &str,
    channel: Option<ChannelId>,
) -> Source {
    repo.add_source(intelstream::model::NewSource {
        guild: 1,
        name: name.to_string(),
        source_type,
        identifier: identifier.to_string(),
        channel,
    })
    .await
    .expect("add source")
}

pub fn candidate(id: &str, title: &str, at: Option<DateTime<Utc>>) -> intelstream::model::CandidateItem {
    intelstream::model::CandidateItem {
        pending_article: None,
        external_id: id.to_string(),
        payload: intelstream::model::ContentPayload {
            title: title.to_string(),
            body: format!("Body text for {title}."),
            author: None,
            url: format!("https://example.test/{id}"),
            published_at: at,
            thumbnail_url: None,
        },
    }
}
