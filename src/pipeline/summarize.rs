// src/pipeline/summarize.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ai::{DynSummarizer, SummaryContext};
use crate::config::Settings;
use crate::errors::RepoError;
use crate::ingest::truncate_chars;
use crate::model::{Source, SourceId};
use crate::repository::Repository;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items stored with an empty summary (no text, or summarizer switched off).
    pub empty: usize,
    /// The run was skipped because the queue is backing off.
    pub backing_off: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub delay: Duration,
    pub max_input_length: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl QueueConfig {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            delay: s.summarization_delay,
            max_input_length: s.summary_max_input_length,
            backoff_base: s.summary_backoff_base,
            backoff_max: s.summary_backoff_max,
        }
    }
}

#[derive(Debug, Default)]
struct Backoff {
    current: Option<Duration>,
    until: Option<Instant>,
}

/// Sequential, rate-limited summarization of every unsummarized item.
pub struct SummaryQueue {
    repo: Arc<dyn Repository>,
    summarizer: DynSummarizer,
    cfg: QueueConfig,
    backoff: Mutex<Backoff>,
}

impl SummaryQueue {
    pub fn new(repo: Arc<dyn Repository>, summarizer: DynSummarizer, cfg: QueueConfig) -> Self {
        Self {
            repo,
            summarizer,
            cfg,
            backoff: Mutex::new(Backoff::default()),
        }
    }

    /// Remaining backoff, if the queue is currently paused.
    pub async fn backoff_remaining(&self) -> Option<Duration> {
        let b = self.backoff.lock().await;
        b.until
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    pub async fn run(&self, shutdown: &watch::Receiver<bool>) -> Result<SummaryReport, RepoError> {
        let mut report = SummaryReport::default();
        if let Some(left) = self.backoff_remaining().await {
            debug!(remaining_ms = left.as_millis() as u64, "summary queue backing off");
            report.backing_off = true;
            return Ok(report);
        }

        let items = self.repo.list_unsummarized().await?;
        let mut sources: HashMap<SourceId, Option<Source>> = HashMap::new();
        let mut called = false;

        for item in items {
            if *shutdown.borrow() {
                break;
            }
            let source = match sources.get(&item.source_id) {
                Some(s) => s.clone(),
                None => {
                    let s = self.repo.get_source(item.source_id).await?;
                    sources.insert(item.source_id, s.clone());
                    s
                }
            };
            let Some(source) = source else {
                continue;
            };

            let text = item.body.trim();
            if text.is_empty() || !self.summarizer.is_enabled() {
                self.repo.set_summary(item.id, "", Utc::now()).await?;
                report.empty += 1;
                counter!("pipeline_summaries_total", "outcome" => "empty").increment(1);
                continue;
            }

            if called && !self.cfg.delay.is_zero() {
                tokio::time::sleep(self.cfg.delay).await;
            }
            called = true;
            report.attempted += 1;

            let ctx = SummaryContext {
                source_type: source.source_type,
                title: item.title.clone(),
                author: item.author.clone(),
            };
            let input = truncate_chars(text, self.cfg.max_input_length);
            match self.summarizer.summarize(&input, &ctx).await {
                Ok(summary) => {
                    self.repo.set_summary(item.id, summary.trim(), Utc::now()).await?;
                    report.succeeded += 1;
                    counter!("pipeline_summaries_total", "outcome" => "ok").increment(1);
                }
                Err(e) => {
                    report.failed += 1;
                    counter!("pipeline_summaries_total", "outcome" => "error").increment(1);
                    warn!(item = item.id, source = %source.name, error = %e, "summarization failed; will retry");
                }
            }
        }

        self.update_backoff(&report).await;
        if report.attempted > 0 || report.empty > 0 {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                empty = report.empty,
                "summary queue run finished"
            );
        }
        Ok(report)
    }

    async fn update_backoff(&self, report: &SummaryReport) {
        let mut b = self.backoff.lock().await;
        if report.succeeded > 0 {
            *b = Backoff::default();
            return;
        }
        if report.attempted == 0 {
            return;
        }
        let next = match b.current {
            None => self.cfg.backoff_base,
            Some(cur) => (cur * 2).min(self.cfg.backoff_max),
        };
        b.current = Some(next);
        b.until = Some(Instant::now() + next);
        warn!(backoff_secs = next.as_secs(), "every summarization in this run failed; backing off");
    }
}
