// src/pipeline/mod.rs
//! One cycle: fetch every enabled source in turn, then summarize, then deliver.

pub mod dedup;
pub mod deliver;
pub mod fetch;
pub mod summarize;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{gauge, histogram};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::ai::DynSummarizer;
use crate::config::Settings;
use crate::delivery::Delivery;
use crate::errors::RepoError;
use crate::ingest::providers::AdapterSet;
use crate::notify::NotifierMux;
use crate::repository::Repository;

pub use dedup::{Admission, DedupGate};
pub use deliver::{route, DeliveryReport, DeliveryRouter, Route};
pub use fetch::{FailurePolicy, FetchStage, SourceOutcome, SourceReport};
pub use summarize::{QueueConfig, SummaryQueue, SummaryReport};

/// Which sources a cycle covers. Repository monitors run on their own schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleScope {
    Content,
    Repositories,
}

impl CycleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleScope::Content => "content",
            CycleScope::Repositories => "repositories",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub scope: CycleScope,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub summaries: SummaryReport,
    pub deliveries: DeliveryReport,
    /// Shutdown was requested mid-cycle; remaining sources were left for next time.
    pub interrupted: bool,
}

impl CycleReport {
    pub fn admitted(&self) -> usize {
        self.sources
            .iter()
            .map(|s| match s.outcome {
                SourceOutcome::Fetched { admitted, .. } => admitted,
                _ => 0,
            })
            .sum()
    }

    pub fn failed_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Failed { .. }))
            .count()
    }
}

pub struct PipelineDeps {
    pub repo: Arc<dyn Repository>,
    pub adapters: AdapterSet,
    pub summarizer: DynSummarizer,
    pub delivery: Arc<dyn Delivery>,
    pub notifier: Arc<NotifierMux>,
}

pub struct Pipeline {
    repo: Arc<dyn Repository>,
    fetch: FetchStage,
    summaries: SummaryQueue,
    router: DeliveryRouter,
    fetch_delay: Duration,
    content_lock: Mutex<()>,
    repo_lock: Mutex<()>,
    /// Summarize and deliver are serialised across scopes.
    post_lock: Mutex<()>,
    shutdown: watch::Receiver<bool>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps, settings: &Settings) -> Self {
        let (_tx, shutdown) = watch::channel(false);
        Self {
            fetch: FetchStage::new(
                deps.repo.clone(),
                deps.adapters,
                deps.notifier,
                FailurePolicy::from_settings(settings),
            ),
            summaries: SummaryQueue::new(
                deps.repo.clone(),
                deps.summarizer,
                QueueConfig::from_settings(settings),
            ),
            router: DeliveryRouter::new(deps.repo.clone(), deps.delivery),
            repo: deps.repo,
            fetch_delay: settings.fetch_delay,
            content_lock: Mutex::new(()),
            repo_lock: Mutex::new(()),
            post_lock: Mutex::new(()),
            shutdown,
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn adapters(&self) -> &AdapterSet {
        self.fetch.adapters()
    }

    pub fn summary_queue(&self) -> &SummaryQueue {
        &self.summaries
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run one cycle. Only repository failures abort it.
    pub async fn run_cycle(&self, scope: CycleScope) -> Result<CycleReport, RepoError> {
        let _scope_guard = match scope {
            CycleScope::Content => self.content_lock.lock().await,
            CycleScope::Repositories => self.repo_lock.lock().await,
        };
        let t0 = Instant::now();
        let started_at = Utc::now();

        let sources: Vec<_> = self
            .repo
            .list_enabled_sources(None)
            .await?
            .into_iter()
            .filter(|s| s.source_type.is_repository() == (scope == CycleScope::Repositories))
            .collect();

        let mut reports = Vec::with_capacity(sources.len());
        let mut interrupted = false;
        let mut first = true;
        for source in &sources {
            if self.stopping() {
                interrupted = true;
                break;
            }
            if !self.fetch.adapters().supports(source.source_type) {
                reports.push(self.fetch.fetch_source(source).await?);
                continue;
            }
            if !first && !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            first = false;
            reports.push(self.fetch.fetch_source(source).await?);
        }

        let (summaries, deliveries) = {
            let _post = self.post_lock.lock().await;
            let summaries = match scope {
                CycleScope::Content => self.summaries.run(&self.shutdown).await?,
                CycleScope::Repositories => SummaryReport::default(),
            };
            let deliveries = self.router.run().await?;
            (summaries, deliveries)
        };

        let report = CycleReport {
            scope,
            started_at,
            finished_at: Utc::now(),
            sources: reports,
            summaries,
            deliveries,
            interrupted,
        };

        histogram!("pipeline_cycle_ms", "scope" => scope.as_str()).record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("pipeline_last_cycle_ts", "scope" => scope.as_str()).set(report.finished_at.timestamp() as f64);
        info!(
            target: "pipeline",
            scope = scope.as_str(),
            sources = report.sources.len(),
            admitted = report.admitted(),
            failed = report.failed_sources(),
            summarized = report.summaries.succeeded,
            delivered = report.deliveries.delivered,
            interrupted,
            "cycle finished"
        );
        Ok(report)
    }
}
