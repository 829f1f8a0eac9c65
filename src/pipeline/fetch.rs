// src/pipeline/fetch.rs
//! Per-source fetch step: adapter call, dedup admission, watermark advance and
//! the failure-ceiling policy.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tracing::{error, info, warn};

use super::dedup::{Admission, DedupGate};
use crate::config::Settings;
use crate::errors::{FailureKind, FetchFailure, RepoError};
use crate::ingest::providers::AdapterSet;
use crate::ingest::truncate_chars;
use crate::model::{ContentItem, Source, SourceId, SourceType};
use crate::notify::{NotifierMux, OperatorAlert};
use crate::repository::Repository;
use crate::watermark::{advance, RepoCursor, Watermark};

/// Longest pass-through summary stored for items that skip the summarizer.
const PASS_THROUGH_MAX: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub ceiling: u32,
    /// Ceiling for permanent and not-found failures. Equal to `ceiling` unless configured.
    pub permanent_ceiling: u32,
}

impl FailurePolicy {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling: ceiling.max(1),
            permanent_ceiling: ceiling.max(1),
        }
    }

    pub fn from_settings(s: &Settings) -> Self {
        Self {
            ceiling: s.max_consecutive_failures.max(1),
            permanent_ceiling: s.permanent_failure_ceiling.max(1),
        }
    }

    pub fn should_disable(&self, kind: FailureKind, failures: u32) -> bool {
        let limit = match kind {
            FailureKind::Transient => self.ceiling,
            FailureKind::Permanent | FailureKind::NotFound => self.permanent_ceiling,
        };
        failures >= limit
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Fetched { fetched: usize, admitted: usize },
    Failed {
        kind: FailureKind,
        error: String,
        failures: u32,
        disabled: bool,
    },
    /// No adapter is enabled for the type in this process.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source_id: SourceId,
    pub name: String,
    pub source_type: SourceType,
    pub outcome: SourceOutcome,
}

pub struct FetchStage {
    repo: Arc<dyn Repository>,
    adapters: AdapterSet,
    dedup: DedupGate,
    notifier: Arc<NotifierMux>,
    policy: FailurePolicy,
}

impl FetchStage {
    pub fn new(
        repo: Arc<dyn Repository>,
        adapters: AdapterSet,
        notifier: Arc<NotifierMux>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            dedup: DedupGate::new(repo.clone()),
            repo,
            adapters,
            notifier,
            policy,
        }
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// Fetch one source. Adapter failures are absorbed into the report; only
    /// repository errors escape.
    pub async fn fetch_source(&self, source: &Source) -> Result<SourceReport, RepoError> {
        let report = |outcome| SourceReport {
            source_id: source.id,
            name: source.name.clone(),
            source_type: source.source_type,
            outcome,
        };

        let Some(adapter) = self.adapters.get(source.source_type) else {
            return Ok(report(SourceOutcome::Skipped));
        };

        match adapter.fetch_new_items(source, source.watermark.as_ref()).await {
            Ok(output) => {
                let now = Utc::now();
                if let Some(cache) = output.source_cache {
                    self.repo.set_source_cache(source.id, cache).await?;
                }
                if let Some(record) = output.discovery {
                    self.repo.set_discovery_cache(source.id, Some(record)).await?;
                }

                // Repository monitors baseline on their first successful poll.
                let baseline = source.source_type.is_repository() && source.last_polled_at.is_none();
                let mut items = output.items;
                let fetched = items.len();
                let mut admitted = 0usize;
                for candidate in items.iter_mut() {
                    // Article pages are only downloaded for posts not stored yet.
                    if candidate.pending_article.is_some() {
                        if self.dedup.is_known(source.id, &candidate.external_id).await? {
                            continue;
                        }
                        adapter.complete(candidate).await;
                    }
                    let admission = self
                        .dedup
                        .admit(source.id, &candidate.external_id, candidate.payload.clone())
                        .await?;
                    if let Admission::New(item) = admission {
                        admitted += 1;
                        self.on_admitted(source, &item, baseline).await?;
                    }
                }

                let mut watermark = advance(source.watermark.as_ref(), &items, source.source_type);
                if watermark.is_none() && source.source_type.is_repository() {
                    watermark = Some(Watermark::Repository(RepoCursor::default()));
                }
                self.repo.record_poll(source.id, watermark, now).await?;
                if source.consecutive_failures > 0 {
                    self.repo.reset_failure(source.id).await?;
                }

                counter!("pipeline_items_fetched_total").increment(fetched as u64);
                counter!("pipeline_items_admitted_total").increment(admitted as u64);
                info!(
                    source = %source.name,
                    adapter = adapter.name(),
                    fetched,
                    admitted,
                    baseline,
                    "source fetched"
                );
                Ok(report(SourceOutcome::Fetched { fetched, admitted }))
            }
            Err(e) => self.on_failure(source, e).await.map(report),
        }
    }

    async fn on_admitted(&self, source: &Source, item: &ContentItem, baseline: bool) -> Result<(), RepoError> {
        if !source.source_type.wants_summary() {
            let text = truncate_chars(item.body.trim(), PASS_THROUGH_MAX);
            self.repo.set_summary(item.id, &text, Utc::now()).await?;
        }
        if baseline {
            self.repo.mark_posted(item.id, Utc::now()).await?;
        }
        Ok(())
    }

    async fn on_failure(&self, source: &Source, e: FetchFailure) -> Result<SourceOutcome, RepoError> {
        let kind = e.kind();
        let failures = self.repo.increment_failure(source.id).await?;
        counter!("pipeline_source_failures_total", "kind" => kind.as_str()).increment(1);
        warn!(source = %source.name, kind = ?kind, failures, error = %e, "source fetch failed");

        let disabled = self.policy.should_disable(kind, failures);
        if disabled {
            self.repo.disable_source(source.id).await?;
            counter!("pipeline_sources_disabled_total").increment(1);
            error!(source = %source.name, failures, "source disabled after repeated failures");
            let alert = OperatorAlert::source_disabled(source, failures, &e.to_string(), Utc::now());
            self.notifier.notify(&alert).await;
        }
        Ok(SourceOutcome::Failed {
            kind,
            error: e.to_string(),
            failures,
            disabled,
        })
    }
}
