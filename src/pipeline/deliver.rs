// src/pipeline/deliver.rs
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::delivery::{render_item, Delivery};
use crate::errors::RepoError;
use crate::model::{ChannelId, Source, SourceId};
use crate::repository::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Channel(ChannelId),
    Unrouted,
}

/// Source override first, then the guild default.
pub async fn route(repo: &dyn Repository, source: &Source) -> Result<Route, RepoError> {
    if let Some(ch) = source.channel {
        return Ok(Route::Channel(ch));
    }
    Ok(match repo.guild_default_channel(source.guild).await? {
        Some(ch) => Route::Channel(ch),
        None => Route::Unrouted,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub unrouted: usize,
    pub failed: usize,
}

pub struct DeliveryRouter {
    repo: Arc<dyn Repository>,
    delivery: Arc<dyn Delivery>,
}

impl DeliveryRouter {
    pub fn new(repo: Arc<dyn Repository>, delivery: Arc<dyn Delivery>) -> Self {
        Self { repo, delivery }
    }

    /// Deliver every summarized, unposted item. Only `mark_posted` after a
    /// successful delivery keeps an item from being sent again.
    pub async fn run(&self) -> Result<DeliveryReport, RepoError> {
        let mut report = DeliveryReport::default();
        let mut sources: HashMap<SourceId, Option<(Source, Route)>> = HashMap::new();

        for item in self.repo.list_undelivered().await? {
            if !sources.contains_key(&item.source_id) {
                let resolved = match self.repo.get_source(item.source_id).await? {
                    Some(src) => {
                        let r = route(self.repo.as_ref(), &src).await?;
                        Some((src, r))
                    }
                    None => None,
                };
                sources.insert(item.source_id, resolved);
            }
            let Some(Some((source, route))) = sources.get(&item.source_id) else {
                continue;
            };

            let channel = match route {
                Route::Channel(ch) => *ch,
                Route::Unrouted => {
                    report.unrouted += 1;
                    counter!("pipeline_deliveries_total", "outcome" => "unrouted").increment(1);
                    debug!(item = item.id, source = %source.name, "no destination channel; item stays queued");
                    continue;
                }
            };

            let rendered = render_item(&item, source);
            match self.delivery.deliver(channel, &rendered).await {
                Ok(()) => {
                    self.repo.mark_posted(item.id, Utc::now()).await?;
                    report.delivered += 1;
                    counter!("pipeline_deliveries_total", "outcome" => "ok").increment(1);
                }
                Err(e) => {
                    report.failed += 1;
                    counter!("pipeline_deliveries_total", "outcome" => "error").increment(1);
                    warn!(item = item.id, channel, source = %source.name, error = %e, "delivery failed; will retry");
                }
            }
        }

        if report != DeliveryReport::default() {
            info!(
                delivered = report.delivered,
                unrouted = report.unrouted,
                failed = report.failed,
                "delivery run finished"
            );
        }
        Ok(report)
    }
}
