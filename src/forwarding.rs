// src/forwarding.rs
//! Rule-based message forwarding with bounded fan-out across rules.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::delivery::{
    Attachment, ChannelMessage, Delivery, ForwardTarget, ForwardedMessage, MessageFeed,
};
use crate::errors::{DeliveryError, RepoError};
use crate::model::{ForwardingRule, RuleId};
use crate::repository::Repository;

pub const MAX_ATTACHMENTS: usize = 10;
pub const MAX_EMBEDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardLimits {
    pub max_attachment_bytes: u64,
    pub max_total_attachment_bytes: u64,
}

impl ForwardLimits {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            max_attachment_bytes: s.forward_max_attachment_bytes,
            max_total_attachment_bytes: s.forward_max_total_attachment_bytes,
        }
    }
}

/// At most ten attachments, each under the per-file limit, with the running
/// total kept under the overall limit. Oversized files are skipped, not truncated.
pub fn select_attachments(attachments: &[Attachment], limits: &ForwardLimits) -> Vec<Attachment> {
    let mut total = 0u64;
    let mut out = Vec::new();
    for att in attachments {
        if out.len() == MAX_ATTACHMENTS {
            break;
        }
        if att.size > limits.max_attachment_bytes {
            debug!(file = %att.filename, size = att.size, "attachment over per-file limit");
            continue;
        }
        if total + att.size > limits.max_total_attachment_bytes {
            debug!(file = %att.filename, size = att.size, "attachment over total limit");
            continue;
        }
        total += att.size;
        out.push(att.clone());
    }
    out
}

/// `None` when nothing forwardable is left.
pub fn prepare(msg: &ChannelMessage, limits: &ForwardLimits) -> Option<ForwardedMessage> {
    let attachments = select_attachments(&msg.attachments, limits);
    let embeds: Vec<_> = msg.embeds.iter().take(MAX_EMBEDS).cloned().collect();
    if msg.content.trim().is_empty() && attachments.is_empty() && embeds.is_empty() {
        return None;
    }
    Some(ForwardedMessage {
        source_channel: msg.channel,
        content: msg.content.clone(),
        attachments,
        embeds,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleReport {
    pub rule_id: RuleId,
    pub forwarded: u64,
    pub baselined: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForwardReport {
    pub rules: Vec<RuleReport>,
}

impl ForwardReport {
    pub fn forwarded(&self) -> u64 {
        self.rules.iter().map(|r| r.forwarded).sum()
    }
}

pub struct Forwarder {
    repo: Arc<dyn Repository>,
    feed: Arc<dyn MessageFeed>,
    delivery: Arc<dyn Delivery>,
    limits: ForwardLimits,
    concurrency: usize,
}

impl Forwarder {
    pub fn new(
        repo: Arc<dyn Repository>,
        feed: Arc<dyn MessageFeed>,
        delivery: Arc<dyn Delivery>,
        limits: ForwardLimits,
        concurrency: usize,
    ) -> Self {
        Self {
            repo,
            feed,
            delivery,
            limits,
            concurrency: concurrency.max(1),
        }
    }

    /// One pass over every active rule, at most `concurrency` rules at a time.
    pub async fn run(&self) -> Result<ForwardReport, RepoError> {
        let rules: Vec<ForwardingRule> = self
            .repo
            .list_forwarding_rules(None)
            .await?
            .into_iter()
            .filter(|r| !r.paused)
            .collect();

        let results: Vec<Result<RuleReport, RepoError>> = stream::iter(rules)
            .map(|rule| async move { self.run_rule(&rule).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = ForwardReport::default();
        for r in results {
            report.rules.push(r?);
        }
        report.rules.sort_by_key(|r| r.rule_id);
        if report.forwarded() > 0 {
            info!(rules = report.rules.len(), forwarded = report.forwarded(), "forwarding pass finished");
        }
        Ok(report)
    }

    async fn run_rule(&self, rule: &ForwardingRule) -> Result<RuleReport, RepoError> {
        let mut report = RuleReport {
            rule_id: rule.id,
            ..RuleReport::default()
        };
        let messages = match self.feed.messages_after(rule.source_channel, rule.last_message_id).await {
            Ok(m) => m,
            Err(e) => {
                warn!(rule = rule.id, channel = rule.source_channel, error = %e, "could not read source channel");
                report.error = Some(e.to_string());
                return Ok(report);
            }
        };

        let Some(since) = rule.last_message_id else {
            // First run only records where the channel currently is.
            if let Some(newest) = messages.iter().map(|m| m.id).max() {
                self.repo.record_forward(rule.id, newest, 0, Utc::now()).await?;
                report.baselined = true;
                debug!(rule = rule.id, newest, "forwarding rule baselined");
            }
            return Ok(report);
        };

        let target = ForwardTarget {
            channel: rule.destination_channel,
            kind: rule.destination_kind,
        };
        let mut last = since;
        for msg in messages.iter().filter(|m| m.id > since) {
            if let Some(prepared) = prepare(msg, &self.limits) {
                if let Err(e) = self.forward_once(&prepared, &target).await {
                    counter!("forward_messages_total", "outcome" => "error").increment(1);
                    warn!(rule = rule.id, message = msg.id, error = %e, "forward failed; rule stops for this pass");
                    report.error = Some(e.to_string());
                    break;
                }
                report.forwarded += 1;
                counter!("forward_messages_total", "outcome" => "ok").increment(1);
            }
            last = msg.id;
        }

        if last > since {
            self.repo
                .record_forward(rule.id, last, report.forwarded, Utc::now())
                .await?;
        }
        Ok(report)
    }

    async fn forward_once(&self, msg: &ForwardedMessage, target: &ForwardTarget) -> Result<(), DeliveryError> {
        match self.delivery.forward(msg, target).await {
            Err(DeliveryError::Archived(channel)) => {
                info!(channel, "destination archived; unarchiving");
                self.delivery.unarchive(channel).await?;
                self.delivery.forward(msg, target).await
            }
            other => other,
        }
    }
}
