// src/notify/mod.rs
//! Operator alerts. Every alert is logged; configured sinks (Discord webhook,
//! Slack, e-mail) receive it unless the per-subject cooldown suppresses it.

pub mod antiflutter;
pub mod discord;
pub mod email;
pub mod slack;

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::Source;

pub use antiflutter::AntiFlutter;
pub use discord::DiscordNotifier;
pub use email::EmailSender;
pub use slack::SlackNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SourceDisabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorAlert {
    pub kind: AlertKind,
    /// Cooldown key, e.g. `source:42`.
    pub subject: String,
    pub title: String,
    pub detail: String,
    pub ts: DateTime<Utc>,
}

impl OperatorAlert {
    pub fn source_disabled(source: &Source, failures: u32, reason: &str, ts: DateTime<Utc>) -> Self {
        Self {
            kind: AlertKind::SourceDisabled,
            subject: format!("source:{}", source.id),
            title: format!("Source disabled: {}", source.name),
            detail: format!(
                "{} source '{}' ({}) in guild {} was disabled after {} consecutive failures. Last error: {}",
                source.source_type.label(),
                source.name,
                source.identifier,
                source.guild,
                failures,
                reason
            ),
            ts,
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &OperatorAlert) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Fans an alert out to every configured sink.
pub struct NotifierMux {
    sinks: Vec<Box<dyn Notifier>>,
    gate: Mutex<AntiFlutter>,
}

impl NotifierMux {
    pub fn new(sinks: Vec<Box<dyn Notifier>>, cooldown: Duration) -> Self {
        Self {
            sinks,
            gate: Mutex::new(AntiFlutter::new(cooldown)),
        }
    }

    /// Log-only mux with no sinks.
    pub fn silent() -> Self {
        Self::new(Vec::new(), Duration::ZERO)
    }

    pub fn from_env(cooldown: Duration) -> Result<Self> {
        let mut sinks: Vec<Box<dyn Notifier>> = Vec::new();
        if let Ok(url) = std::env::var("DISCORD_ALERT_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                sinks.push(Box::new(DiscordNotifier::new(url)));
            }
        }
        if let Some(slack) = SlackNotifier::from_env() {
            sinks.push(Box::new(slack));
        }
        if let Some(email) = EmailSender::from_env()? {
            sinks.push(Box::new(email));
        }
        tracing::info!(
            sinks = ?sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "operator alert sinks configured"
        );
        Ok(Self::new(sinks, cooldown))
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub async fn notify(&self, alert: &OperatorAlert) {
        tracing::error!(
            kind = ?alert.kind,
            subject = %alert.subject,
            title = %alert.title,
            "{}",
            alert.detail
        );

        let allowed = {
            let mut gate = self.gate.lock().unwrap_or_else(|p| p.into_inner());
            let ok = gate.should_alert(&alert.subject, alert.ts);
            if ok {
                gate.record_alert(&alert.subject, alert.ts);
            }
            ok
        };
        if !allowed {
            tracing::debug!(subject = %alert.subject, "alert suppressed by cooldown");
            return;
        }

        for sink in &self.sinks {
            if let Err(e) = sink.send(alert).await {
                tracing::warn!(sink = sink.name(), error = %format!("{e:#}"), "alert delivery failed");
            }
        }
    }
}
