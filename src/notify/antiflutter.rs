// src/notify/antiflutter.rs
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Cooldown gate keyed by alert subject, so one flapping source cannot spam the
/// operator while other sources still alert.
#[derive(Debug, Clone, Default)]
pub struct AntiFlutter {
    cooldown: ChronoDuration,
    last_alert: HashMap<String, DateTime<Utc>>,
}

impl AntiFlutter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: ChronoDuration::from_std(cooldown).unwrap_or_else(|_| ChronoDuration::days(36_500)),
            last_alert: HashMap::new(),
        }
    }

    /// Does NOT mutate state.
    pub fn should_alert(&self, subject: &str, now: DateTime<Utc>) -> bool {
        match self.last_alert.get(subject) {
            None => true,
            Some(ts) => now.signed_duration_since(*ts) >= self.cooldown,
        }
    }

    pub fn record_alert(&mut self, subject: &str, now: DateTime<Utc>) {
        self.last_alert.insert(subject.to_string(), now);
    }
}
