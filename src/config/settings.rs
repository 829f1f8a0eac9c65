// src/config/settings.rs
//! Process settings read from the environment. Every knob has a default and a
//! valid range; a bad value is a startup error naming the variable.

use std::time::Duration;

use anyhow::{anyhow, Result};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub content_poll_interval: Duration,
    pub github_poll_interval: Duration,
    pub forward_poll_interval: Duration,
    pub fetch_delay: Duration,

    pub summary_max_tokens: u32,
    pub summary_max_input_length: usize,
    pub summarization_delay: Duration,
    pub summary_backoff_base: Duration,
    pub summary_backoff_max: Duration,

    pub max_consecutive_failures: u32,
    pub permanent_failure_ceiling: u32,

    pub max_html_length: usize,
    pub discovery_cache_ttl: Duration,
    pub max_items_per_poll: usize,
    pub youtube_max_results: usize,

    pub max_concurrent_forwards: usize,
    pub forward_max_attachment_bytes: u64,
    pub forward_max_total_attachment_bytes: u64,

    pub http_timeout: Duration,

    pub discord_bot_token: Option<String>,
    pub youtube_api_key: Option<String>,
    pub github_token: Option<String>,

    pub log_level: String,
    pub log_json: bool,
    pub state_path: Option<String>,
    pub alert_cooldown: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            content_poll_interval: Duration::from_secs(5 * 60),
            github_poll_interval: Duration::from_secs(5 * 60),
            forward_poll_interval: Duration::from_secs(30),
            fetch_delay: Duration::from_secs(1),
            summary_max_tokens: 2048,
            summary_max_input_length: 100_000,
            summarization_delay: Duration::from_millis(500),
            summary_backoff_base: Duration::from_secs(60),
            summary_backoff_max: Duration::from_secs(3600),
            max_consecutive_failures: 3,
            permanent_failure_ceiling: 3,
            max_html_length: 50_000,
            discovery_cache_ttl: Duration::from_secs(24 * 3600),
            max_items_per_poll: 20,
            youtube_max_results: 5,
            max_concurrent_forwards: 5,
            forward_max_attachment_bytes: 10 * MIB,
            forward_max_total_attachment_bytes: 25 * MIB,
            http_timeout: Duration::from_secs(30),
            discord_bot_token: None,
            youtube_api_key: None,
            github_token: None,
            log_level: "info".into(),
            log_json: false,
            state_path: None,
            alert_cooldown: Duration::from_secs(3600),
        }
    }
}

struct Reader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Reader<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn int(&self, key: &str, default: u64, min: u64, max: u64) -> Result<u64> {
        let Some(raw) = self.raw(key) else {
            return Ok(default);
        };
        let v: u64 = raw
            .parse()
            .map_err(|_| anyhow!("{key}: expected an integer, got '{raw}'"))?;
        if !(min..=max).contains(&v) {
            return Err(anyhow!("{key}: {v} is outside {min}..={max}"));
        }
        Ok(v)
    }

    fn secs_f64(&self, key: &str, default: f64, min: f64, max: f64) -> Result<Duration> {
        let Some(raw) = self.raw(key) else {
            return Ok(Duration::from_secs_f64(default));
        };
        let v: f64 = raw
            .parse()
            .map_err(|_| anyhow!("{key}: expected a number, got '{raw}'"))?;
        if !v.is_finite() || v < min || v > max {
            return Err(anyhow!("{key}: {v} is outside {min}..={max}"));
        }
        Ok(Duration::from_secs_f64(v))
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let r = Reader { lookup };
        let d = Settings::default();

        let ceiling = r.int("MAX_CONSECUTIVE_FAILURES", 3, 1, 100)? as u32;
        let permanent = r.int("PERMANENT_FAILURE_CEILING", ceiling as u64, 1, 100)? as u32;

        let backoff_base = r.int("SUMMARY_BACKOFF_BASE_SECONDS", 60, 1, 86_400)?;
        let backoff_max = r.int("SUMMARY_BACKOFF_MAX_SECONDS", 3600, 1, 86_400)?;
        if backoff_max < backoff_base {
            return Err(anyhow!(
                "SUMMARY_BACKOFF_MAX_SECONDS ({backoff_max}) is below SUMMARY_BACKOFF_BASE_SECONDS ({backoff_base})"
            ));
        }

        let max_file = r.int("FORWARD_MAX_ATTACHMENT_BYTES", d.forward_max_attachment_bytes, 1, 500 * MIB)?;
        let max_total = r.int(
            "FORWARD_MAX_TOTAL_ATTACHMENT_BYTES",
            d.forward_max_total_attachment_bytes,
            1,
            500 * MIB,
        )?;

        Ok(Settings {
            content_poll_interval: Duration::from_secs(60 * r.int("CONTENT_POLL_INTERVAL_MINUTES", 5, 1, 60)?),
            github_poll_interval: Duration::from_secs(60 * r.int("GITHUB_POLL_INTERVAL_MINUTES", 5, 1, 60)?),
            forward_poll_interval: Duration::from_secs(r.int("FORWARD_POLL_INTERVAL_SECONDS", 30, 5, 3600)?),
            fetch_delay: r.secs_f64("FETCH_DELAY_SECONDS", 1.0, 0.0, 60.0)?,

            summary_max_tokens: r.int("SUMMARY_MAX_TOKENS", 2048, 256, 8192)? as u32,
            summary_max_input_length: r.int("SUMMARY_MAX_INPUT_LENGTH", 100_000, 1000, 500_000)? as usize,
            summarization_delay: r.secs_f64("SUMMARIZATION_DELAY_SECONDS", 0.5, 0.0, 30.0)?,
            summary_backoff_base: Duration::from_secs(backoff_base),
            summary_backoff_max: Duration::from_secs(backoff_max),

            max_consecutive_failures: ceiling,
            permanent_failure_ceiling: permanent,

            max_html_length: r.int("MAX_HTML_LENGTH", 50_000, 10_000, 500_000)? as usize,
            discovery_cache_ttl: Duration::from_secs(3600 * r.int("DISCOVERY_CACHE_TTL_HOURS", 24, 1, 24 * 30)?),
            max_items_per_poll: r.int("MAX_ITEMS_PER_POLL", 20, 1, 500)? as usize,
            youtube_max_results: r.int("YOUTUBE_MAX_RESULTS", 5, 1, 50)? as usize,

            max_concurrent_forwards: r.int("MAX_CONCURRENT_FORWARDS", 5, 1, 20)? as usize,
            forward_max_attachment_bytes: max_file,
            forward_max_total_attachment_bytes: max_total,

            http_timeout: Duration::from_secs(r.int("HTTP_TIMEOUT_SECONDS", 30, 5, 120)?),

            discord_bot_token: r.raw("DISCORD_BOT_TOKEN"),
            youtube_api_key: r.raw("YOUTUBE_API_KEY"),
            github_token: r.raw("GITHUB_TOKEN"),

            log_level: r.raw("LOG_LEVEL").unwrap_or(d.log_level),
            log_json: r
                .raw("LOG_FORMAT")
                .is_some_and(|v| v.eq_ignore_ascii_case("json")),
            state_path: r.raw("STATE_PATH"),
            alert_cooldown: Duration::from_secs(r.int("ALERT_COOLDOWN_SECONDS", 3600, 0, 7 * 86_400)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(move |k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let s = from(&[]).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn permanent_ceiling_follows_failure_ceiling() {
        let s = from(&[("MAX_CONSECUTIVE_FAILURES", "7")]).unwrap();
        assert_eq!(s.max_consecutive_failures, 7);
        assert_eq!(s.permanent_failure_ceiling, 7);
        let s = from(&[("MAX_CONSECUTIVE_FAILURES", "7"), ("PERMANENT_FAILURE_CEILING", "2")]).unwrap();
        assert_eq!(s.permanent_failure_ceiling, 2);
    }

    #[test]
    fn out_of_range_names_the_variable() {
        let err = from(&[("CONTENT_POLL_INTERVAL_MINUTES", "0")]).unwrap_err();
        assert!(err.to_string().contains("CONTENT_POLL_INTERVAL_MINUTES"));
        let err = from(&[("FETCH_DELAY_SECONDS", "abc")]).unwrap_err();
        assert!(err.to_string().contains("FETCH_DELAY_SECONDS"));
        assert!(from(&[("MAX_CONCURRENT_FORWARDS", "21")]).is_err());
    }

    #[test]
    fn fractional_delays_and_tokens() {
        let s = from(&[
            ("FETCH_DELAY_SECONDS", "0"),
            ("SUMMARIZATION_DELAY_SECONDS", "1.5"),
            ("GITHUB_TOKEN", "  "),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();
        assert_eq!(s.fetch_delay, Duration::ZERO);
        assert_eq!(s.summarization_delay, Duration::from_millis(1500));
        assert_eq!(s.github_token, None);
        assert!(s.log_json);
    }
}
