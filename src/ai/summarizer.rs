// src/ai/summarizer.rs
use async_trait::async_trait;
use serde_json::Value;

use super::providers::LlmProvider;
use super::{Summarizer, SummaryContext};
use crate::errors::SummarizeError;
use crate::model::{ExtractionProfile, SourceType};

const LISTING_MAX_TOKENS: u32 = 1024;

const SUMMARY_SYSTEM: &str = "You write concise briefings for a research-tracking channel. \
Return plain markdown: a one-sentence gist followed by 3-5 bullet points of key facts. \
Do not invent facts that are not in the text.";

const LISTING_SYSTEM: &str = "You analyse the HTML of a blog or news listing page and return \
CSS selectors that locate each post. Respond with a single JSON object with keys \
site_name, post_selector, title_selector, url_selector, url_attribute, date_selector, \
date_attribute, author_selector, base_url. Selectors inside a post are relative to the \
post element; use an empty string when the post element itself holds the value. \
If the page has no post listing respond with {\"error\": \"<reason>\"}.";

fn summary_prompt(text: &str, ctx: &SummaryContext) -> String {
    let kind = match ctx.source_type {
        SourceType::ChannelFeed => "video transcript",
        SourceType::PaperFeed => "research paper abstract",
        SourceType::NewsletterFeed => "newsletter issue",
        _ => "article",
    };
    let mut p = format!("Summarize this {kind}.\nTitle: {}\n", ctx.title);
    if let Some(a) = &ctx.author {
        p.push_str(&format!("Author: {a}\n"));
    }
    p.push_str("\n---\n");
    p.push_str(text);
    p
}

/// Summarizer backed by a chat-completion provider.
pub struct LlmSummarizer<P: LlmProvider> {
    provider: P,
    max_tokens: u32,
}

impl<P: LlmProvider> LlmSummarizer<P> {
    pub fn new(provider: P, max_tokens: u32) -> Self {
        Self {
            provider,
            max_tokens,
        }
    }
}

#[async_trait]
impl<P: LlmProvider> Summarizer for LlmSummarizer<P> {
    async fn summarize(&self, text: &str, ctx: &SummaryContext) -> Result<String, SummarizeError> {
        let prompt = summary_prompt(text, ctx);
        let out = self
            .provider
            .complete(SUMMARY_SYSTEM, &prompt, self.max_tokens)
            .await?;
        let out = out.trim();
        if out.is_empty() {
            return Err(SummarizeError::BadOutput("empty completion".into()));
        }
        Ok(out.to_string())
    }

    async fn infer_listing(&self, page_url: &str, html: &str) -> Result<ExtractionProfile, SummarizeError> {
        let prompt = format!("Page URL: {page_url}\n\nHTML:\n{html}");
        let raw = self
            .provider
            .complete(LISTING_SYSTEM, &prompt, LISTING_MAX_TOKENS)
            .await?;
        parse_listing_reply(&raw, page_url)
    }

    fn name(&self) -> &'static str {
        self.provider.name()
    }
}

/// Parse the model's listing answer. Tolerates code fences and chatter around the JSON.
pub fn parse_listing_reply(raw: &str, page_url: &str) -> Result<ExtractionProfile, SummarizeError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &raw[s..=e],
        _ => return Err(SummarizeError::BadOutput("no JSON object in reply".into())),
    };
    let mut value: Value =
        serde_json::from_str(json).map_err(|e| SummarizeError::BadOutput(e.to_string()))?;

    if let Some(reason) = value.get("error") {
        let reason = reason.as_str().unwrap_or("unspecified").to_string();
        return Err(SummarizeError::BadOutput(format!("no listing found: {reason}")));
    }

    if let Some(obj) = value.as_object_mut() {
        // null optionals come back as JSON null or "", both mean "absent"
        obj.retain(|_, v| !v.is_null());
        if !obj.contains_key("site_name") {
            obj.insert(
                "site_name".into(),
                Value::String(crate::ingest::html::site_name_from_url(page_url)),
            );
        }
        if !obj.contains_key("base_url") {
            obj.insert("base_url".into(), Value::String(page_url.to_string()));
        }
    }

    let mut profile: ExtractionProfile =
        serde_json::from_value(value).map_err(|e| SummarizeError::BadOutput(e.to_string()))?;
    if profile.post_selector.trim().is_empty() {
        return Err(SummarizeError::BadOutput("post_selector is empty".into()));
    }
    if profile.url_attribute.trim().is_empty() {
        profile.url_attribute = "href".into();
    }
    profile.date_selector = profile.date_selector.filter(|s| !s.trim().is_empty());
    profile.date_attribute = profile.date_attribute.filter(|s| !s.trim().is_empty());
    profile.author_selector = profile.author_selector.filter(|s| !s.trim().is_empty());
    Ok(profile)
}

/// Used when no provider is configured; every call reports `Disabled`.
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _text: &str, _ctx: &SummaryContext) -> Result<String, SummarizeError> {
        Err(SummarizeError::Disabled)
    }

    async fn infer_listing(&self, _page_url: &str, _html: &str) -> Result<ExtractionProfile, SummarizeError> {
        Err(SummarizeError::Disabled)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Deterministic offline summarizer selected by `AI_TEST_MODE=mock`.
pub struct MockSummarizer;

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, text: &str, ctx: &SummaryContext) -> Result<String, SummarizeError> {
        let words: Vec<&str> = text.split_whitespace().take(24).collect();
        Ok(format!("[{}] {}: {}", ctx.source_type.label(), ctx.title, words.join(" ")))
    }

    async fn infer_listing(&self, page_url: &str, _html: &str) -> Result<ExtractionProfile, SummarizeError> {
        Ok(ExtractionProfile {
            site_name: crate::ingest::html::site_name_from_url(page_url),
            post_selector: "article".into(),
            title_selector: "h2".into(),
            url_selector: "a".into(),
            url_attribute: "href".into(),
            date_selector: Some("time".into()),
            date_attribute: Some("datetime".into()),
            author_selector: None,
            base_url: Some(page_url.to_string()),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_reply_with_fences_and_nulls() {
        let raw = "Here you go:\n```json\n{\"post_selector\": \"div.post\", \"title_selector\": \"h2\", \
                   \"url_selector\": \"a\", \"url_attribute\": \"href\", \"date_selector\": null, \
                   \"author_selector\": \"\"}\n```";
        let p = parse_listing_reply(raw, "https://blog.example.com/news").unwrap();
        assert_eq!(p.post_selector, "div.post");
        assert_eq!(p.base_url.as_deref(), Some("https://blog.example.com/news"));
        assert!(!p.site_name.is_empty());
        assert_eq!(p.date_selector, None);
        assert_eq!(p.author_selector, None);
    }

    #[test]
    fn listing_reply_error_form() {
        let err = parse_listing_reply("{\"error\": \"no posts\"}", "https://x.test").unwrap_err();
        assert!(matches!(err, SummarizeError::BadOutput(m) if m.contains("no posts")));
        assert!(parse_listing_reply("nothing here", "https://x.test").is_err());
    }

    #[tokio::test]
    async fn disabled_reports_disabled() {
        let s = DisabledSummarizer;
        assert!(!s.is_enabled());
        let ctx = SummaryContext {
            source_type: SourceType::GenericFeed,
            title: "t".into(),
            author: None,
        };
        assert_eq!(s.summarize("x", &ctx).await, Err(SummarizeError::Disabled));
    }
}
