// src/ai/mod.rs
//! Summarization capability: item summaries and listing-structure inference.

pub mod providers;
pub mod summarizer;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ai::AiConfig;
use crate::errors::SummarizeError;
use crate::model::{ExtractionProfile, SourceType};

pub use providers::{AnthropicProvider, LlmProvider, OpenAiProvider};
pub use summarizer::{DisabledSummarizer, LlmSummarizer, MockSummarizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryContext {
    pub source_type: SourceType,
    pub title: String,
    pub author: Option<String>,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, ctx: &SummaryContext) -> Result<String, SummarizeError>;

    /// Infer CSS selectors for the post listing in `html` (already cleaned and truncated).
    async fn infer_listing(&self, page_url: &str, html: &str) -> Result<ExtractionProfile, SummarizeError>;

    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool {
        true
    }
}

pub type DynSummarizer = Arc<dyn Summarizer>;

/// Build the summarizer selected by config.
///
/// * `AI_TEST_MODE=mock` returns a deterministic mock.
/// * Disabled config or a missing key returns [`DisabledSummarizer`].
/// * Otherwise the configured provider (Anthropic by default).
pub fn build_summarizer(cfg: &AiConfig) -> anyhow::Result<DynSummarizer> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockSummarizer));
    }
    if !cfg.enabled || cfg.api_key.trim().is_empty() {
        tracing::warn!(provider = %cfg.provider, "summarizer disabled (AI off or no API key)");
        return Ok(Arc::new(DisabledSummarizer));
    }
    match cfg.provider.as_str() {
        "anthropic" => {
            let p = AnthropicProvider::new(cfg.api_key.clone(), cfg.model_or_default(), cfg.timeout())?;
            Ok(Arc::new(LlmSummarizer::new(p, cfg.max_tokens)))
        }
        "openai" => {
            let p = OpenAiProvider::new(cfg.api_key.clone(), cfg.model_or_default(), cfg.timeout())?;
            Ok(Arc::new(LlmSummarizer::new(p, cfg.max_tokens)))
        }
        other => anyhow::bail!("unsupported AI provider '{other}'"),
    }
}
