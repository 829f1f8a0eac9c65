// src/ai_bootstrap.rs
use crate::ai::{build_summarizer, DynSummarizer, SummaryContext};
use crate::config::ai::AiConfig;
use crate::model::SourceType;
use tracing::{info, warn};

pub struct AiRuntime {
    pub cfg: AiConfig,
    pub summarizer: DynSummarizer,
}

impl AiRuntime {
    /// Load AI config and build the summarizer. `max_tokens` comes from settings
    /// and overrides the file value.
    pub fn load(max_tokens: u32) -> anyhow::Result<Self> {
        let mut cfg = AiConfig::load_default()?;
        cfg.max_tokens = max_tokens;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: AiConfig) -> anyhow::Result<Self> {
        // Safe diagnostics: only provider + enabled + key length
        info!(
            "AI cfg loaded: provider={}, enabled={}, key_len={}",
            cfg.provider,
            cfg.enabled,
            cfg.api_key.len()
        );
        let summarizer = build_summarizer(&cfg)?;
        Ok(Self { cfg, summarizer })
    }

    /// One summarize call against a fixed sample; logs the outcome and never fails.
    pub async fn quick_probe(&self) {
        if !self.summarizer.is_enabled() {
            warn!("AI quick_probe skipped: summarizer is disabled");
            return;
        }
        let ctx = SummaryContext {
            source_type: SourceType::GenericFeed,
            title: "Probe".into(),
            author: None,
        };
        let sample = "A new open-weights language model was released today with a longer context window.";
        match self.summarizer.summarize(sample, &ctx).await {
            Ok(s) => info!(provider = self.summarizer.name(), chars = s.len(), "AI quick_probe ok"),
            Err(e) => warn!(provider = self.summarizer.name(), error = %e, "AI quick_probe failed"),
        }
    }
}
