// src/ingest/types.rs
use crate::errors::FetchFailure;
use crate::model::{CandidateItem, DiscoveryRecord, Source, SourceCache};
use crate::watermark::Watermark;

/// What one poll of a source produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterOutput {
    /// New candidates, oldest first.
    pub items: Vec<CandidateItem>,
    /// Replacement for the source's cached state, when the adapter resolved something.
    pub source_cache: Option<SourceCache>,
    /// Replacement discovery record (DiscoveredBlog only).
    pub discovery: Option<DiscoveryRecord>,
}

impl AdapterOutput {
    pub fn items(items: Vec<CandidateItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }
}

/// One adapter per source type. Adapters never touch storage; the pipeline
/// persists whatever they report.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch_new_items(
        &self,
        source: &Source,
        since: Option<&Watermark>,
    ) -> Result<AdapterOutput, FetchFailure>;

    /// Fill in a candidate returned with a pending article. The pipeline calls
    /// this only for candidates it has not stored before.
    async fn complete(&self, _candidate: &mut CandidateItem) {}

    fn name(&self) -> &'static str;
}
