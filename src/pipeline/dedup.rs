// src/pipeline/dedup.rs
use std::sync::Arc;

use crate::errors::RepoError;
use crate::model::{ContentItem, ContentPayload, SourceId};
use crate::repository::Repository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    New(ContentItem),
    Duplicate,
}

impl Admission {
    pub fn is_new(&self) -> bool {
        matches!(self, Admission::New(_))
    }
}

/// Filters candidates down to unseen `(source_id, external_id)` pairs through
/// the repository's insert-if-absent.
#[derive(Clone)]
pub struct DedupGate {
    repo: Arc<dyn Repository>,
}

impl DedupGate {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Whether the pair was stored by an earlier poll. Lets adapters skip
    /// expensive enrichment for items that would be rejected anyway.
    pub async fn is_known(&self, source_id: SourceId, external_id: &str) -> Result<bool, RepoError> {
        self.repo.content_item_exists(source_id, external_id).await
    }

    pub async fn admit(
        &self,
        source_id: SourceId,
        external_id: &str,
        payload: ContentPayload,
    ) -> Result<Admission, RepoError> {
        let (item, was_new) = self
            .repo
            .get_or_create_content_item(source_id, external_id, payload)
            .await?;
        Ok(if was_new {
            Admission::New(item)
        } else {
            Admission::Duplicate
        })
    }
}
