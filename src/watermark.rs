// src/watermark.rs
//! High-water marks that keep adapters from re-yielding already seen content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CandidateItem, SourceType};

pub const COMMIT_PREFIX: &str = "commit:";
pub const PULL_PREFIX: &str = "pr:";
pub const ISSUE_PREFIX: &str = "issue:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Watermark {
    /// Newest publication timestamp observed.
    Published { at: DateTime<Utc> },
    /// Per-stream cursors of a repository monitor.
    Repository(RepoCursor),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCursor {
    pub commit_sha: Option<String>,
    pub pull_number: Option<u64>,
    pub issue_number: Option<u64>,
}

impl Watermark {
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Watermark::Published { at } => Some(*at),
            Watermark::Repository(_) => None,
        }
    }

    pub fn repo_cursor(&self) -> Option<&RepoCursor> {
        match self {
            Watermark::Repository(c) => Some(c),
            Watermark::Published { .. } => None,
        }
    }

    /// Strict "newer than" filter for timestamp watermarks. Undated items always pass.
    pub fn admits(since: Option<&Watermark>, published: Option<DateTime<Utc>>) -> bool {
        match (since.and_then(Watermark::published_at), published) {
            (Some(mark), Some(ts)) => ts > mark,
            _ => true,
        }
    }
}

/// Next watermark after a successful fetch. Never moves backwards; zero items keep `previous`.
pub fn advance(
    previous: Option<&Watermark>,
    items: &[CandidateItem],
    source_type: SourceType,
) -> Option<Watermark> {
    if items.is_empty() {
        return previous.cloned();
    }
    if source_type.is_repository() {
        let mut cursor = previous
            .and_then(Watermark::repo_cursor)
            .cloned()
            .unwrap_or_default();
        advance_cursor(&mut cursor, items);
        return Some(Watermark::Repository(cursor));
    }

    let prev_ts = previous.and_then(Watermark::published_at);
    let newest = items.iter().filter_map(|i| i.payload.published_at).max();
    match (prev_ts, newest) {
        (Some(p), Some(n)) => Some(Watermark::Published { at: p.max(n) }),
        (None, Some(n)) => Some(Watermark::Published { at: n }),
        _ => previous.cloned(),
    }
}

fn advance_cursor(cursor: &mut RepoCursor, items: &[CandidateItem]) {
    let mut newest_commit: Option<(Option<DateTime<Utc>>, &str)> = None;
    for item in items {
        let id = item.external_id.as_str();
        if let Some(sha) = id.strip_prefix(COMMIT_PREFIX) {
            let ts = item.payload.published_at;
            // Later yield wins ties; adapters yield oldest first.
            let replace = match newest_commit {
                None => true,
                Some((best, _)) => ts >= best,
            };
            if replace {
                newest_commit = Some((ts, sha));
            }
        } else if let Some(n) = id.strip_prefix(PULL_PREFIX).and_then(|n| n.parse::<u64>().ok()) {
            cursor.pull_number = Some(cursor.pull_number.map_or(n, |c| c.max(n)));
        } else if let Some(n) = id.strip_prefix(ISSUE_PREFIX).and_then(|n| n.parse::<u64>().ok()) {
            cursor.issue_number = Some(cursor.issue_number.map_or(n, |c| c.max(n)));
        }
    }
    if let Some((_, sha)) = newest_commit {
        cursor.commit_sha = Some(sha.to_string());
    }
}
