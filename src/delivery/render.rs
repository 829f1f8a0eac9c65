// src/delivery/render.rs
use super::RenderedItem;
use crate::ingest::truncate_chars;
use crate::model::{ContentItem, Source};

pub const MAX_TITLE: usize = 256;
pub const MAX_DESCRIPTION: usize = 4096;
pub const NO_SUMMARY: &str = "No summary available.";

pub fn render_item(item: &ContentItem, source: &Source) -> RenderedItem {
    let summary = item
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_SUMMARY);
    RenderedItem {
        title: truncate_chars(item.title.trim(), MAX_TITLE),
        description: truncate_chars(summary, MAX_DESCRIPTION),
        url: item.url.clone(),
        author: item.author.clone(),
        thumbnail_url: item.thumbnail_url.clone(),
        timestamp: item.published_at,
        footer: format!("{} | {}", source.source_type.label(), source.name),
    }
}
