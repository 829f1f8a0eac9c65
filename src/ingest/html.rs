// src/ingest/html.rs
//! HTML helpers built on `scraper`: feed link discovery, listing extraction through
//! an [`ExtractionProfile`], page cleaning for model input and article text extraction.
//!
//! `scraper::Html` is not `Send`, so everything here is synchronous and returns owned
//! data; callers fetch first and parse afterwards.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use url::Url;

use crate::ingest::feed::parse_timestamp;
use crate::ingest::normalize_text;
use crate::model::ExtractionProfile;

const DROP_TAGS: &[&str] = &["script", "style", "noscript", "svg", "path", "iframe"];
const KEEP_ATTRS: &[&str] = &["class", "id", "href", "datetime", "data-date", "rel"];
const VOID_TAGS: &[&str] = &["br", "hr", "img", "input", "meta", "link", "source", "wbr"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    Selector(String),
    NoPosts,
}

impl std::fmt::Display for ProfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileError::Selector(s) => write!(f, "invalid selector: {s}"),
            ProfileError::NoPosts => f.write_str("no posts matched the extraction profile"),
        }
    }
}

impl std::error::Error for ProfileError {}

/// One entry of a post listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPost {
    pub url: String,
    pub title: String,
    pub published: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Article {
    pub title: Option<String>,
    pub text: String,
    pub published: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

fn selector(css: &str) -> Result<Selector, ProfileError> {
    Selector::parse(css).map_err(|e| ProfileError::Selector(format!("{css}: {e}")))
}

fn text_of(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

/// Resolve `href` against `base`, keeping only http(s) results.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let joined = Url::parse(base).ok()?.join(href).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

/// `<link rel="alternate" type="application/rss+xml|atom+xml">` and `rel="feed"` targets.
pub fn find_feed_links(html: &str, page_url: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Ok(links) = selector("link[href]") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for el in doc.select(&links) {
        let v = el.value();
        let rel = v.attr("rel").unwrap_or_default().to_ascii_lowercase();
        let ty = v.attr("type").unwrap_or_default().to_ascii_lowercase();
        let rels: Vec<&str> = rel.split_whitespace().collect();
        let is_feed = (rels.contains(&"alternate") && (ty.contains("rss") || ty.contains("atom")))
            || rels.contains(&"feed");
        if !is_feed {
            continue;
        }
        if let Some(u) = v.attr("href").and_then(|h| resolve_url(page_url, h)) {
            if !out.contains(&u) {
                out.push(u);
            }
        }
    }
    out
}

/// Apply a listing profile to a page. Posts without both title and URL are skipped.
pub fn extract_posts(
    html: &str,
    page_url: &str,
    profile: &ExtractionProfile,
) -> Result<Vec<ListingPost>, ProfileError> {
    extract_posts_limited(html, page_url, profile, usize::MAX)
}

/// At least one of the first ten post containers must yield a title and URL.
pub fn validate_profile(
    html: &str,
    page_url: &str,
    profile: &ExtractionProfile,
) -> Result<usize, ProfileError> {
    let found = extract_posts_limited(html, page_url, profile, 10)?;
    if found.is_empty() {
        Err(ProfileError::NoPosts)
    } else {
        Ok(found.len())
    }
}

fn extract_posts_limited(
    html: &str,
    page_url: &str,
    profile: &ExtractionProfile,
    max_containers: usize,
) -> Result<Vec<ListingPost>, ProfileError> {
    let post_sel = selector(&profile.post_selector)?;
    let title_sel = optional_selector(&profile.title_selector)?;
    let url_sel = optional_selector(&profile.url_selector)?;
    let date_sel = match profile.date_selector.as_deref() {
        Some(s) => optional_selector(s)?,
        None => None,
    };
    let author_sel = match profile.author_selector.as_deref() {
        Some(s) => optional_selector(s)?,
        None => None,
    };
    let base = profile
        .base_url
        .as_deref()
        .filter(|b| Url::parse(b).is_ok())
        .unwrap_or(page_url);

    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for post in doc.select(&post_sel).take(max_containers) {
        let title = match &title_sel {
            Some(s) => post.select(s).next().map(text_of),
            None => Some(text_of(post)),
        }
        .filter(|t| !t.is_empty());

        let link_el = match &url_sel {
            Some(s) => post.select(s).next(),
            None => None,
        }
        .or_else(|| (post.value().name() == "a").then_some(post));
        let url = link_el
            .and_then(|el| el.value().attr(&profile.url_attribute))
            .and_then(|href| resolve_url(base, href));

        let (Some(title), Some(url)) = (title, url) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }

        let published = date_sel.as_ref().and_then(|s| post.select(s).next()).and_then(|el| {
            let raw = profile
                .date_attribute
                .as_deref()
                .and_then(|a| el.value().attr(a))
                .map(str::to_string)
                .unwrap_or_else(|| text_of(el));
            parse_timestamp(&raw)
        });
        let author = author_sel
            .as_ref()
            .and_then(|s| post.select(s).next())
            .map(text_of)
            .filter(|a| !a.is_empty());

        out.push(ListingPost {
            url,
            title,
            published,
            author,
        });
    }
    Ok(out)
}

fn optional_selector(css: &str) -> Result<Option<Selector>, ProfileError> {
    if css.trim().is_empty() {
        Ok(None)
    } else {
        selector(css).map(Some)
    }
}

/// Strip scripts/styles/svg and all but a few structural attributes, then cut to
/// `max_len` bytes at a tag boundary.
pub fn clean_html_for_analysis(html: &str, max_len: usize) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::with_capacity(html.len().min(max_len + 64));
    write_clean(doc.root_element(), &mut out);
    if out.len() <= max_len {
        return out;
    }
    let mut cut = max_len;
    while !out.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &out[..cut];
    let end = match head.rfind('>') {
        Some(i) if i > cut / 2 => i + 1,
        _ => cut,
    };
    tracing::debug!(original = out.len(), truncated = end, "page html truncated for analysis");
    out[..end].to_string()
}

fn write_clean(el: ElementRef<'_>, out: &mut String) {
    let v = el.value();
    let name = v.name();
    if DROP_TAGS.contains(&name) {
        return;
    }
    out.push('<');
    out.push_str(name);
    for (k, val) in v.attrs() {
        if KEEP_ATTRS.contains(&k) {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&html_escape::encode_double_quoted_attribute(val));
            out.push('"');
        }
    }
    out.push('>');
    if VOID_TAGS.contains(&name) {
        return;
    }
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            write_clean(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            let t: &str = text;
            let t = t.trim();
            if !t.is_empty() {
                out.push_str(&html_escape::encode_text(t));
            }
        }
    }
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

/// Main text, title and publication metadata of an article page.
pub fn extract_article(html: &str) -> Article {
    let doc = Html::parse_document(html);
    let meta = |css: &str| -> Option<String> {
        let sel = selector(css).ok()?;
        doc.select(&sel)
            .next()
            .and_then(|el| el.value().attr("content").map(|c| c.trim().to_string()))
            .filter(|c| !c.is_empty())
    };
    let first_text = |css: &str| -> Option<String> {
        let sel = selector(css).ok()?;
        doc.select(&sel).next().map(text_of).filter(|t| !t.is_empty())
    };

    let title = meta("meta[property=\"og:title\"]")
        .or_else(|| first_text("h1"))
        .or_else(|| first_text("title"));

    let published = meta("meta[property=\"article:published_time\"]")
        .or_else(|| meta("meta[name=\"date\"]"))
        .or_else(|| {
            let sel = selector("time[datetime]").ok()?;
            doc.select(&sel)
                .next()
                .and_then(|el| el.value().attr("datetime").map(str::to_string))
        })
        .and_then(|raw| parse_timestamp(&raw));

    let author = meta("meta[name=\"author\"]");

    let mut text = String::new();
    for css in ["article", "main", "[role=\"main\"]", ".post-content", ".entry-content", "body"] {
        let Ok(container_sel) = selector(css) else { continue };
        let Some(container) = doc.select(&container_sel).next() else { continue };
        let paragraphs = selector("p, li, h2, h3, blockquote, pre")
            .map(|p| {
                container
                    .select(&p)
                    .map(text_of)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            })
            .unwrap_or_default();
        text = if paragraphs.is_empty() {
            text_of(container)
        } else {
            paragraphs
        };
        if !text.is_empty() {
            break;
        }
    }

    Article {
        title,
        text,
        published,
        author,
    }
}

/// SHA-256 hex digest used to detect unchanged pages.
pub fn content_hash(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Readable site name from a URL host (`www.example.com` -> `example.com`).
pub fn site_name_from_url(raw: &str) -> String {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| raw.to_string())
}
