// src/ingest/feed.rs
//! Streaming RSS 2.0 / RDF / Atom parser on top of quick-xml.
//!
//! Namespaced elements are matched by local name (`dc:creator` -> `creator`,
//! `yt:videoId` -> `videoid`), which covers the newsletter, arXiv and video feeds
//! without per-dialect structs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use metrics::histogram;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    Xml(String),
    NotAFeed,
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Xml(e) => write!(f, "malformed feed xml: {e}"),
            FeedError::NotAFeed => f.write_str("document is not an RSS or Atom feed"),
        }
    }
}

impl std::error::Error for FeedError {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub video_id: Option<String>,
}

impl FeedEntry {
    /// Richest text available: full content, else summary.
    pub fn best_text(&self) -> &str {
        self.content
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.summary.as_deref())
            .unwrap_or_default()
    }
}

/// Cheap pre-check used by feed probing before a full parse.
pub fn looks_like_feed(body: &str) -> bool {
    let head: String = body.chars().take(1024).collect::<String>().to_ascii_lowercase();
    head.contains("<rss") || head.contains("<feed") || head.contains("<rdf:rdf")
}

pub fn parse_feed(xml: &str) -> Result<ParsedFeed, FeedError> {
    let t0 = std::time::Instant::now();
    let cleaned = scrub_html_entities_for_xml(xml);
    let mut reader = Reader::from_str(&cleaned);
    let cfg = reader.config_mut();
    cfg.trim_text(true);
    cfg.check_end_names = false;

    let mut feed = ParsedFeed::default();
    let mut root_seen = false;
    let mut path: Vec<String> = Vec::new();
    let mut entry: Option<FeedEntry> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if path.is_empty() {
                    root_seen = matches!(name.as_str(), "rss" | "feed" | "rdf");
                    if !root_seen {
                        return Err(FeedError::NotAFeed);
                    }
                }
                if matches!(name.as_str(), "item" | "entry") {
                    entry = Some(FeedEntry::default());
                }
                if let Some(en) = entry.as_mut() {
                    apply_attributes(en, &name, &e);
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(&e);
                if let Some(en) = entry.as_mut() {
                    apply_attributes(en, &name, &e);
                }
            }
            Ok(Event::Text(t)) => {
                let chunk = match t.unescape() {
                    Ok(s) => s.into_owned(),
                    Err(_) => html_escape::decode_html_entities(&String::from_utf8_lossy(&t))
                        .into_owned(),
                };
                text.push_str(&chunk);
            }
            Ok(Event::CData(c)) => {
                text.push_str(&String::from_utf8_lossy(&c));
            }
            Ok(Event::End(_)) => {
                let Some(name) = path.pop() else { continue };
                let parent = path.last().map(String::as_str).unwrap_or_default();
                let value = text.trim().to_string();
                text.clear();

                if matches!(name.as_str(), "item" | "entry") {
                    if let Some(en) = entry.take() {
                        feed.entries.push(en);
                    }
                    continue;
                }
                match entry.as_mut() {
                    Some(en) => apply_text(en, &name, parent, value),
                    None => {
                        if name == "title" && matches!(parent, "channel" | "feed") && !value.is_empty() {
                            feed.title = Some(value);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FeedError::Xml(e.to_string())),
            _ => {}
        }
    }

    if !root_seen {
        return Err(FeedError::NotAFeed);
    }
    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(feed)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref().eq_ignore_ascii_case(key.as_bytes()) {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

fn apply_attributes(en: &mut FeedEntry, name: &str, e: &BytesStart<'_>) {
    match name {
        // Atom links carry the URL in href.
        "link" => {
            let rel = attr(e, "rel");
            if let Some(href) = attr(e, "href") {
                if matches!(rel.as_deref(), None | Some("alternate")) && en.link.is_none() {
                    en.link = Some(href);
                }
            }
        }
        "thumbnail" => {
            if en.thumbnail.is_none() {
                en.thumbnail = attr(e, "url");
            }
        }
        "enclosure" | "content" => {
            let is_image = attr(e, "type").is_some_and(|t| t.starts_with("image/"))
                || attr(e, "medium").is_some_and(|m| m == "image");
            if is_image && en.thumbnail.is_none() {
                en.thumbnail = attr(e, "url");
            }
        }
        _ => {}
    }
}

fn apply_text(en: &mut FeedEntry, name: &str, parent: &str, value: String) {
    if value.is_empty() {
        return;
    }
    match name {
        "title" if parent != "group" => en.title = value,
        "link" => {
            if en.link.is_none() {
                en.link = Some(value);
            }
        }
        "guid" | "id" => en.id = Some(value),
        "videoid" => en.video_id = Some(value),
        "pubdate" | "published" | "issued" => {
            if let Some(ts) = parse_timestamp(&value) {
                en.published = Some(ts);
            }
        }
        "updated" | "date" | "modified" => {
            if en.published.is_none() {
                en.published = parse_timestamp(&value);
            }
        }
        "description" | "summary" => {
            if en.summary.is_none() {
                en.summary = Some(value);
            }
        }
        "encoded" | "content" => en.content = Some(value),
        "creator" => en.author = Some(value),
        "name" if parent == "author" => en.author = Some(value),
        "author" => {
            if en.author.is_none() {
                en.author = Some(value);
            }
        }
        _ => {}
    }
}

/// Parse the timestamp formats seen in feeds, sitemaps and listing pages.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        return DateTime::from_timestamp(dt.unix_timestamp(), 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
        }
    }
    None
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Example Letters</title>
    <item>
      <title>First &amp; foremost</title>
      <link>https://example.test/p/first</link>
      <guid isPermaLink="false">post-1</guid>
      <pubDate>Tue, 04 Mar 2025 10:00:00 GMT</pubDate>
      <dc:creator>Ada</dc:creator>
      <description><![CDATA[<p>Short&nbsp;teaser</p>]]></description>
      <content:encoded><![CDATA[<p>The whole post.</p>]]></content:encoded>
      <enclosure url="https://example.test/cover.png" type="image/png"/>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/">
  <title>Channel</title>
  <entry>
    <id>yt:video:abc123</id>
    <yt:videoId>abc123</yt:videoId>
    <title>Video one</title>
    <link rel="alternate" href="https://www.youtube.com/watch?v=abc123"/>
    <author><name>Creator</name></author>
    <published>2025-03-04T10:00:00+00:00</published>
    <updated>2025-03-05T10:00:00+00:00</updated>
    <media:group>
      <media:title>Video one</media:title>
      <media:thumbnail url="https://i.ytimg.com/vi/abc123/hq.jpg" width="480" height="360"/>
      <media:description>What the video is about</media:description>
    </media:group>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items_with_namespaces() {
        let feed = parse_feed(RSS).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Example Letters"));
        let e = &feed.entries[0];
        assert_eq!(e.title, "First & foremost");
        assert_eq!(e.id.as_deref(), Some("post-1"));
        assert_eq!(e.author.as_deref(), Some("Ada"));
        assert_eq!(e.best_text(), "<p>The whole post.</p>");
        assert_eq!(e.thumbnail.as_deref(), Some("https://example.test/cover.png"));
        assert_eq!(
            e.published,
            Some(Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn parses_atom_video_entries() {
        let feed = parse_feed(ATOM).unwrap();
        let e = &feed.entries[0];
        assert_eq!(e.video_id.as_deref(), Some("abc123"));
        assert_eq!(e.link.as_deref(), Some("https://www.youtube.com/watch?v=abc123"));
        assert_eq!(e.author.as_deref(), Some("Creator"));
        assert_eq!(e.title, "Video one");
        assert_eq!(e.summary.as_deref(), Some("What the video is about"));
        assert_eq!(e.thumbnail.as_deref(), Some("https://i.ytimg.com/vi/abc123/hq.jpg"));
        // published wins over updated
        assert_eq!(
            e.published,
            Some(Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn html_page_is_not_a_feed() {
        assert_eq!(
            parse_feed("<html><body>hi</body></html>"),
            Err(FeedError::NotAFeed)
        );
        assert!(!looks_like_feed("<!doctype html><html>"));
        assert!(looks_like_feed(RSS));
    }

    #[test]
    fn timestamp_formats() {
        let want = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-01-02"), Some(want));
        assert_eq!(parse_timestamp("January 02, 2025"), Some(want));
        assert_eq!(parse_timestamp("Jan 02, 2025"), Some(want));
        assert_eq!(parse_timestamp("2025-01-02T00:00:00Z"), Some(want));
        assert_eq!(parse_timestamp("not a date"), None);
    }
}
