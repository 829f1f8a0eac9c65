// src/ingest/mod.rs
pub mod discovery;
pub mod feed;
pub mod html;
pub mod http;
pub mod providers;
pub mod scheduler;
pub mod types;
pub mod url_guard;

use once_cell::sync::OnceCell;
use regex::Regex;

/// Normalize markup to plain text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags (block-level closings become spaces so words don't glue)
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>|</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize curly quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Truncate to at most `max` chars, appending "..." when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    if max <= 3 {
        return s.chars().take(max).collect();
    }
    let mut out: String = s.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_ws_and_tags() {
        let s = "  <p>Hello,&nbsp;&nbsp; <b>world</b></p><script>x()</script>  ";
        assert_eq!(normalize_text(s), "Hello, world");
    }

    #[test]
    fn normalize_text_ascii_quotes() {
        assert_eq!(normalize_text("\u{201C}ok\u{201D} it\u{2019}s"), "\"ok\" it's");
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate_chars("abcdef", 10), "abcdef");
        assert_eq!(truncate_chars("abcdefghij", 6), "abc...");
        assert_eq!(truncate_chars("žluťoučký", 5), "žl...");
    }
}
