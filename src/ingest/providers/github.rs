// src/ingest/providers/github.rs
//! Repository monitor: commits, pull requests and issues merged into one stream.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::errors::FetchFailure;
use crate::ingest::http::{HttpFetch, HttpRequest};
use crate::ingest::truncate_chars;
use crate::ingest::types::{AdapterOutput, SourceAdapter};
use crate::model::{CandidateItem, ContentPayload, Source};
use crate::watermark::{RepoCursor, Watermark, COMMIT_PREFIX, ISSUE_PREFIX, PULL_PREFIX};

const API_BASE: &str = "https://api.github.com";
const BODY_LIMIT: usize = 1000;

/// `owner/repo` or a github.com URL.
pub fn parse_repo_slug(identifier: &str) -> Option<(String, String)> {
    let id = identifier.trim().trim_end_matches('/');
    let path = if id.starts_with("http://") || id.starts_with("https://") {
        let u = Url::parse(id).ok()?;
        if u.host_str()?.trim_start_matches("www.") != "github.com" {
            return None;
        }
        u.path().trim_matches('/').to_string()
    } else {
        id.to_string()
    };
    let mut parts = path.split('/');
    let owner = parts.next()?.trim();
    let repo = parts.next()?.trim().trim_end_matches(".git");
    let valid = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    (valid(owner) && valid(repo)).then(|| (owner.to_string(), repo.to_string()))
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    sha: String,
    html_url: String,
    commit: CommitDetail,
    #[serde(default)]
    author: Option<Login>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
    #[serde(default)]
    author: Option<GitAuthor>,
}

#[derive(Debug, Deserialize)]
struct GitAuthor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Login {
    login: String,
}

#[derive(Debug, Deserialize)]
struct NumberedEntry {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
    #[serde(default)]
    user: Option<Login>,
    created_at: DateTime<Utc>,
    /// Present on issues that are really pull requests.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

pub struct RepositoryMonitor {
    http: Arc<dyn HttpFetch>,
    token: String,
    per_page: usize,
    api_base: String,
}

impl RepositoryMonitor {
    pub fn new(http: Arc<dyn HttpFetch>, token: String, per_page: usize) -> Self {
        Self {
            http,
            token,
            per_page: per_page.clamp(1, 100),
            api_base: API_BASE.to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchFailure> {
        let url = format!("{}{path}", self.api_base);
        let req = HttpRequest::get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        let resp = self.http.send(req).await?;
        match resp.status {
            200..=299 => {}
            404 => return Err(FetchFailure::not_found(format!("repository not found: {url}"))),
            401 => return Err(FetchFailure::permanent("GitHub rejected the token (401)")),
            403 | 429 => return Err(FetchFailure::transient(format!("GitHub rate limit ({})", resp.status))),
            s => return Err(FetchFailure::from_status(s, &url)),
        }
        serde_json::from_str(&resp.body)
            .map_err(|e| FetchFailure::permanent(format!("unexpected GitHub reply from {url}: {e}")))
    }

    async fn commits(&self, repo: &str, cursor: &RepoCursor) -> Result<Vec<CandidateItem>, FetchFailure> {
        let list: Vec<CommitEntry> = self
            .get_json(&format!("/repos/{repo}/commits?per_page={}", self.per_page))
            .await?;
        let mut out = Vec::new();
        // newest first; stop at the last commit already seen
        for c in list {
            if cursor.commit_sha.as_deref() == Some(c.sha.as_str()) {
                break;
            }
            let git_author = c.commit.author.as_ref();
            out.push(CandidateItem {
                pending_article: None,
                external_id: format!("{COMMIT_PREFIX}{}", c.sha),
                payload: ContentPayload {
                    title: commit_title(&c.sha, &c.commit.message),
                    body: truncate_chars(c.commit.message.trim(), BODY_LIMIT),
                    author: c
                        .author
                        .map(|a| a.login)
                        .or_else(|| git_author.and_then(|a| a.name.clone())),
                    url: c.html_url,
                    published_at: git_author.and_then(|a| a.date),
                    thumbnail_url: None,
                },
            });
        }
        Ok(out)
    }

    async fn numbered(
        &self,
        repo: &str,
        kind: &str,
        after: Option<u64>,
    ) -> Result<Vec<CandidateItem>, FetchFailure> {
        let list: Vec<NumberedEntry> = self
            .get_json(&format!(
                "/repos/{repo}/{kind}?state=all&sort=created&direction=desc&per_page={}",
                self.per_page
            ))
            .await?;
        let (prefix, label) = if kind == "pulls" {
            (PULL_PREFIX, "PR")
        } else {
            (ISSUE_PREFIX, "Issue")
        };
        Ok(list
            .into_iter()
            .filter(|e| kind == "pulls" || e.pull_request.is_none())
            .filter(|e| after.map_or(true, |n| e.number > n))
            .map(|e| CandidateItem {
                pending_article: None,
                external_id: format!("{prefix}{}", e.number),
                payload: ContentPayload {
                    title: format!("{label} #{}: {}", e.number, e.title.trim()),
                    body: truncate_chars(e.body.as_deref().unwrap_or_default().trim(), BODY_LIMIT),
                    author: e.user.map(|u| u.login),
                    url: e.html_url,
                    published_at: Some(e.created_at),
                    thumbnail_url: None,
                },
            })
            .collect())
    }
}

/// "Commit abc1234: first line of the message".
fn commit_title(sha: &str, message: &str) -> String {
    let short: String = sha.chars().take(7).collect();
    let first_line = message.lines().next().unwrap_or_default().trim();
    format!("Commit {short}: {first_line}")
}

#[async_trait]
impl SourceAdapter for RepositoryMonitor {
    async fn fetch_new_items(
        &self,
        source: &Source,
        since: Option<&Watermark>,
    ) -> Result<AdapterOutput, FetchFailure> {
        let (owner, name) = parse_repo_slug(&source.identifier)
            .ok_or_else(|| FetchFailure::permanent(format!("'{}' is not owner/repo", source.identifier)))?;
        let repo = format!("{owner}/{name}");
        let cursor = since
            .and_then(Watermark::repo_cursor)
            .cloned()
            .unwrap_or_default();

        let mut items = self.commits(&repo, &cursor).await?;
        items.extend(self.numbered(&repo, "pulls", cursor.pull_number).await?);
        items.extend(self.numbered(&repo, "issues", cursor.issue_number).await?);

        // oldest first across the three streams; stable for equal timestamps
        items.sort_by_key(|i| i.payload.published_at);
        debug!(repo = %repo, items = items.len(), "repository poll");
        Ok(AdapterOutput::items(items))
    }

    fn name(&self) -> &'static str {
        "github"
    }
}
