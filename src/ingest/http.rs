// src/ingest/http.rs
//! Generic fetch capability. Adapters and discovery strategies only see this trait.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::errors::FetchFailure;

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; intelstream/0.1; +https://github.com/intelstream)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into the matching [`FetchFailure`].
    pub fn into_success(self) -> Result<Self, FetchFailure> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchFailure::from_status(self.status, &self.url))
        }
    }

    pub fn content_type_contains(&self, needle: &str) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains(needle))
    }
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Transport errors surface as `Err`; any HTTP status is an `Ok` response.
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, FetchFailure>;
}

/// GET `url` and return the body of a 2xx response.
pub async fn get_text(http: &dyn HttpFetch, url: &str) -> Result<String, FetchFailure> {
    Ok(http.send(HttpRequest::get(url)).await?.into_success()?.body)
}

/// reqwest-backed fetcher used in production.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, FetchFailure> {
        let mut builder = match req.method {
            Method::Get => self.client.get(&req.url),
            Method::Head => self.client.head(&req.url),
        };
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(t) = req.timeout {
            builder = builder.timeout(t);
        }

        let resp = builder.send().await.map_err(|e| {
            tracing::debug!(error = %e, url = %req.url, "http request failed");
            classify_transport(&e, &req.url)
        })?;

        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = if req.method == Method::Head {
            String::new()
        } else {
            resp.text()
                .await
                .map_err(|e| FetchFailure::transient(format!("reading body of {url}: {e}")))?
        };
        Ok(HttpResponse {
            status,
            url,
            content_type,
            body,
        })
    }
}

fn classify_transport(e: &reqwest::Error, url: &str) -> FetchFailure {
    if e.is_builder() {
        FetchFailure::permanent(format!("invalid request for {url}: {e}"))
    } else if e.is_timeout() {
        FetchFailure::transient(format!("timeout fetching {url}"))
    } else {
        FetchFailure::transient(format!("network error fetching {url}: {e}"))
    }
}
