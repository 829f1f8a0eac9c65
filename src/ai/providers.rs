// src/ai/providers.rs
//! Low-level chat providers. Each does one remote completion call; prompt building
//! and output parsing live in [`super::summarizer`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::SummarizeError;

pub trait LlmProvider: Send + Sync + 'static {
    fn complete<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
        max_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String, SummarizeError>> + Send + 'a>>;
    fn name(&self) -> &'static str;
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent("intelstream/0.1")
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()?)
}

fn map_transport(e: reqwest::Error) -> SummarizeError {
    if e.is_timeout() {
        SummarizeError::Timeout
    } else {
        SummarizeError::Provider(e.to_string())
    }
}

fn map_status(status: reqwest::StatusCode, body: &str) -> SummarizeError {
    let snippet: String = body.chars().take(200).collect();
    match status.as_u16() {
        429 => SummarizeError::Quota(snippet),
        408 | 504 => SummarizeError::Timeout,
        s => SummarizeError::Provider(format!("HTTP {s}: {snippet}")),
    }
}

/// Anthropic Messages API.
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            model,
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
        })
    }
}

impl LlmProvider for AnthropicProvider {
    fn complete<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
        max_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String, SummarizeError>> + Send + 'a>> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                max_tokens: u32,
                system: &'a str,
                messages: Vec<Msg<'a>>,
            }
            #[derive(Deserialize)]
            struct Resp {
                content: Vec<Block>,
            }
            #[derive(Deserialize)]
            struct Block {
                #[serde(rename = "type")]
                kind: String,
                #[serde(default)]
                text: String,
            }

            let req = Req {
                model: &self.model,
                max_tokens,
                system,
                messages: vec![Msg {
                    role: "user",
                    content: user,
                }],
            };
            let resp = self
                .http
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&req)
                .send()
                .await
                .map_err(map_transport)?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(map_status(status, &body));
            }
            let body: Resp = resp
                .json()
                .await
                .map_err(|e| SummarizeError::BadOutput(e.to_string()))?;
            let text = body
                .content
                .into_iter()
                .filter(|b| b.kind == "text")
                .map(|b| b.text)
                .collect::<Vec<_>>()
                .join("\n");
            Ok(text)
        })
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

/// OpenAI Chat Completions API.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            model,
        })
    }
}

impl LlmProvider for OpenAiProvider {
    fn complete<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
        max_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String, SummarizeError>> + Send + 'a>> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: String,
            }

            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: system,
                    },
                    Msg {
                        role: "user",
                        content: user,
                    },
                ],
                temperature: 0.2,
                max_tokens,
            };

            let resp = self
                .http
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await
                .map_err(map_transport)?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(map_status(status, &body));
            }
            let body: Resp = resp
                .json()
                .await
                .map_err(|e| SummarizeError::BadOutput(e.to_string()))?;
            Ok(body
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .unwrap_or_default())
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
