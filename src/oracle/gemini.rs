// src/oracle/gemini.rs
//! Gemini `generateContent` with the `google_search` grounding tool.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Oracle, OracleReply};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiOracle {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiOracle {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("competitor-radar/0.1")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(180))
            .build()
            .context("building gemini http client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Point at another endpoint root (proxies, tests).
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into();
        self
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}
#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}
#[derive(Serialize)]
struct GoogleSearch {}
#[derive(Serialize)]
struct Tool {
    google_search: GoogleSearch,
}
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenConfig {
    temperature: f32,
}
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Req<'a> {
    contents: Vec<Content<'a>>,
    tools: Vec<Tool>,
    generation_config: GenConfig,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Resp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<RespContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}
#[derive(Deserialize, Default)]
struct RespContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}
#[derive(Deserialize, Default)]
struct RespPart {
    #[serde(default)]
    text: Option<String>,
}
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}
#[derive(Deserialize, Default)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}
#[derive(Deserialize, Default)]
struct WebChunk {
    #[serde(default)]
    uri: Option<String>,
}

fn reply_from(resp: Resp) -> OracleReply {
    let Some(first) = resp.candidates.into_iter().next() else {
        return OracleReply::default();
    };
    let text = first
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    let grounding_urls = first
        .grounding_metadata
        .map(|g| {
            g.grounding_chunks
                .into_iter()
                .filter_map(|c| c.web.and_then(|w| w.uri))
                .collect()
        })
        .unwrap_or_default();
    OracleReply {
        text,
        grounding_urls,
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    async fn generate(&self, prompt: &str) -> Result<OracleReply> {
        if self.api_key.is_empty() {
            bail!("gemini api key is empty");
        }
        let req = Req {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            tools: vec![Tool {
                google_search: GoogleSearch {},
            }],
            generation_config: GenConfig { temperature: 0.2 },
        };
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&req)
            .send()
            .await
            .context("gemini request")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            bail!("gemini HTTP {status}: {snippet}");
        }
        let body: Resp = resp.json().await.context("gemini response json")?;
        Ok(reply_from(body))
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
