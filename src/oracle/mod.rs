// src/oracle/mod.rs
//! Oracle adapter: the generative provider seen as `(prompt) -> untrusted text`.
//!
//! Nothing here interprets the reply. Every caller passes `OracleReply::text`
//! through `schema` regardless of which prompt produced it.

pub mod gemini;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use metrics::counter;

pub use gemini::GeminiOracle;

/// Raw reply plus the URLs the provider reports having visited (may be empty).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleReply {
    pub text: String,
    pub grounding_urls: Vec<String>,
}

impl OracleReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            grounding_urls: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<OracleReply>;
    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type DynOracle = Arc<dyn Oracle>;

/// Call the oracle with logging + metrics. Raw prompts are never logged.
pub async fn ask(oracle: &dyn Oracle, stage: &'static str, prompt: &str) -> Result<OracleReply> {
    let id = prompt_digest(prompt);
    counter!("radar_oracle_calls_total", "stage" => stage).increment(1);
    tracing::debug!(target: "oracle", provider = oracle.name(), stage, %id, "oracle call");
    match oracle.generate(prompt).await {
        Ok(reply) => {
            tracing::debug!(
                target: "oracle",
                stage,
                %id,
                chars = reply.text.len(),
                grounding = reply.grounding_urls.len(),
                "oracle reply"
            );
            Ok(reply)
        }
        Err(e) => {
            tracing::warn!(target: "oracle", stage, %id, error = %e, "oracle call failed");
            Err(e)
        }
    }
}

/// Short anonymized id of a prompt (first 6 bytes of sha256, hex).
pub fn prompt_digest(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Replays queued replies in order and records every prompt it saw.
/// An exhausted queue answers with an error.
#[derive(Clone, Default)]
pub struct ScriptedOracle {
    replies: Arc<Mutex<VecDeque<Result<OracleReply, String>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.lock_replies().push_back(Ok(OracleReply::text(text)));
        self
    }

    pub fn push_reply(&self, reply: OracleReply) -> &Self {
        self.lock_replies().push_back(Ok(reply));
        self
    }

    pub fn push_error(&self, msg: impl Into<String>) -> &Self {
        self.lock_replies().push_back(Err(msg.into()));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<OracleReply, String>>> {
        // A poisoned queue only happens after a panicking test; keep going.
        self.replies.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate(&self, prompt: &str) -> Result<OracleReply> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(prompt.to_string());
        }
        match self.lock_replies().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(msg)) => Err(anyhow!(msg)),
            None => Err(anyhow!("scripted oracle exhausted")),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_oracle_replays_in_order() {
        let o = ScriptedOracle::new();
        o.push_text("one").push_error("boom").push_text("two");
        assert_eq!(o.generate("a").await.unwrap().text, "one");
        assert!(o.generate("b").await.is_err());
        assert_eq!(o.generate("c").await.unwrap().text, "two");
        assert!(o.generate("d").await.is_err());
        assert_eq!(o.prompts(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn digest_is_short_and_stable() {
        let a = prompt_digest("hello");
        assert_eq!(a.len(), 12);
        assert_eq!(a, prompt_digest("hello"));
        assert_ne!(a, prompt_digest("hello!"));
    }
}
