//! Client for a locally hosted completions server.
//!
//! Servers in the llama.cpp family take a completions-style body and answer
//! either classic `choices[0].text` or chat-shaped `choices[0].message.content`
//! depending on build and route; both shapes are accepted here.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LocalLlmConfig;

use super::{status_error, transport_error, with_retries, ChatProvider, GenerationParams, LlmError};

const PROVIDER: &str = "local";

pub struct LocalClient {
    server_url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl LocalClient {
    pub fn new(cfg: &LocalLlmConfig, timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| transport_error(PROVIDER, e))?;
        Ok(Self {
            server_url: cfg.server_url.clone(),
            http,
            timeout,
        })
    }

    async fn attempt(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let body = CompletionRequest {
            prompt,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };
        let resp = self
            .http
            .post(&self.server_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, status.as_u16(), text));
        }
        let parsed: CompletionResponse = resp.json().await.map_err(|e| LlmError::Malformed {
            provider: PROVIDER,
            message: e.to_string(),
        })?;
        parsed.into_text().ok_or_else(|| LlmError::Malformed {
            provider: PROVIDER,
            message: "response carried no choices".into(),
        })
    }
}

#[async_trait]
impl ChatProvider for LocalClient {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, LlmError> {
        with_retries(PROVIDER, self.timeout, || self.attempt(prompt, params)).await
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl CompletionResponse {
    fn into_text(self) -> Option<String> {
        self.choices.into_iter().next().and_then(|choice| {
            choice
                .text
                .or_else(|| choice.message.map(|m| m.content))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_completions_shape() {
        let raw = r#"{"choices":[{"text":"YES"}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("YES"));
    }

    #[test]
    fn accepts_chat_shape() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"NO"}}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("NO"));
    }

    #[test]
    fn empty_choices_is_malformed() {
        let raw = r#"{"choices":[]}"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.into_text().is_none());
    }
}
