//! Client for an OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RemoteLlmConfig;

use super::{status_error, transport_error, with_retries, ChatProvider, GenerationParams, LlmError};

const PROVIDER: &str = "remote";

pub struct RemoteClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    http: reqwest::Client,
    timeout: Duration,
}

impl RemoteClient {
    /// The bearer token is read from the environment variable named in
    /// `cfg.api_key_env`. A missing variable sends unauthenticated requests;
    /// the server's 401/403 then surfaces as [`LlmError::AuthFailed`].
    pub fn new(cfg: &RemoteLlmConfig, timeout: Duration) -> Result<Self, LlmError> {
        let api_key = std::env::var(&cfg.api_key_env).ok();
        if api_key.is_none() {
            debug!(var = %cfg.api_key_env, "API key variable unset; sending without auth");
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| transport_error(PROVIDER, e))?;
        Ok(Self {
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key,
            http,
            timeout,
        })
    }

    async fn attempt(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };
        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.trim());
        }
        let resp = request
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, status.as_u16(), text));
        }
        let parsed: ChatResponse = resp.json().await.map_err(|e| LlmError::Malformed {
            provider: PROVIDER,
            message: e.to_string(),
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Malformed {
                provider: PROVIDER,
                message: "response carried no choices".into(),
            })
    }
}

#[async_trait]
impl ChatProvider for RemoteClient {
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
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_wire_format() {
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: "判定してください",
            }],
            temperature: 0.5,
            max_tokens: 8,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["temperature"], 0.5);
        assert_eq!(json["max_tokens"], 8);
    }

    #[test]
    fn response_content_is_extracted() {
        let raw = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"YES"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "YES");
    }
}
