//! LLM backends and call policy.
//!
//! Backends are a closed set, one type per wire dialect:
//!
//! - [`LocalClient`](local::LocalClient): a locally hosted completions server
//!   (llama.cpp and friends)
//! - [`RemoteClient`](remote::RemoteClient): an OpenAI-compatible
//!   chat-completions endpoint
//!
//! Both expose the same [`ChatProvider`] operation and share one retry
//! policy: timeouts get a single retry with jittered backoff, server errors
//! and malformed responses up to three retries with capped exponential
//! backoff and full jitter, client errors fail immediately. The
//! [`ProviderRouter`](router::ProviderRouter) dispatches by configured mode
//! and enforces the global concurrency budget.

pub mod local;
pub mod remote;
pub mod router;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use rand::Rng;
use thiserror::Error;
use tracing::warn;

pub use local::LocalClient;
pub use remote::RemoteClient;
pub use router::ProviderRouter;

/// Sampling knobs for one generation call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Uniform generate operation over all LLM backends.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send `prompt` and return the model's text. Retries are handled inside
    /// the implementation; an error here is final for this call.
    async fn generate(&self, prompt: &str, params: &GenerationParams)
        -> Result<String, LlmError>;

    /// Backend tag used in logs and error messages.
    fn name(&self) -> &'static str;
}

/// LLM call failures after the retry policy is exhausted.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("{provider}: call timed out after {after_secs}s (retried once)")]
    #[diagnostic(code(topicseam::llm::timeout))]
    Timeout {
        provider: &'static str,
        after_secs: u64,
    },

    #[error("{provider}: request rejected ({status}): {message}")]
    #[diagnostic(
        code(topicseam::llm::bad_request),
        help("4xx responses are not retried; check the request payload and model name.")
    )]
    BadRequest {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider}: authentication failed ({status})")]
    #[diagnostic(
        code(topicseam::llm::auth),
        help("Check the API key environment variable named in llm.remote.api_key_env.")
    )]
    AuthFailed {
        provider: &'static str,
        status: u16,
    },

    #[error("{provider}: server error: {message}")]
    #[diagnostic(code(topicseam::llm::server))]
    ServerError {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: malformed response: {message}")]
    #[diagnostic(code(topicseam::llm::malformed))]
    Malformed {
        provider: &'static str,
        message: String,
    },
}

impl LlmError {
    /// Server errors and malformed bodies are transient; everything else is
    /// final on first sight.
    pub fn is_retriable(&self) -> bool {
        matches!(self, LlmError::ServerError { .. } | LlmError::Malformed { .. })
    }
}

const TIMEOUT_RETRIES: u32 = 1;
const SERVER_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(4);

/// Run `attempt` under the shared retry policy. Each attempt is wrapped in
/// `timeout`; the permit-holding caller keeps its permit across retries, so
/// the concurrency budget counts a logical call, not its attempts.
pub(crate) async fn with_retries<F, Fut>(
    provider: &'static str,
    timeout: Duration,
    mut attempt: F,
) -> Result<String, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, LlmError>>,
{
    let mut timeouts = 0u32;
    let mut transient = 0u32;
    loop {
        match tokio::time::timeout(timeout, attempt()).await {
            Err(_) => {
                if timeouts >= TIMEOUT_RETRIES {
                    return Err(LlmError::Timeout {
                        provider,
                        after_secs: timeout.as_secs(),
                    });
                }
                timeouts += 1;
                let pause = timeout_jitter();
                warn!(provider, ?pause, "LLM call timed out; retrying");
                tokio::time::sleep(pause).await;
            }
            Ok(Err(e)) if e.is_retriable() => {
                if transient >= SERVER_RETRIES {
                    return Err(e);
                }
                let pause = full_jitter(transient);
                transient += 1;
                warn!(provider, error = %e, ?pause, "transient LLM failure; retrying");
                tokio::time::sleep(pause).await;
            }
            Ok(done) => return done,
        }
    }
}

/// Uniform in [0.5s, 2s].
fn timeout_jitter() -> Duration {
    let millis = rand::thread_rng().gen_range(500..=2000);
    Duration::from_millis(millis)
}

/// Full jitter over an exponential schedule: U(0, min(cap, base * 2^n)).
fn full_jitter(retry: u32) -> Duration {
    let ceiling = BACKOFF_BASE
        .saturating_mul(1 << retry.min(8))
        .min(BACKOFF_CAP);
    let millis = rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Map a transport-level failure onto the retriable taxonomy.
pub(crate) fn transport_error(provider: &'static str, e: reqwest::Error) -> LlmError {
    LlmError::ServerError {
        provider,
        message: e.to_string(),
    }
}

/// Map a non-success HTTP status.
pub(crate) fn status_error(provider: &'static str, status: u16, body: String) -> LlmError {
    match status {
        401 | 403 => LlmError::AuthFailed { provider, status },
        400..=499 => LlmError::BadRequest {
            provider,
            status,
            message: body,
        },
        _ => LlmError::ServerError {
            provider,
            message: format!("HTTP {status}: {body}"),
        },
    }
}
