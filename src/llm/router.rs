//! Mode-based dispatch over LLM backends under a shared concurrency budget.
//!
//! The router owns the counted semaphore; every call through
//! [`ProviderRouter::generate`] holds one permit for its entire duration,
//! retries included. In `auto` mode dispatch stays local and the router only
//! *warns* when the rolling boundary-F1 estimate degrades past the configured
//! threshold; switching backends is an operator decision, never implicit.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::{Config, ProviderMode};
use crate::types::ChunkerError;

use super::{ChatProvider, GenerationParams, LlmError, LocalClient, RemoteClient};

/// Closed set of dispatch targets. `Custom` exists for callers that inject
/// their own [`ChatProvider`] (tests, alternative deployments); it still runs
/// under the router's semaphore.
enum Backend {
    Local(LocalClient),
    Remote(RemoteClient),
    Custom(Arc<dyn ChatProvider>),
}

impl Backend {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, LlmError> {
        match self {
            Backend::Local(client) => client.generate(prompt, params).await,
            Backend::Remote(client) => client.generate(prompt, params).await,
            Backend::Custom(provider) => provider.generate(prompt, params).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Backend::Local(_) => "local",
            Backend::Remote(_) => "remote",
            Backend::Custom(provider) => provider.name(),
        }
    }
}

pub struct ProviderRouter {
    mode: ProviderMode,
    backend: Backend,
    permits: Arc<Semaphore>,
    concurrency: usize,
    f1_drop_threshold: f64,
    best_f1: Mutex<Option<f64>>,
}

impl ProviderRouter {
    /// Build the backend the configured mode needs. `Config::validate` has
    /// already checked section presence.
    pub fn from_config(cfg: &Config) -> Result<Self, ChunkerError> {
        let timeout = Duration::from_secs(cfg.llm.timeout_secs);
        let backend = match cfg.llm.provider {
            ProviderMode::Remote => {
                let remote = cfg.llm.remote.as_ref().ok_or_else(|| {
                    crate::config::ConfigError::invalid("llm.remote section missing")
                })?;
                Backend::Remote(RemoteClient::new(remote, timeout)?)
            }
            ProviderMode::Local | ProviderMode::Auto => {
                let local = cfg.llm.local.as_ref().ok_or_else(|| {
                    crate::config::ConfigError::invalid("llm.local section missing")
                })?;
                Backend::Local(LocalClient::new(local, timeout)?)
            }
        };
        info!(
            mode = ?cfg.llm.provider,
            backend = backend.name(),
            concurrency = cfg.runtime.llm_concurrency,
            "provider router ready"
        );
        Ok(Self {
            mode: cfg.llm.provider,
            backend,
            permits: Arc::new(Semaphore::new(cfg.runtime.llm_concurrency)),
            concurrency: cfg.runtime.llm_concurrency,
            f1_drop_threshold: cfg.failover.f1_drop_threshold,
            best_f1: Mutex::new(None),
        })
    }

    /// Route every call to `provider`, still bounded by a fresh semaphore of
    /// `concurrency` permits.
    pub fn with_provider(provider: Arc<dyn ChatProvider>, concurrency: usize) -> Self {
        Self {
            mode: ProviderMode::Local,
            backend: Backend::Custom(provider),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            concurrency: concurrency.max(1),
            f1_drop_threshold: 0.03,
            best_f1: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> ProviderMode {
        self.mode
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Permits not currently held by in-flight calls. Test hook.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Feed a fresh rolling boundary-F1 estimate. Returns true when the
    /// degradation warning fired. Warn-only: dispatch is never changed.
    pub fn observe_f1(&self, f1: f64) -> bool {
        let mut best = self
            .best_f1
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let fired = match *best {
            Some(peak) if peak - f1 >= self.f1_drop_threshold => {
                warn!(
                    peak,
                    current = f1,
                    threshold = self.f1_drop_threshold,
                    "boundary F1 dropped past failover threshold; consider llm.provider = remote"
                );
                true
            }
            _ => false,
        };
        if best.map_or(true, |peak| f1 > peak) {
            *best = Some(f1);
        }
        fired
    }
}

#[async_trait]
impl ChatProvider for ProviderRouter {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, LlmError> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LlmError::ServerError {
                provider: self.backend.name(),
                message: "concurrency semaphore closed".into(),
            })?;
        self.backend.generate(prompt, params).await
    }

    fn name(&self) -> &'static str {
        self.backend.name()
    }
}
