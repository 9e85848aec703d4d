//! Configuration loading and validation.
//!
//! The whole pipeline is configured from a single YAML file. Every component
//! constructor receives an immutable borrow of the loaded [`Config`]; there is
//! no process-wide configuration state.
//!
//! ## Example
//!
//! ```yaml
//! runtime:
//!   device: cpu
//!   batch_size: 32
//!   llm_concurrency: 2
//! llm:
//!   provider: local
//!   local:
//!     server_url: "http://127.0.0.1:8000/v1/completions"
//!     model_path: "models/qwen2.5-3b-q4.gguf"
//! builder:
//!   min_chars: 200
//!   max_chars: 1200
//! ```

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration. Always fatal;
/// surfaced before the pipeline starts.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    #[diagnostic(code(topicseam::config::read))]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse YAML config: {source}")]
    #[diagnostic(code(topicseam::config::parse))]
    Parse {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(topicseam::config::invalid),
        help("Check the config file against the documented keys and ranges.")
    )]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            message: message.into(),
        }
    }
}

/// Embedder and scheduling knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Accelerator tag for the embedder: `cpu`, `mps`, or `cuda`.
    pub device: String,
    /// Embedder micro-batch size.
    pub batch_size: usize,
    /// Capacity of the LLM call semaphore.
    pub llm_concurrency: usize,
    /// Encoder scratch buffers are released every this many batches.
    pub release_interval: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
            batch_size: 32,
            llm_concurrency: 2,
            release_interval: 16,
        }
    }
}

/// Which backend LLM calls are dispatched to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Local,
    Remote,
    /// Dispatches locally; the router warns (never switches) when the rolling
    /// boundary-F1 estimate degrades past `failover.f1_drop_threshold`.
    Auto,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalLlmConfig {
    /// Full URL of the local completions endpoint.
    pub server_url: String,
    /// Informational; the server may ignore it.
    #[serde(default)]
    pub model_path: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteLlmConfig {
    /// OpenAI-compatible chat-completions URL.
    pub endpoint: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub provider: ProviderMode,
    pub local: Option<LocalLlmConfig>,
    pub remote: Option<RemoteLlmConfig>,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderMode::Local,
            local: None,
            remote: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FailoverConfig {
    /// Absolute F1 drop (vs. the best rolling estimate) that triggers an
    /// operator warning in `auto` mode.
    pub f1_drop_threshold: f64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            f1_drop_threshold: 0.03,
        }
    }
}

/// Boundary-detector thresholds, one field per cascade knob.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Stage A: similarity at or above this is a hard continuation.
    pub theta_high: f32,
    /// Stage A: similarity at or below this is a hard boundary.
    pub theta_low: f32,
    /// Stage B: sliding window length over trailing similarities.
    pub window: usize,
    /// Stage B: robust z-score at or above this marks a likely boundary.
    pub tau: f32,
    /// Stage C: independent votes per ambiguous adjacency.
    pub n_vote: usize,
    /// Stage C sampling temperature. Zero makes votes deterministic.
    pub temperature: f32,
    /// Stage C response budget in tokens.
    pub max_tokens: u32,
    /// Stage D: Jaccard overlap of entity sets at or above this demotes a
    /// positive boundary.
    pub ner_jaccard_threshold: f32,
    /// Stage D: connective tokens that open a continuation sentence.
    pub connectives: Vec<String>,
    /// Stage D: a connective-opened sentence shorter than this is demoted.
    pub connective_max_chars: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            theta_high: 0.85,
            theta_low: 0.55,
            window: 5,
            tau: 3.5,
            n_vote: 3,
            temperature: 0.7,
            max_tokens: 8,
            ner_jaccard_threshold: 0.8,
            connectives: [
                "しかし", "また", "そして", "さらに", "ただし", "なお", "However", "Also",
                "Moreover", "But",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            connective_max_chars: 20,
        }
    }
}

/// Pre-processor toggles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentStructureConfig {
    /// Recognize markdown headings, lists, fences, and tables.
    pub detect_markdown: bool,
    /// Treat `<h1>`–`<h6>`, `<li>`, `<pre>` markers analogously.
    pub detect_html: bool,
    /// Compute `indent_level` from leading whitespace.
    pub detect_indentation: bool,
    /// Lowest heading level recognized as a header.
    pub min_header_level: u8,
    /// Highest heading level recognized as a header.
    pub max_header_level: u8,
    /// Indent delta (in units) at or beyond which a boundary is forced and a
    /// list item counts as nested under the prior one.
    pub list_indent_threshold: u8,
    /// Spaces per indent unit.
    pub tab_width: usize,
}

impl Default for DocumentStructureConfig {
    fn default() -> Self {
        Self {
            detect_markdown: true,
            detect_html: false,
            detect_indentation: true,
            min_header_level: 1,
            max_header_level: 6,
            list_indent_threshold: 2,
            tab_width: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderConfig {
    /// A chunk is sealed at a boundary only once it holds at least this many
    /// characters.
    pub min_chars: usize,
    /// Hard upper bound on chunk characters, except for a single indivisible
    /// oversized sentence.
    pub max_chars: usize,
    /// Optional secondary guard on approximate token count.
    pub max_tokens: Option<usize>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            min_chars: 200,
            max_chars: 1200,
            max_tokens: None,
        }
    }
}

/// Root configuration. All sections have usable defaults; an empty YAML file
/// (or no `--conf` at all) yields a local-provider CPU pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub llm: LlmConfig,
    pub failover: FailoverConfig,
    pub detector: DetectorConfig,
    pub document_structure: DocumentStructureConfig,
    pub builder: BuilderConfig,
}

impl Config {
    /// Load and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Config = serde_yaml::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check cross-field invariants the serde layer cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.batch_size == 0 {
            return Err(ConfigError::invalid("runtime.batch_size must be positive"));
        }
        if self.runtime.llm_concurrency == 0 {
            return Err(ConfigError::invalid(
                "runtime.llm_concurrency must be positive",
            ));
        }
        if !matches!(self.runtime.device.as_str(), "cpu" | "mps" | "cuda") {
            return Err(ConfigError::invalid(format!(
                "runtime.device must be cpu, mps, or cuda (got {:?})",
                self.runtime.device
            )));
        }
        if self.detector.theta_low >= self.detector.theta_high {
            return Err(ConfigError::invalid(
                "detector.theta_low must be below detector.theta_high",
            ));
        }
        if self.detector.window == 0 {
            return Err(ConfigError::invalid("detector.window must be positive"));
        }
        if self.detector.n_vote == 0 {
            return Err(ConfigError::invalid("detector.n_vote must be positive"));
        }
        if self.builder.min_chars > self.builder.max_chars {
            return Err(ConfigError::invalid(
                "builder.min_chars must not exceed builder.max_chars",
            ));
        }
        let ds = &self.document_structure;
        if ds.min_header_level == 0 || ds.max_header_level > 6 {
            return Err(ConfigError::invalid(
                "document_structure header levels must be within 1..=6",
            ));
        }
        if ds.min_header_level > ds.max_header_level {
            return Err(ConfigError::invalid(
                "document_structure.min_header_level must not exceed max_header_level",
            ));
        }
        match self.llm.provider {
            ProviderMode::Local | ProviderMode::Auto => {
                if self.llm.local.is_none() {
                    return Err(ConfigError::invalid(
                        "llm.provider is local/auto but llm.local is missing",
                    ));
                }
            }
            ProviderMode::Remote => {
                if self.llm.remote.is_none() {
                    return Err(ConfigError::invalid(
                        "llm.provider is remote but llm.remote is missing",
                    ));
                }
            }
        }
        Ok(())
    }
}
