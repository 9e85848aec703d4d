//! Deterministic test doubles for the pipeline's two external seams: the
//! text encoder and the LLM provider.
//!
//! These live in the library (not `#[cfg(test)]`) so integration tests and
//! downstream consumers can drive the full pipeline without a model download
//! or a live server.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHasher};

use crate::embedding::{l2_normalize, EmbeddingError, TextEncoder};
use crate::llm::{ChatProvider, GenerationParams, LlmError};
use crate::types::{Embedding, Sentence, StructureType};

/// Deterministic 8-dimensional encoder. Vectors come from a hash of the text
/// unless an explicit vector was registered, so tests can pin exact cosine
/// similarities for chosen sentence pairs.
#[derive(Default)]
pub struct StubEncoder {
    fixed: FxHashMap<String, Embedding>,
}

impl StubEncoder {
    /// Pin the vector returned for `text`. Normalized on the way in.
    #[must_use]
    pub fn with_vector(mut self, text: impl Into<String>, mut vector: Embedding) -> Self {
        l2_normalize(&mut vector);
        self.fixed.insert(text.into(), vector);
        self
    }

    fn hash_vector(text: &str) -> Embedding {
        let mut v: Embedding = (0..8u64)
            .map(|dim| {
                let mut hasher = FxHasher::default();
                text.hash(&mut hasher);
                dim.hash(&mut hasher);
                let bits = hasher.finish();
                // Map to [-1, 1].
                (bits as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();
        l2_normalize(&mut v);
        v
    }
}

impl TextEncoder for StubEncoder {
    fn encode(&mut self, batch: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        Ok(batch
            .iter()
            .map(|text| {
                self.fixed
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| Self::hash_vector(text))
            })
            .collect())
    }
}

/// One scripted reply for [`ScriptedProvider`].
#[derive(Clone, Debug)]
pub enum ScriptedAnswer {
    Text(&'static str),
    Fail,
}

/// Provider that replays a fixed script of answers in call order and counts
/// calls. An exhausted script fails, which surfaces missing expectations.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedAnswer>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: impl IntoIterator<Item = ScriptedAnswer>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Script that answers every call with the same text.
    pub fn always(answer: &'static str, times: usize) -> Self {
        Self::new(std::iter::repeat(ScriptedAnswer::Text(answer)).take(times))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            Some(ScriptedAnswer::Text(text)) => Ok(text.to_string()),
            Some(ScriptedAnswer::Fail) | None => Err(LlmError::ServerError {
                provider: "scripted",
                message: "scripted failure".into(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Provider that tracks how many calls were in flight at once. Used to prove
/// the router's semaphore bound.
pub struct CountingProvider {
    answer: &'static str,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(answer: &'static str, delay: Duration) -> Self {
        Self {
            answer,
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for CountingProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.to_string())
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Plain sentence literal for detector and builder tests.
pub fn plain_sentence(text: &str, line_number: u32) -> Sentence {
    Sentence {
        text: text.to_string(),
        line_number,
        structure_type: StructureType::Plain,
        indent_level: 0,
        structure_info: "plain".to_string(),
    }
}

/// Structured sentence literal with explicit tags.
pub fn tagged_sentence(
    text: &str,
    line_number: u32,
    structure_type: StructureType,
    indent_level: u8,
    structure_info: &str,
) -> Sentence {
    Sentence {
        text: text.to_string(),
        line_number,
        structure_type,
        indent_level,
        structure_info: structure_info.to_string(),
    }
}
