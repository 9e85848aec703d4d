//! Sentence embedding: lazy sentence stream in, lazy vector stream out.
//!
//! The encoder model is loaded once and owned by the pump for its lifetime.
//! Batching is internal and order-preserving: the vector at position *i*
//! always belongs to the sentence at position *i*. Encoding runs on a
//! dedicated blocking thread; results cross into the async pipeline through a
//! bounded channel supplied by the caller.

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{ChunkerError, Embedding, Sentence};

/// Fatal embedding failures. A batch is retried once with the batch halved;
/// the second failure surfaces here and aborts the stream.
#[derive(Debug, Error, Diagnostic)]
pub enum EmbeddingError {
    #[error("failed to load embedding model: {message}")]
    #[diagnostic(
        code(topicseam::embedding::model_load),
        help("The model is fetched on first use; check network access and disk space.")
    )]
    ModelLoad { message: String },

    #[error("batch encode failed after retry: {message}")]
    #[diagnostic(code(topicseam::embedding::encode))]
    Encode { message: String },

    #[error("encoder returned {got} vectors for {expected} inputs")]
    #[diagnostic(code(topicseam::embedding::shape))]
    ShapeMismatch { expected: usize, got: usize },
}

/// Batch text encoder. The pipeline is generic over this seam so tests can
/// substitute a deterministic encoder.
pub trait TextEncoder: Send {
    /// Encode one micro-batch. Must return exactly one vector per input, in
    /// input order. Same text, same vector.
    fn encode(&mut self, batch: &[String]) -> Result<Vec<Embedding>, EmbeddingError>;

    /// Drop accelerator scratch memory. Called every `release_interval`
    /// batches to bound peak RSS; a no-op by default.
    fn release_scratch(&mut self) {}
}

/// [`TextEncoder`] backed by a fastembed ONNX model (384-dim MiniLM).
pub struct FastembedEncoder {
    model: fastembed::TextEmbedding,
}

impl FastembedEncoder {
    /// Load the model once. Only `cpu` execution is available through the
    /// ONNX runtime here; other device tags are accepted and logged.
    pub fn new(device: &str) -> Result<Self, EmbeddingError> {
        if device != "cpu" {
            warn!(device, "embedding backend runs on cpu; device tag ignored");
        }
        let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false);
        let model = fastembed::TextEmbedding::try_new(options).map_err(|e| {
            EmbeddingError::ModelLoad {
                message: e.to_string(),
            }
        })?;
        Ok(Self { model })
    }
}

impl TextEncoder for FastembedEncoder {
    fn encode(&mut self, batch: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let texts: Vec<&str> = batch.iter().map(String::as_str).collect();
        let mut vectors = self
            .model
            .embed(texts, None)
            .map_err(|e| EmbeddingError::Encode {
                message: e.to_string(),
            })?;
        for v in &mut vectors {
            l2_normalize(v);
        }
        Ok(vectors)
    }
}

/// Normalize in place; zero vectors are left untouched.
pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Drives an encoder over a sentence iterator, pairing each sentence with its
/// vector and pushing the pairs into `tx`.
///
/// Blocking by design; run it under `tokio::task::spawn_blocking`. When the
/// receiving half of `tx` is dropped (pipeline cancelled or failed), the pump
/// stops at the next send.
pub struct EncodePump<E> {
    encoder: E,
    batch_size: usize,
    release_interval: usize,
}

impl<E: TextEncoder> EncodePump<E> {
    pub fn new(encoder: E, batch_size: usize, release_interval: usize) -> Self {
        Self {
            encoder,
            batch_size: batch_size.max(1),
            release_interval: release_interval.max(1),
        }
    }

    /// Consume `sentences` to exhaustion or first fatal error.
    pub fn run<I>(
        mut self,
        sentences: I,
        tx: flume::Sender<Result<(Sentence, Embedding), ChunkerError>>,
    ) where
        I: Iterator<Item = Result<Sentence, ChunkerError>>,
    {
        let mut batch: Vec<Sentence> = Vec::with_capacity(self.batch_size);
        let mut batches_done = 0usize;

        for item in sentences {
            match item {
                Ok(sentence) => batch.push(sentence),
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            }
            if batch.len() == self.batch_size
                && !self.flush(&mut batch, &tx, &mut batches_done)
            {
                return;
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch, &tx, &mut batches_done);
        }
    }

    /// Returns false when the stream should stop (fatal error or receiver gone).
    fn flush(
        &mut self,
        batch: &mut Vec<Sentence>,
        tx: &flume::Sender<Result<(Sentence, Embedding), ChunkerError>>,
        batches_done: &mut usize,
    ) -> bool {
        let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
        let vectors = match self.encode_with_retry(&texts) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.send(Err(e.into()));
                return false;
            }
        };
        for (sentence, vector) in batch.drain(..).zip(vectors) {
            if tx.send(Ok((sentence, vector))).is_err() {
                debug!("embedding receiver dropped; stopping encode pump");
                return false;
            }
        }
        *batches_done += 1;
        if *batches_done % self.release_interval == 0 {
            self.encoder.release_scratch();
            debug!(batches = *batches_done, "released encoder scratch memory");
        }
        true
    }

    fn encode_with_retry(&mut self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        match self.checked_encode(texts) {
            Ok(v) => Ok(v),
            Err(first) => {
                warn!(batch = texts.len(), error = %first, "encode failed; retrying halved");
                if texts.len() <= 1 {
                    return self.checked_encode(texts);
                }
                let mid = texts.len() / 2;
                let mut vectors = self.checked_encode(&texts[..mid])?;
                vectors.extend(self.checked_encode(&texts[mid..])?);
                Ok(vectors)
            }
        }
    }

    fn checked_encode(&mut self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let vectors = self.encoder.encode(texts)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::ShapeMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }
}
