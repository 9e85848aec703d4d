//! End-to-end wiring: file → sentences → embeddings → boundaries → chunks →
//! JSONL.
//!
//! The stream is demand-driven from the writer side. Encoding runs on a
//! blocking thread and feeds a bounded channel (64 items) so disk and
//! accelerator work overlap without unbounded buffering; dropping the pipeline
//! future closes the channel and stops the encode thread at its next send.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, instrument};

use crate::builder::ChunkBuilder;
use crate::config::Config;
use crate::detector::{BoundaryDetector, EntityRecognizer, LexicalRecognizer};
use crate::embedding::{EncodePump, FastembedEncoder, TextEncoder};
use crate::llm::{ChatProvider, ProviderRouter};
use crate::preprocess::SentencePreprocessor;
use crate::types::ChunkerError;
use crate::writer::JsonlWriter;

/// Bounded queue depth between the encode thread and the detector.
const QUEUE_DEPTH: usize = 64;

/// A pipeline failure annotated with how far processing got.
#[derive(Debug, Error, Diagnostic)]
#[error("{source} (last processed line {last_line})")]
pub struct PipelineError {
    pub last_line: u32,
    #[source]
    #[diagnostic_source]
    pub source: ChunkerError,
}

#[derive(Clone, Debug)]
pub struct PipelineReport {
    pub sentences: usize,
    pub chunks: usize,
    pub output: PathBuf,
}

/// Run the full pipeline with production backends: fastembed encoder,
/// config-selected LLM provider, lexical entity recognizer.
pub async fn run_file(
    cfg: &Config,
    input: &Path,
    output: Option<&Path>,
) -> Result<PipelineReport, PipelineError> {
    let at_start = |source: ChunkerError| PipelineError {
        last_line: 0,
        source,
    };
    let encoder = FastembedEncoder::new(&cfg.runtime.device).map_err(|e| at_start(e.into()))?;
    let router = Arc::new(ProviderRouter::from_config(cfg).map_err(at_start)?);
    let ner: Arc<dyn EntityRecognizer> = Arc::new(LexicalRecognizer);
    run_with(cfg, encoder, router, Some(ner), input, output).await
}

/// Run the pipeline with injected encoder and provider. The seam every
/// integration test drives.
#[instrument(skip_all, fields(input = %input.display()))]
pub async fn run_with<E>(
    cfg: &Config,
    encoder: E,
    provider: Arc<dyn ChatProvider>,
    ner: Option<Arc<dyn EntityRecognizer>>,
    input: &Path,
    output: Option<&Path>,
) -> Result<PipelineReport, PipelineError>
where
    E: TextEncoder + 'static,
{
    let mut last_line = 0u32;
    let fail = |last_line: u32, source: ChunkerError| PipelineError { last_line, source };

    let out_path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_extension("chunks.jsonl"));

    let file = std::fs::File::open(input).map_err(|e| {
        fail(
            0,
            ChunkerError::Structural(format!("cannot read {}: {e}", input.display())),
        )
    })?;
    let reader = std::io::BufReader::new(file);
    let sentences = SentencePreprocessor::new(&cfg.document_structure).stream(reader);

    let (tx, rx) = flume::bounded(QUEUE_DEPTH);
    let pump = EncodePump::new(
        encoder,
        cfg.runtime.batch_size,
        cfg.runtime.release_interval,
    );
    let encode_task = tokio::task::spawn_blocking(move || pump.run(sentences, tx));

    let detector = BoundaryDetector::new(cfg, provider, ner);
    let decisions = detector.detect(rx.into_stream());
    futures_util::pin_mut!(decisions);

    let mut writer = JsonlWriter::create(&out_path).map_err(|e| fail(0, e.into()))?;
    let mut chunk_builder = ChunkBuilder::new(&cfg.builder);
    let mut sentence_count = 0usize;
    let mut chunk_count = 0usize;

    while let Some(decision) = decisions.next().await {
        let decided = decision.map_err(|e| fail(last_line, e))?;
        last_line = decided.sentence.line_number;
        sentence_count += 1;
        if let Some(chunk) = chunk_builder.push(decided.sentence, decided.boundary) {
            writer
                .write_chunk(&chunk)
                .map_err(|e| fail(last_line, e.into()))?;
            chunk_count += 1;
        }
    }
    if let Some(chunk) = chunk_builder.finish() {
        writer
            .write_chunk(&chunk)
            .map_err(|e| fail(last_line, e.into()))?;
        chunk_count += 1;
    }
    writer.finish().map_err(|e| fail(last_line, e.into()))?;

    // The pump ends with the sentence iterator; surface a panic if it had one.
    if let Err(join_error) = encode_task.await {
        return Err(fail(
            last_line,
            ChunkerError::Structural(format!("encode task failed: {join_error}")),
        ));
    }

    info!(
        sentences = sentence_count,
        chunks = chunk_count,
        output = %out_path.display(),
        "pipeline complete"
    );
    Ok(PipelineReport {
        sentences: sentence_count,
        chunks: chunk_count,
        output: out_path,
    })
}
