//! Core types for the topicseam chunking pipeline.
//!
//! This module defines the data model shared by every pipeline stage:
//!
//! - [`Sentence`]: a structurally tagged sentence emitted by the pre-processor
//! - [`StructureType`]: the structural class of the region a sentence came from
//! - [`Embedding`]: a dense sentence vector, paired positionally with sentences
//! - [`Chunk`] / [`ChunkMetadata`]: the pipeline's output unit
//! - [`ChunkerError`]: the crate-level error taxonomy
//!
//! Entities are created by their producing stage and owned transiently by the
//! pipeline; nothing in this module carries shared mutable state.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;
use crate::embedding::EmbeddingError;
use crate::llm::LlmError;
use crate::writer::WriterError;

/// Dense sentence vector. Produced L2-normalized by the embedder; the vector
/// for sentence *i* corresponds to the *i*-th sentence in stream order.
pub type Embedding = Vec<f32>;

/// Structural class of the source region a sentence belongs to.
///
/// `Blank` exists only inside the pre-processor; blank lines are consumed to
/// mark paragraph boundaries and never reach the detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureType {
    Plain,
    Header,
    List,
    Code,
    Table,
    Blank,
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            StructureType::Plain => "plain",
            StructureType::Header => "header",
            StructureType::List => "list",
            StructureType::Code => "code",
            StructureType::Table => "table",
            StructureType::Blank => "blank",
        };
        f.write_str(tag)
    }
}

/// A sentence with its document-structural tags.
///
/// Invariants upheld by the pre-processor:
/// - `text` is non-empty after trimming; internal spacing is preserved
/// - `line_number` is 1-indexed and non-decreasing across the stream
/// - `structure_type` is never [`StructureType::Blank`]
///
/// `structure_info` is an enum-like annotation string (`"header:2"`,
/// `"list:unordered"`, ...). A `+paragraph_break` suffix marks the first
/// sentence after one or more blank lines. Downstream stages read it only
/// through the accessor methods below.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    pub text: String,
    pub line_number: u32,
    pub structure_type: StructureType,
    pub indent_level: u8,
    pub structure_info: String,
}

impl Sentence {
    /// Heading level parsed from a `header:N` annotation.
    pub fn header_level(&self) -> Option<u8> {
        self.annotation()
            .strip_prefix("header:")
            .and_then(|lvl| lvl.parse().ok())
    }

    /// True for `list:ordered` sentences.
    pub fn is_ordered_list(&self) -> bool {
        self.annotation() == "list:ordered"
    }

    /// True when this sentence opens a new paragraph (blank line hint).
    pub fn starts_paragraph(&self) -> bool {
        self.structure_info.ends_with("+paragraph_break")
    }

    /// The annotation with any paragraph-break suffix stripped.
    pub fn annotation(&self) -> &str {
        self.structure_info
            .strip_suffix("+paragraph_break")
            .unwrap_or(&self.structure_info)
    }

    /// Character count of the sentence body (Unicode scalar values).
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Structural summary attached to every emitted chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Heading levels present in the chunk, ascending, deduplicated.
    pub heading_levels: Vec<u8>,
    /// Whether the chunk contains at least one list sentence.
    pub spans_list: bool,
    /// First source line covered by the chunk (1-indexed).
    pub line_start: u32,
    /// Last source line covered by the chunk (1-indexed).
    pub line_end: u32,
}

/// A contiguous, topically coherent run of sentences.
///
/// `text` is the reconstructed rendering of `sentences` with structural
/// formatting restored; `char_count` is measured on `text`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub sentences: Vec<Sentence>,
    pub text: String,
    pub char_count: usize,
    pub token_count: usize,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Sentence bodies in order, as persisted in the JSONL record.
    pub fn sentence_texts(&self) -> Vec<String> {
        self.sentences.iter().map(|s| s.text.clone()).collect()
    }
}

/// Crate-level error taxonomy.
///
/// Only LLM adjudication failures and the absence of an entity recognizer
/// are recovered locally inside the detector; every variant here aborts the
/// run when it surfaces from the pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum ChunkerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    /// The pre-processor received unrepresentable input.
    #[error("structural error: {0}")]
    #[diagnostic(
        code(topicseam::structural),
        help("The input must be valid UTF-8 text.")
    )]
    Structural(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Writer(#[from] WriterError),
}

impl ChunkerError {
    /// Short kind tag used in the single-line CLI diagnostic.
    pub fn kind(&self) -> &'static str {
        match self {
            ChunkerError::Config(_) => "ConfigError",
            ChunkerError::Embedding(_) => "EmbeddingError",
            ChunkerError::Llm(_) => "LLMCallError",
            ChunkerError::Structural(_) => "StructuralError",
            ChunkerError::Writer(_) => "WriterError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(info: &str) -> Sentence {
        Sentence {
            text: "本文。".to_string(),
            line_number: 1,
            structure_type: StructureType::Plain,
            indent_level: 0,
            structure_info: info.to_string(),
        }
    }

    #[test]
    fn header_level_parses_annotation() {
        let s = sentence("header:3");
        assert_eq!(s.header_level(), Some(3));
        assert_eq!(sentence("plain").header_level(), None);
    }

    #[test]
    fn paragraph_break_suffix_is_transparent_to_annotation() {
        let s = sentence("list:ordered+paragraph_break");
        assert!(s.starts_paragraph());
        assert!(s.is_ordered_list());
        assert_eq!(s.annotation(), "list:ordered");
    }

    #[test]
    fn char_count_counts_scalars_not_bytes() {
        assert_eq!(sentence("plain").char_count(), 3);
    }
}
