//! JSONL chunk persistence.
//!
//! One chunk per line: `{"text": ..., "sentences": [...], "metadata": {...}}`.
//! Lines are flushed whole, so an aborted run leaves no partial record behind.
//! Reading a file back and re-serializing it yields byte-identical output,
//! which `eval` relies on.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Chunk, ChunkMetadata};

#[derive(Debug, Error, Diagnostic)]
pub enum WriterError {
    #[error("I/O failure on {path}: {source}")]
    #[diagnostic(code(topicseam::writer::io))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize chunk record: {source}")]
    #[diagnostic(code(topicseam::writer::serialize))]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
}

/// The persisted shape of one chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    pub sentences: Vec<String>,
    pub metadata: ChunkMetadata,
}

impl From<&Chunk> for ChunkRecord {
    fn from(chunk: &Chunk) -> Self {
        Self {
            text: chunk.text.clone(),
            sentences: chunk.sentence_texts(),
            metadata: chunk.metadata.clone(),
        }
    }
}

pub struct JsonlWriter {
    out: BufWriter<File>,
    path: PathBuf,
    written: usize,
}

impl JsonlWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, WriterError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| WriterError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            out: BufWriter::new(file),
            path,
            written: 0,
        })
    }

    /// Serialize and flush one complete line.
    pub fn write_chunk(&mut self, chunk: &Chunk) -> Result<(), WriterError> {
        let record = ChunkRecord::from(chunk);
        let line = serde_json::to_string(&record)?;
        self.out
            .write_all(line.as_bytes())
            .and_then(|_| self.out.write_all(b"\n"))
            .and_then(|_| self.out.flush())
            .map_err(|source| WriterError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Final flush and close.
    pub fn finish(mut self) -> Result<(), WriterError> {
        self.out.flush().map_err(|source| WriterError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Load every record of a chunks JSONL file.
pub fn read_chunks(path: impl AsRef<Path>) -> Result<Vec<ChunkRecord>, WriterError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| WriterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| WriterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
