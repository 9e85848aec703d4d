//! Chunk assembly: sentences plus boundary decisions in, size-bounded chunks
//! out.
//!
//! Chunk text is reconstructed with structural formatting restored — heading
//! markers, list markers with per-group numbering, paragraph breaks, blank
//! lines between structural regions — because naive concatenation destroys
//! exactly the structure the pre-processor worked to preserve.
//!
//! Characters of the reconstructed text are the canonical size measure;
//! `max_tokens`, when configured, is a secondary guard using an approximate
//! CJK-aware count.

use crate::config::BuilderConfig;
use crate::types::{Chunk, ChunkMetadata, Sentence, StructureType};

/// Accumulates sentences into the current chunk and seals on boundaries and
/// size limits. Sentences are never split: a single oversized sentence is
/// emitted as a chunk of its own.
pub struct ChunkBuilder {
    min_chars: usize,
    max_chars: usize,
    max_tokens: Option<usize>,
    sentences: Vec<Sentence>,
    text: String,
    ordered_index: usize,
}

impl ChunkBuilder {
    pub fn new(cfg: &BuilderConfig) -> Self {
        Self {
            min_chars: cfg.min_chars,
            max_chars: cfg.max_chars,
            max_tokens: cfg.max_tokens,
            sentences: Vec::new(),
            text: String::new(),
            ordered_index: 0,
        }
    }

    /// Feed the next sentence and its preceding boundary decision. Returns a
    /// sealed chunk when one completes.
    pub fn push(&mut self, sentence: Sentence, boundary: bool) -> Option<Chunk> {
        if boundary && !self.sentences.is_empty() && self.current_chars() >= self.min_chars {
            let chunk = self.seal();
            self.append(sentence);
            return chunk;
        }

        if !self.sentences.is_empty() && self.would_overflow(&sentence) {
            let chunk = self.seal();
            self.append(sentence);
            return chunk;
        }

        self.append(sentence);
        None
    }

    /// Seal whatever is buffered. Call once at end-of-stream.
    pub fn finish(&mut self) -> Option<Chunk> {
        self.seal()
    }

    fn current_chars(&self) -> usize {
        self.text.chars().count()
    }

    fn would_overflow(&self, sentence: &Sentence) -> bool {
        let sep = self.separator(sentence);
        let body = self.render(sentence);
        let chars = self.current_chars() + sep.chars().count() + body.chars().count();
        if chars > self.max_chars {
            return true;
        }
        if let Some(max_tokens) = self.max_tokens {
            let tokens = approx_tokens(&self.text) + approx_tokens(&body);
            if tokens > max_tokens {
                return true;
            }
        }
        false
    }

    fn append(&mut self, sentence: Sentence) {
        let sep = self.separator(&sentence);
        let body = self.render(&sentence);
        self.text.push_str(&sep);
        self.text.push_str(&body);
        self.ordered_index = if sentence.is_ordered_list() {
            self.ordered_index + 1
        } else {
            0
        };
        self.sentences.push(sentence);
    }

    /// Separator between the chunk's current tail and `next`.
    fn separator(&self, next: &Sentence) -> &'static str {
        let Some(prev) = self.sentences.last() else {
            return "";
        };
        match (prev.structure_type, next.structure_type) {
            // Header bodies end with '\n' already; one more makes the blank line.
            (StructureType::Header, _) => "\n",
            // A heading always begins on its own line.
            (_, StructureType::Header) => "\n",
            (StructureType::List, StructureType::List) => "\n",
            (StructureType::Code, StructureType::Code)
            | (StructureType::Table, StructureType::Table) => "\n",
            (StructureType::Plain, StructureType::Plain) => {
                if next.starts_paragraph() {
                    "\n"
                } else {
                    " "
                }
            }
            // Structural region transition: blank line.
            _ => "\n\n",
        }
    }

    /// Formatted body of one sentence.
    fn render(&self, sentence: &Sentence) -> String {
        match sentence.structure_type {
            StructureType::Header => {
                let level = sentence.header_level().unwrap_or(1) as usize;
                format!("{} {}\n", "#".repeat(level), sentence.text)
            }
            StructureType::List => {
                let indent = " ".repeat(sentence.indent_level as usize * 2);
                if sentence.is_ordered_list() {
                    // Numbering restarts with each list group.
                    let continues = self
                        .sentences
                        .last()
                        .is_some_and(|p| p.is_ordered_list() && p.indent_level == sentence.indent_level);
                    let index = if continues { self.ordered_index + 1 } else { 1 };
                    format!("{indent}{index}. {}", sentence.text)
                } else {
                    format!("{indent}- {}", sentence.text)
                }
            }
            _ => sentence.text.clone(),
        }
    }

    fn seal(&mut self) -> Option<Chunk> {
        if self.sentences.is_empty() {
            return None;
        }
        let sentences = std::mem::take(&mut self.sentences);
        let text = std::mem::take(&mut self.text);
        self.ordered_index = 0;

        let mut heading_levels: Vec<u8> =
            sentences.iter().filter_map(|s| s.header_level()).collect();
        heading_levels.sort_unstable();
        heading_levels.dedup();
        let metadata = ChunkMetadata {
            heading_levels,
            spans_list: sentences
                .iter()
                .any(|s| s.structure_type == StructureType::List),
            line_start: sentences.first().map(|s| s.line_number).unwrap_or(0),
            line_end: sentences.last().map(|s| s.line_number).unwrap_or(0),
        };
        let char_count = text.chars().count();
        let token_count = approx_tokens(&text);
        Some(Chunk {
            sentences,
            text,
            char_count,
            token_count,
            metadata,
        })
    }
}

/// Approximate token count: one per CJK scalar, plus roughly one per four
/// Latin alphanumerics. Advisory only; characters are canonical.
pub fn approx_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut latin = 0usize;
    for c in text.chars() {
        let cp = c as u32;
        let is_cjk = (0x3040..=0x30FF).contains(&cp)     // kana
            || (0x4E00..=0x9FFF).contains(&cp)           // unified ideographs
            || (0x3400..=0x4DBF).contains(&cp)
            || (0xFF66..=0xFF9D).contains(&cp);
        if is_cjk {
            cjk += 1;
        } else if c.is_ascii_alphanumeric() {
            latin += 1;
        }
    }
    cjk + latin.div_ceil(4)
}
