//! Structure-aware pre-processing: raw text in, tagged sentences out.
//!
//! ```text
//! reader ──► physical lines ──► region classification ──► segmentation
//!                │                    │                        │
//!                │                    ├─ code / table: line = sentence
//!                │                    ├─ heading: one sentence, header:N
//!                │                    └─ list / plain: terminal-punctuation split
//!                └─ blank lines are consumed; the next sentence gets a
//!                   `+paragraph_break` hint
//! ```
//!
//! The stream is lazy: lines are pulled from the reader on demand and plain
//! text is buffered only until its paragraph closes. Blank-typed sentences are
//! never emitted.

mod segment;
mod structure;

use std::collections::VecDeque;
use std::io::BufRead;

use crate::config::DocumentStructureConfig;
use crate::types::{ChunkerError, Sentence, StructureType};

use structure::LineClass;

/// Converts a readable text source into a lazy stream of [`Sentence`]s.
#[derive(Clone, Debug)]
pub struct SentencePreprocessor {
    cfg: DocumentStructureConfig,
}

impl SentencePreprocessor {
    pub fn new(cfg: &DocumentStructureConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    /// Lazily stream sentences from `reader`.
    pub fn stream<R: BufRead>(&self, reader: R) -> SentenceStream<R> {
        SentenceStream {
            cfg: self.cfg.clone(),
            reader,
            line_no: 0,
            in_fence: false,
            in_pre: false,
            paragraph: Vec::new(),
            queue: VecDeque::new(),
            pending_break: false,
            done: false,
        }
    }

    /// Eagerly process an in-memory document. Test and small-input helper.
    pub fn sentences(&self, text: &str) -> Result<Vec<Sentence>, ChunkerError> {
        self.stream(std::io::Cursor::new(text)).collect()
    }
}

/// One buffered plain line awaiting paragraph flush.
struct ParaLine {
    offset: usize,
    line_number: u32,
    indent_level: u8,
}

/// Lazy sentence iterator. See [`SentencePreprocessor::stream`].
pub struct SentenceStream<R> {
    cfg: DocumentStructureConfig,
    reader: R,
    line_no: u32,
    in_fence: bool,
    in_pre: bool,
    /// Joined text of buffered plain lines plus per-line offsets.
    paragraph: Vec<(ParaLine, String)>,
    queue: VecDeque<Sentence>,
    pending_break: bool,
    done: bool,
}

impl<R: BufRead> SentenceStream<R> {
    fn read_line(&mut self) -> Result<Option<String>, ChunkerError> {
        let mut buf = String::new();
        let n = self
            .reader
            .read_line(&mut buf)
            .map_err(|e| ChunkerError::Structural(format!("unreadable input: {e}")))?;
        if n == 0 {
            return Ok(None);
        }
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }

    fn indent_of(&self, line: &str) -> u8 {
        if !self.cfg.detect_indentation {
            return 0;
        }
        let width = structure::leading_width(line, self.cfg.tab_width);
        (width / self.cfg.tab_width.max(1)).min(u8::MAX as usize) as u8
    }

    fn emit(&mut self, mut sentence: Sentence) {
        if self.pending_break {
            sentence.structure_info.push_str("+paragraph_break");
            self.pending_break = false;
        }
        self.queue.push_back(sentence);
    }

    fn emit_region_line(&mut self, text: &str, structure_type: StructureType, info: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        let sentence = Sentence {
            text: trimmed.to_string(),
            line_number: self.line_no,
            structure_type,
            indent_level: self.indent_of(text),
            structure_info: info.to_string(),
        };
        self.emit(sentence);
    }

    fn flush_paragraph(&mut self) {
        if self.paragraph.is_empty() {
            return;
        }
        let lines = std::mem::take(&mut self.paragraph);
        let joined = lines
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        for (offset, text) in segment::segment_with_offsets(&joined) {
            // Locate the line this sentence starts on.
            let at = lines
                .partition_point(|(line, _)| line.offset <= offset)
                .saturating_sub(1);
            let line = &lines[at].0;
            let sentence = Sentence {
                text,
                line_number: line.line_number,
                structure_type: StructureType::Plain,
                indent_level: line.indent_level,
                structure_info: "plain".to_string(),
            };
            self.emit(sentence);
        }
    }

    fn buffer_plain(&mut self, line: String) {
        let offset = self
            .paragraph
            .last()
            .map(|(l, text)| l.offset + text.len() + 1)
            .unwrap_or(0);
        let para_line = ParaLine {
            offset,
            line_number: self.line_no,
            indent_level: self.indent_of(&line),
        };
        self.paragraph.push((para_line, line));
    }

    fn process(&mut self, line: String) {
        self.line_no += 1;

        if self.in_fence {
            if structure::classify(&line, &self.cfg) == LineClass::Fence {
                self.emit_region_line(&line, StructureType::Code, "code:fence");
                self.in_fence = false;
            } else {
                self.emit_region_line(&line, StructureType::Code, "code");
            }
            return;
        }
        if self.in_pre {
            if structure::classify(&line, &self.cfg) == LineClass::PreClose {
                self.emit_region_line(&line, StructureType::Code, "code");
                self.in_pre = false;
            } else {
                self.emit_region_line(&line, StructureType::Code, "code");
            }
            return;
        }

        match structure::classify(&line, &self.cfg) {
            LineClass::Fence => {
                self.flush_paragraph();
                self.emit_region_line(&line, StructureType::Code, "code:fence");
                self.in_fence = true;
            }
            LineClass::PreOpen => {
                self.flush_paragraph();
                self.emit_region_line(&line, StructureType::Code, "code");
                self.in_pre = true;
            }
            // A stray closer outside any region is ordinary prose.
            LineClass::PreClose | LineClass::Plain => {
                self.buffer_plain(line);
            }
            LineClass::TableRow => {
                self.flush_paragraph();
                self.emit_region_line(&line, StructureType::Table, "table");
            }
            LineClass::Heading { level, text } => {
                self.flush_paragraph();
                let indent = self.indent_of(&line);
                let sentence = Sentence {
                    text,
                    line_number: self.line_no,
                    structure_type: StructureType::Header,
                    indent_level: indent,
                    structure_info: format!("header:{level}"),
                };
                self.emit(sentence);
            }
            LineClass::ListItem {
                ordered,
                indent_spaces,
                text,
            } => {
                self.flush_paragraph();
                let indent = if self.cfg.detect_indentation {
                    (indent_spaces / self.cfg.tab_width.max(1)).min(u8::MAX as usize) as u8
                } else {
                    0
                };
                let info = if ordered {
                    "list:ordered"
                } else {
                    "list:unordered"
                };
                for text in segment::split_sentences(&text) {
                    let sentence = Sentence {
                        text,
                        line_number: self.line_no,
                        structure_type: StructureType::List,
                        indent_level: indent,
                        structure_info: info.to_string(),
                    };
                    self.emit(sentence);
                }
            }
            LineClass::Blank => {
                self.flush_paragraph();
                self.pending_break = true;
            }
        }
    }
}

impl<R: BufRead> Iterator for SentenceStream<R> {
    type Item = Result<Sentence, ChunkerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sentence) = self.queue.pop_front() {
                return Some(Ok(sentence));
            }
            if self.done {
                return None;
            }
            match self.read_line() {
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Ok(None) => {
                    self.done = true;
                    self.flush_paragraph();
                }
                Ok(Some(line)) => self.process(line),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(text: &str) -> Vec<Sentence> {
        SentencePreprocessor::new(&DocumentStructureConfig::default())
            .sentences(text)
            .unwrap()
    }

    #[test]
    fn plain_prose_is_segmented_per_paragraph() {
        let got = collect("こんにちは。お元気ですか？\n今日は晴れです。\n");
        let texts: Vec<_> = got.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, ["こんにちは。", "お元気ですか？", "今日は晴れです。"]);
        assert_eq!(got[0].line_number, 1);
        assert_eq!(got[2].line_number, 2);
        assert!(got.iter().all(|s| s.structure_type == StructureType::Plain));
    }

    #[test]
    fn sentence_spanning_lines_keeps_first_line_number() {
        let got = collect("この文は行をまた\nいで続きます。次の文。\n");
        assert_eq!(got[0].text, "この文は行をまた\nいで続きます。");
        assert_eq!(got[0].line_number, 1);
        assert_eq!(got[1].text, "次の文。");
        assert_eq!(got[1].line_number, 2);
    }

    #[test]
    fn blank_lines_are_consumed_and_hint_the_next_sentence() {
        let got = collect("前の段落。\n\n次の段落。\n");
        assert_eq!(got.len(), 2);
        assert!(!got[0].starts_paragraph());
        assert!(got[1].starts_paragraph());
        assert!(got
            .iter()
            .all(|s| s.structure_type != StructureType::Blank));
    }

    #[test]
    fn headings_and_lists_are_tagged() {
        let got = collect("## 設計\n- 一項目目。\n- 二項目目。\n");
        assert_eq!(got[0].structure_type, StructureType::Header);
        assert_eq!(got[0].structure_info, "header:2");
        assert_eq!(got[0].text, "設計");
        assert_eq!(got[1].structure_type, StructureType::List);
        assert_eq!(got[1].structure_info, "list:unordered");
        assert_eq!(got[2].line_number, 3);
    }

    #[test]
    fn code_fences_suspend_segmentation() {
        let got = collect("```\nlet x = 1;。\nlet y = 2;\n```\n");
        assert_eq!(got.len(), 4);
        assert!(got.iter().all(|s| s.structure_type == StructureType::Code));
        assert_eq!(got[0].structure_info, "code:fence");
        assert_eq!(got[1].text, "let x = 1;。");
    }

    #[test]
    fn table_rows_are_single_sentences() {
        let got = collect("| 名前 | 値 |\n| --- | --- |\n| a | 1 |\n");
        assert_eq!(got.len(), 3);
        assert!(got.iter().all(|s| s.structure_type == StructureType::Table));
    }

    #[test]
    fn list_indent_levels_follow_tab_width() {
        let got = collect("- 外側。\n  - 内側。\n");
        assert_eq!(got[0].indent_level, 0);
        assert_eq!(got[1].indent_level, 1);
    }

    #[test]
    fn ordered_items_keep_their_annotation() {
        let got = collect("1. 最初。\n2. 次。\n");
        assert!(got.iter().all(|s| s.is_ordered_list()));
    }

    #[test]
    fn line_numbers_never_decrease() {
        let got = collect("# 見出し\n\n本文一。本文二。\n- 項目。\n\n締め。\n");
        let mut last = 0;
        for s in &got {
            assert!(s.line_number >= last);
            last = s.line_number;
        }
    }

    #[test]
    fn every_sentence_is_nonempty() {
        let got = collect("  \n\n# 見出し\n   \n本文。\n");
        assert!(got.iter().all(|s| !s.text.trim().is_empty()));
    }
}
