//! Stage D: structural overrides and demotions over finalized decisions.
//!
//! Structural overrides are absolute: they insert or remove a boundary
//! regardless of what the earlier stages decided, and a structurally forced
//! boundary is never demoted. The NER-Jaccard and short-connective rules only
//! demote boundaries that came out of the similarity/LLM stages.

use std::sync::Arc;

use crate::config::Config;
use crate::types::{Sentence, StructureType};

use super::ner::{jaccard, EntityRecognizer};

/// What Stage D did to one adjacency, for the signal log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Adjustment {
    Unchanged,
    /// Boundary inserted by a structural rule.
    Forced(&'static str),
    /// Boundary removed by a structural rule.
    Removed(&'static str),
    /// Positive boundary demoted by a soft rule.
    Demoted(&'static str),
}

pub(crate) struct PostFilter {
    connectives: Vec<String>,
    connective_max_chars: usize,
    jaccard_threshold: f32,
    list_indent_threshold: u8,
    ner: Option<Arc<dyn EntityRecognizer>>,
}

impl PostFilter {
    pub fn new(cfg: &Config, ner: Option<Arc<dyn EntityRecognizer>>) -> Self {
        Self {
            connectives: cfg.detector.connectives.clone(),
            connective_max_chars: cfg.detector.connective_max_chars,
            jaccard_threshold: cfg.detector.ner_jaccard_threshold,
            list_indent_threshold: cfg.document_structure.list_indent_threshold,
            ner,
        }
    }

    /// Apply Stage D to the adjacency (`prev`, `next`).
    pub fn apply(&self, prev: &Sentence, next: &Sentence, boundary: bool) -> (bool, Adjustment) {
        // Structural overrides, forced true.
        if next.structure_type == StructureType::Header {
            return self.forced(boundary, "header");
        }
        if prev.structure_type == StructureType::Header {
            return self.forced(boundary, "header_body");
        }
        if prev.structure_type == StructureType::List
            && next.structure_type != StructureType::List
        {
            return self.forced(boundary, "list_exit");
        }
        let indent_delta = (i16::from(prev.indent_level) - i16::from(next.indent_level)).abs();
        if indent_delta >= i16::from(self.list_indent_threshold) {
            return self.forced(boundary, "indent_shift");
        }

        // Structural overrides, forced false: list anti-fragmentation.
        if prev.structure_type == StructureType::List
            && next.structure_type == StructureType::List
            && prev.annotation() == next.annotation()
            && prev.indent_level == next.indent_level
        {
            return if boundary {
                (false, Adjustment::Removed("list_cohesion"))
            } else {
                (false, Adjustment::Unchanged)
            };
        }

        if !boundary {
            return (false, Adjustment::Unchanged);
        }

        // Soft demotions on positive boundaries only.
        if let Some(ner) = &self.ner {
            let overlap = jaccard(&ner.entities(&prev.text), &ner.entities(&next.text));
            if overlap >= self.jaccard_threshold {
                return (false, Adjustment::Demoted("shared_entities"));
            }
        }
        if next.char_count() < self.connective_max_chars
            && self
                .connectives
                .iter()
                .any(|token| next.text.starts_with(token.as_str()))
        {
            return (false, Adjustment::Demoted("connective"));
        }

        (true, Adjustment::Unchanged)
    }

    fn forced(&self, already: bool, rule: &'static str) -> (bool, Adjustment) {
        if already {
            (true, Adjustment::Unchanged)
        } else {
            (true, Adjustment::Forced(rule))
        }
    }
}
