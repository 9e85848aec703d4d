//! Optional named-entity capability for the post-filter.
//!
//! Absence of a recognizer is a no-op, not an error: the NER-Jaccard rule is
//! simply skipped. The bundled [`LexicalRecognizer`] is a deliberately
//! lightweight stand-in that catches the entity shapes common in Japanese
//! technical prose without a model dependency.

use rustc_hash::FxHashSet;

/// Extracts a set of entity surface forms from one sentence.
pub trait EntityRecognizer: Send + Sync {
    fn entities(&self, text: &str) -> FxHashSet<String>;
}

/// Jaccard overlap of two entity sets. Empty-vs-empty is zero overlap, so
/// entity-free sentence pairs never trigger the demotion rule.
pub(crate) fn jaccard(a: &FxHashSet<String>, b: &FxHashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Pattern-based recognizer: katakana runs, capitalized Latin words, and
/// all-caps acronyms.
#[derive(Clone, Copy, Debug, Default)]
pub struct LexicalRecognizer;

fn is_katakana(c: char) -> bool {
    ('\u{30A0}'..='\u{30FF}').contains(&c)
}

impl EntityRecognizer for LexicalRecognizer {
    fn entities(&self, text: &str) -> FxHashSet<String> {
        let mut out = FxHashSet::default();
        let mut current = String::new();
        let mut flush = |buf: &mut String, out: &mut FxHashSet<String>| {
            if buf.chars().count() >= 2 {
                out.insert(std::mem::take(buf));
            } else {
                buf.clear();
            }
        };

        for c in text.chars() {
            if is_katakana(c) {
                current.push(c);
            } else {
                flush(&mut current, &mut out);
            }
        }
        flush(&mut current, &mut out);

        for word in text.split(|c: char| !c.is_ascii_alphanumeric()) {
            let mut chars = word.chars();
            let starts_upper = chars.next().is_some_and(|c| c.is_ascii_uppercase());
            if starts_upper && word.len() >= 2 {
                out.insert(word.to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn katakana_runs_and_capitalized_words_are_entities() {
        let ner = LexicalRecognizer;
        let got = ner.entities("サーバーの設定は Kubernetes と GPU に依存する。");
        assert!(got.contains("サーバー"));
        assert!(got.contains("Kubernetes"));
        assert!(got.contains("GPU"));
        assert!(!got.contains("設定"));
    }

    #[test]
    fn single_char_runs_are_ignored() {
        let ner = LexicalRecognizer;
        assert!(ner.entities("アとイ").is_empty());
    }

    #[test]
    fn jaccard_handles_empty_sets() {
        let a = FxHashSet::default();
        let b = FxHashSet::default();
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn jaccard_of_identical_sets_is_one() {
        let ner = LexicalRecognizer;
        let a = ner.entities("クラスター構成とノード管理。");
        let b = ner.entities("クラスター構成とノード管理。");
        assert_eq!(jaccard(&a, &b), 1.0);
    }
}
