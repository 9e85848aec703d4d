//! Boundary F1 against a gold directory.
//!
//! A chunks JSONL file encodes its boundaries implicitly: after each chunk,
//! a boundary sits at the running sentence count. Predictions are scored
//! against gold over the union of both index sets, micro-averaged across
//! files.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::debug;

use crate::types::ChunkerError;
use crate::writer::{read_chunks, ChunkRecord, WriterError};

/// Micro-averaged boundary agreement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryScore {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub files: usize,
}

/// Cumulative sentence counts after each chunk; the trailing end-of-document
/// index is dropped since both sides always agree on it.
fn boundary_indices(records: &[ChunkRecord]) -> BTreeSet<usize> {
    let mut indices = BTreeSet::new();
    let mut total = 0usize;
    for record in records {
        total += record.sentences.len();
        indices.insert(total);
    }
    indices.remove(&total);
    indices
}

/// Score every `*.jsonl` in `gold_dir` against the same-named file in
/// `pred_dir`.
pub fn evaluate_dirs(gold_dir: &Path, pred_dir: &Path) -> Result<BoundaryScore, ChunkerError> {
    let mut gold_files: Vec<_> = std::fs::read_dir(gold_dir)
        .map_err(|source| WriterError::Io {
            path: gold_dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    gold_files.sort();

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for gold_path in &gold_files {
        let Some(name) = gold_path.file_name() else {
            continue;
        };
        let pred_path = pred_dir.join(name);
        let gold = boundary_indices(&read_chunks(gold_path)?);
        let pred = boundary_indices(&read_chunks(&pred_path)?);
        tp += gold.intersection(&pred).count();
        fp += pred.difference(&gold).count();
        fn_ += gold.difference(&pred).count();
        debug!(file = %name.to_string_lossy(), gold = gold.len(), pred = pred.len(), "scored");
    }

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    Ok(BoundaryScore {
        precision,
        recall,
        f1,
        files: gold_files.len(),
    })
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkMetadata;

    fn record(sentences: &[&str]) -> ChunkRecord {
        ChunkRecord {
            text: sentences.concat(),
            sentences: sentences.iter().map(|s| s.to_string()).collect(),
            metadata: ChunkMetadata::default(),
        }
    }

    fn write_jsonl(dir: &Path, name: &str, records: &[ChunkRecord]) {
        let lines: Vec<String> = records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap())
            .collect();
        std::fs::write(dir.join(name), lines.join("\n") + "\n").unwrap();
    }

    #[test]
    fn boundaries_are_cumulative_counts_without_the_tail() {
        let records = vec![record(&["a", "b"]), record(&["c"]), record(&["d", "e"])];
        let got = boundary_indices(&records);
        assert_eq!(got.into_iter().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn identical_segmentations_score_perfectly() {
        let gold_dir = tempfile::tempdir().unwrap();
        let pred_dir = tempfile::tempdir().unwrap();
        let records = vec![record(&["a", "b"]), record(&["c", "d"])];
        write_jsonl(gold_dir.path(), "doc.jsonl", &records);
        write_jsonl(pred_dir.path(), "doc.jsonl", &records);
        let score = evaluate_dirs(gold_dir.path(), pred_dir.path()).unwrap();
        assert_eq!(score.f1, 1.0);
        assert_eq!(score.files, 1);
    }

    #[test]
    fn disagreement_lowers_precision_and_recall() {
        let gold_dir = tempfile::tempdir().unwrap();
        let pred_dir = tempfile::tempdir().unwrap();
        write_jsonl(
            gold_dir.path(),
            "doc.jsonl",
            &[record(&["a", "b"]), record(&["c", "d"])],
        );
        write_jsonl(
            pred_dir.path(),
            "doc.jsonl",
            &[record(&["a"]), record(&["b"]), record(&["c", "d"])],
        );
        let score = evaluate_dirs(gold_dir.path(), pred_dir.path()).unwrap();
        // Gold boundary {2}, predicted {1, 2}: one hit, one false alarm.
        assert_eq!(score.recall, 1.0);
        assert_eq!(score.precision, 0.5);
        assert!((score.f1 - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn missing_prediction_file_is_an_error() {
        let gold_dir = tempfile::tempdir().unwrap();
        let pred_dir = tempfile::tempdir().unwrap();
        write_jsonl(gold_dir.path(), "doc.jsonl", &[record(&["a"])]);
        assert!(evaluate_dirs(gold_dir.path(), pred_dir.path()).is_err());
    }
}
