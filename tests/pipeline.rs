//! End-to-end pipeline scenarios with deterministic encoder and provider.

use std::path::PathBuf;
use std::sync::Arc;

use topicseam::config::Config;
use topicseam::pipeline::run_with;
use topicseam::preprocess::SentencePreprocessor;
use topicseam::testing::{ScriptedProvider, StubEncoder};
use topicseam::writer::{read_chunks, ChunkRecord};

fn test_config(min_chars: usize, max_chars: usize) -> Config {
    let mut cfg = Config::default();
    cfg.builder.min_chars = min_chars;
    cfg.builder.max_chars = max_chars;
    cfg.runtime.batch_size = 4;
    cfg
}

/// Write `text` to a temp file, run the pipeline, read the chunk records.
async fn chunk_document(
    cfg: &Config,
    text: &str,
    encoder: StubEncoder,
    provider: Arc<ScriptedProvider>,
) -> (Vec<ChunkRecord>, PathBuf, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.txt");
    std::fs::write(&input, text).unwrap();
    let out = dir.path().join("out.chunks.jsonl");
    let report = run_with(cfg, encoder, provider, None, &input, Some(&out))
        .await
        .unwrap();
    assert_eq!(report.output, out);
    (read_chunks(&out).unwrap(), out, dir)
}

fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; 8];
    v[i % 8] = 1.0;
    v
}

#[tokio::test]
async fn heading_is_preserved_and_separated_from_its_body() {
    let cfg = test_config(0, 1000);
    let encoder = StubEncoder::default()
        .with_vector("Intro", axis(0))
        .with_vector("This is the body.", axis(0));
    let provider = Arc::new(ScriptedProvider::always("YES", 0));
    let (records, _, _dir) =
        chunk_document(&cfg, "# Intro\nThis is the body.\n", encoder, provider.clone()).await;

    assert_eq!(records.len(), 2);
    assert!(records[0].text.starts_with("# "));
    assert!(records[0].text.ends_with('\n'));
    assert_eq!(records[0].sentences, vec!["Intro"]);
    assert_eq!(records[1].sentences, vec!["This is the body."]);
    // Similarity was 1.0 and structure forced the cut; no LLM involved.
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn list_runs_cohere_even_when_embeddings_disagree() {
    let cfg = test_config(0, 1000);
    // Orthogonal vectors scream "boundary" at Stage A; the post-filter glues
    // the list back together and forces the cut before the paragraph.
    let encoder = StubEncoder::default()
        .with_vector("A", axis(0))
        .with_vector("B", axis(1))
        .with_vector("C", axis(2))
        .with_vector("Next paragraph.", axis(2));
    let provider = Arc::new(ScriptedProvider::always("YES", 0));
    let (records, _, _dir) = chunk_document(
        &cfg,
        "- A\n- B\n- C\nNext paragraph.\n",
        encoder,
        provider,
    )
    .await;

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].sentences, vec!["A", "B", "C"]);
    assert_eq!(records[0].text, "- A\n- B\n- C");
    assert_eq!(records[1].sentences, vec!["Next paragraph."]);
}

#[tokio::test]
async fn near_duplicates_stay_in_one_chunk_without_llm_calls() {
    let cfg = test_config(0, 1000);
    let encoder = StubEncoder::default()
        .with_vector("埋め込みは近い。", axis(3))
        .with_vector("埋め込みはとても近い。", axis(3));
    let provider = Arc::new(ScriptedProvider::always("NO", 0));
    let (records, _, _dir) = chunk_document(
        &cfg,
        "埋め込みは近い。埋め込みはとても近い。\n",
        encoder,
        provider.clone(),
    )
    .await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sentences.len(), 2);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn unrelated_sentences_split_without_llm_calls() {
    let cfg = test_config(0, 1000);
    let encoder = StubEncoder::default()
        .with_vector("機械学習の話をする。", axis(0))
        .with_vector("昼食はそばだった。", axis(1));
    let provider = Arc::new(ScriptedProvider::always("YES", 0));
    let (records, _, _dir) = chunk_document(
        &cfg,
        "機械学習の話をする。昼食はそばだった。\n",
        encoder,
        provider.clone(),
    )
    .await;

    assert_eq!(records.len(), 2);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn oversized_sentence_is_emitted_alone_and_unsplit() {
    let cfg = test_config(0, 30);
    let long = format!("{}。", "あ".repeat(60));
    let text = format!("{long}\n短い文。\n");
    let encoder = StubEncoder::default();
    let provider = Arc::new(ScriptedProvider::always("YES", 10));
    let (records, _, _dir) = chunk_document(&cfg, &text, encoder, provider).await;

    assert_eq!(records[0].sentences.len(), 1);
    assert_eq!(records[0].sentences[0], long);
    assert!(records[0].text.chars().count() > cfg.builder.max_chars);
}

#[tokio::test]
async fn every_sentence_lands_in_exactly_one_chunk_in_order() {
    let cfg = test_config(10, 80);
    let text = "# 概要\n\nこの文書は検証用である。複数の段落を含む。\n\n\
                - 項目一。\n- 項目二。\n\n```\ncode line\n```\n\
                最後の段落はここで終わる。そしてもう一文。\n";
    let encoder = StubEncoder::default();
    let provider = Arc::new(ScriptedProvider::always("YES", 100));
    let (records, _, _dir) = chunk_document(&cfg, text, encoder, provider).await;

    let expected: Vec<String> = SentencePreprocessor::new(&cfg.document_structure)
        .sentences(text)
        .unwrap()
        .into_iter()
        .map(|s| s.text)
        .collect();
    let flattened: Vec<String> = records
        .iter()
        .flat_map(|r| r.sentences.iter().cloned())
        .collect();
    assert_eq!(flattened, expected);
    assert!(!records.is_empty());
}

#[tokio::test]
async fn identical_runs_produce_identical_bytes() {
    let text = "一つ目の話題について述べる。詳細はこうだ。\n\n別の話題に移る。結論を述べる。\n";
    let cfg = test_config(5, 60);

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let provider = Arc::new(ScriptedProvider::always("YES", 50));
        let (_, path, dir) =
            chunk_document(&cfg, text, StubEncoder::default(), provider).await;
        outputs.push(std::fs::read(&path).unwrap());
        drop(dir);
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn doubling_llm_concurrency_leaves_chunks_unchanged() {
    let text = "最初の文である。次の文が続く。さらに別の文。話題が変わる。最後の文。\n";
    let mut outputs = Vec::new();
    for concurrency in [1, 2] {
        let mut cfg = test_config(5, 200);
        cfg.runtime.llm_concurrency = concurrency;
        let provider = Arc::new(ScriptedProvider::always("NO", 100));
        let (records, _, _dir) =
            chunk_document(&cfg, text, StubEncoder::default(), provider).await;
        outputs.push(records);
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn missing_input_reports_structural_error() {
    let cfg = test_config(0, 100);
    let provider = Arc::new(ScriptedProvider::always("YES", 0));
    let err = run_with(
        &cfg,
        StubEncoder::default(),
        provider,
        None,
        std::path::Path::new("/nonexistent/input.txt"),
        Some(std::path::Path::new("/tmp/unused.jsonl")),
    )
    .await
    .unwrap_err();
    assert_eq!(err.source.kind(), "StructuralError");
    assert_eq!(err.last_line, 0);
}
