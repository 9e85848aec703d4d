//! Four-stage topic-boundary detection.
//!
//! ```text
//! (sentence, embedding) ──► A: threshold screen ──► hard true/false
//!                                │ ambiguous
//!                                ▼
//!                           B: robust z-score hint
//!                                │
//!                                ▼
//!                           C: LLM majority vote (concurrent, in-order)
//!                                │
//!                                ▼
//!                           D: structural overrides & demotions
//! ```
//!
//! Decisions are emitted strictly in document order. Stage C fans out over
//! the router's semaphore; an ordered future queue releases results only from
//! the head, so internal buffering is bounded by the window length plus the
//! adjudications in flight.

mod adjudicate;
mod ner;
mod postfilter;
mod screen;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures_util::stream::FuturesOrdered;
use futures_util::{Stream, StreamExt};
use tracing::debug;

use crate::config::Config;
use crate::llm::{ChatProvider, GenerationParams};
use crate::types::{ChunkerError, Embedding, Sentence};

pub use ner::{EntityRecognizer, LexicalRecognizer};
pub use postfilter::Adjustment;

use postfilter::PostFilter;
use screen::{cosine, screen, Screen, SimilarityWindow};

/// How one adjacency was decided, recorded per sentence for logging and eval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Stage A: similarity at or above the high threshold.
    HighSimilarity,
    /// Stage A: similarity at or below the low threshold.
    LowSimilarity,
    /// Stage C: vote tally.
    Votes { boundary: usize, total: usize },
    /// Stage C failed completely; Stage-B hint used.
    HintFallback,
}

/// Everything the cascade learned about one adjacency.
#[derive(Clone, Debug)]
pub struct AdjacencySignal {
    pub similarity: f32,
    /// Stage-B score; `None` when Stage A decided outright.
    pub z_score: Option<f32>,
    /// Whether the two sentences differ in structural type.
    pub structure_transition: bool,
    pub verdict: Verdict,
    /// Stage-D adjustment, if any fired.
    pub adjustment: Adjustment,
}

/// A sentence annotated with the boundary decision *before* it.
///
/// The first sentence of a document always carries `boundary = false` and no
/// signal.
#[derive(Clone, Debug)]
pub struct DetectedSentence {
    pub sentence: Sentence,
    pub boundary: bool,
    pub signal: Option<AdjacencySignal>,
}

/// Intermediate carried through the ordered queue: previous sentence (for
/// Stage D), current sentence, pre-D decision, pre-D signal.
type Resolved = (Option<Sentence>, Sentence, bool, Option<AdjacencySignal>);
type ResolvedFuture = Pin<Box<dyn Future<Output = Resolved> + Send>>;

pub struct BoundaryDetector {
    cfg: crate::config::DetectorConfig,
    provider: Arc<dyn ChatProvider>,
    post: PostFilter,
    /// Ordered-queue depth before the head must resolve.
    lookahead: usize,
}

impl BoundaryDetector {
    pub fn new(
        cfg: &Config,
        provider: Arc<dyn ChatProvider>,
        ner: Option<Arc<dyn EntityRecognizer>>,
    ) -> Self {
        Self {
            cfg: cfg.detector.clone(),
            provider,
            post: PostFilter::new(cfg, ner),
            lookahead: cfg.detector.window + cfg.runtime.llm_concurrency.max(1) * 2,
        }
    }

    /// Consume aligned (sentence, embedding) pairs and yield each sentence
    /// with the boundary decision preceding it, in input order.
    pub fn detect<'a, S>(
        &'a self,
        pairs: S,
    ) -> impl Stream<Item = Result<DetectedSentence, ChunkerError>> + 'a
    where
        S: Stream<Item = Result<(Sentence, Embedding), ChunkerError>> + Send + 'a,
    {
        stream! {
            let params = GenerationParams {
                temperature: self.cfg.temperature,
                max_tokens: self.cfg.max_tokens,
            };
            let mut window = SimilarityWindow::new(self.cfg.window);
            let mut prev: Option<(Sentence, Embedding)> = None;
            let mut pending: FuturesOrdered<ResolvedFuture> = FuturesOrdered::new();

            futures_util::pin_mut!(pairs);
            loop {
                while pending.len() >= self.lookahead {
                    if let Some(resolved) = pending.next().await {
                        yield Ok(self.finish(resolved));
                    }
                }
                match pairs.next().await {
                    None => break,
                    Some(Err(e)) => {
                        yield Err(e);
                        return;
                    }
                    Some(Ok((sentence, embedding))) => {
                        match prev.take() {
                            None => {
                                let first = sentence.clone();
                                pending.push_back(Box::pin(async move {
                                    (None, first, false, None)
                                }));
                            }
                            Some((prev_sentence, prev_embedding)) => {
                                let sim = cosine(&prev_embedding, &embedding);
                                let outcome = screen(sim, &window, &self.cfg);
                                window.push(sim);
                                pending.push_back(self.resolve(
                                    prev_sentence,
                                    sentence.clone(),
                                    sim,
                                    outcome,
                                    params,
                                ));
                            }
                        }
                        prev = Some((sentence, embedding));
                    }
                }
            }
            while let Some(resolved) = pending.next().await {
                yield Ok(self.finish(resolved));
            }
        }
    }

    /// Build the (possibly deferred) pre-D decision for one adjacency.
    fn resolve(
        &self,
        prev: Sentence,
        next: Sentence,
        sim: f32,
        outcome: Screen,
        params: GenerationParams,
    ) -> ResolvedFuture {
        let transition = prev.structure_type != next.structure_type;
        match outcome {
            Screen::Continuation => {
                let signal = AdjacencySignal {
                    similarity: sim,
                    z_score: None,
                    structure_transition: transition,
                    verdict: Verdict::HighSimilarity,
                    adjustment: Adjustment::Unchanged,
                };
                Box::pin(async move { (Some(prev), next, false, Some(signal)) })
            }
            Screen::Boundary => {
                let signal = AdjacencySignal {
                    similarity: sim,
                    z_score: None,
                    structure_transition: transition,
                    verdict: Verdict::LowSimilarity,
                    adjustment: Adjustment::Unchanged,
                };
                Box::pin(async move { (Some(prev), next, true, Some(signal)) })
            }
            Screen::Ambiguous { z, likely_boundary } => {
                let provider = Arc::clone(&self.provider);
                let n_vote = self.cfg.n_vote;
                let prompt = adjudicate::vote_prompt(&prev, &next);
                Box::pin(async move {
                    let (boundary, verdict) =
                        adjudicate::adjudicate(provider, params, n_vote, prompt, likely_boundary)
                            .await;
                    let signal = AdjacencySignal {
                        similarity: sim,
                        z_score: Some(z),
                        structure_transition: transition,
                        verdict,
                        adjustment: Adjustment::Unchanged,
                    };
                    (Some(prev), next, boundary, Some(signal))
                })
            }
        }
    }

    /// Stage D plus final assembly.
    fn finish(&self, resolved: Resolved) -> DetectedSentence {
        let (prev, sentence, boundary, signal) = resolved;
        match prev {
            None => DetectedSentence {
                sentence,
                boundary: false,
                signal: None,
            },
            Some(prev) => {
                let (boundary, adjustment) = self.post.apply(&prev, &sentence, boundary);
                if adjustment != Adjustment::Unchanged {
                    debug!(
                        line = sentence.line_number,
                        ?adjustment,
                        "post-filter adjusted boundary"
                    );
                }
                let signal = signal.map(|mut s| {
                    s.adjustment = adjustment;
                    s
                });
                DetectedSentence {
                    sentence,
                    boundary,
                    signal,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalLlmConfig;
    use crate::llm::ProviderRouter;
    use crate::testing::{plain_sentence, ScriptedAnswer, ScriptedProvider};
    use futures_util::stream;

    fn config() -> Config {
        let mut cfg = Config::default();
        cfg.llm.local = Some(LocalLlmConfig {
            server_url: "http://127.0.0.1:8000".into(),
            model_path: None,
        });
        cfg
    }

    fn pairs(
        items: Vec<(Sentence, Embedding)>,
    ) -> impl Stream<Item = Result<(Sentence, Embedding), ChunkerError>> {
        stream::iter(items.into_iter().map(Ok))
    }

    async fn run(
        cfg: &Config,
        provider: Arc<ScriptedProvider>,
        items: Vec<(Sentence, Embedding)>,
    ) -> Vec<DetectedSentence> {
        let router = Arc::new(ProviderRouter::with_provider(provider, 2));
        let detector = BoundaryDetector::new(cfg, router, None);
        detector
            .detect(pairs(items))
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    /// Unit vector at `angle` degrees in the plane; cosine between two of
    /// these is the cosine of the angle difference.
    fn unit(angle_deg: f32) -> Embedding {
        let rad = angle_deg.to_radians();
        vec![rad.cos(), rad.sin()]
    }

    #[tokio::test]
    async fn high_similarity_skips_the_llm() {
        let provider = Arc::new(ScriptedProvider::always("NO", 0));
        let items = vec![
            (plain_sentence("同じ話題。", 1), unit(0.0)),
            (plain_sentence("ほぼ同じ話題。", 2), unit(5.0)),
        ];
        let out = run(&config(), provider.clone(), items).await;
        assert_eq!(out.len(), 2);
        assert!(!out[1].boundary);
        assert_eq!(
            out[1].signal.as_ref().unwrap().verdict,
            Verdict::HighSimilarity
        );
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn low_similarity_cuts_without_the_llm() {
        let provider = Arc::new(ScriptedProvider::always("YES", 0));
        let items = vec![
            (plain_sentence("機械学習の話。", 1), unit(0.0)),
            (plain_sentence("今日の天気。", 2), unit(80.0)),
        ];
        let out = run(&config(), provider.clone(), items).await;
        assert!(out[1].boundary);
        assert_eq!(
            out[1].signal.as_ref().unwrap().verdict,
            Verdict::LowSimilarity
        );
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn ambiguous_adjacency_is_put_to_a_vote() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedAnswer::Text("YES"),
            ScriptedAnswer::Text("NO"),
            ScriptedAnswer::Text("YES"),
        ]));
        // cos(45°) ≈ 0.707: inside the ambiguous band.
        let items = vec![
            (plain_sentence("実装の詳細。", 1), unit(0.0)),
            (plain_sentence("関連する話題。", 2), unit(45.0)),
        ];
        let out = run(&config(), provider.clone(), items).await;
        assert!(!out[1].boundary);
        assert_eq!(
            out[1].signal.as_ref().unwrap().verdict,
            Verdict::Votes {
                boundary: 1,
                total: 3
            }
        );
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn failed_votes_fall_back_to_window_hint() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedAnswer::Fail,
            ScriptedAnswer::Fail,
            ScriptedAnswer::Fail,
        ]));
        // Two high-similarity adjacencies fill the window with ~1.0 values,
        // then an ambiguous 45° drop scores as a strong anomaly.
        let items = vec![
            (plain_sentence("文一。", 1), unit(0.0)),
            (plain_sentence("文二。", 2), unit(1.0)),
            (plain_sentence("文三。", 3), unit(2.0)),
            (plain_sentence("文四。", 4), unit(47.0)),
        ];
        let out = run(&config(), provider, items).await;
        assert!(out[3].boundary);
        assert_eq!(
            out[3].signal.as_ref().unwrap().verdict,
            Verdict::HintFallback
        );
    }

    #[tokio::test]
    async fn decisions_arrive_in_document_order() {
        // Several ambiguous adjacencies resolved concurrently must still come
        // out in input order.
        let script: Vec<_> = std::iter::repeat(ScriptedAnswer::Text("YES"))
            .take(30)
            .collect();
        let provider = Arc::new(ScriptedProvider::new(script));
        let mut items = vec![(plain_sentence("文0。", 1), unit(0.0))];
        for i in 1..=8 {
            items.push((
                plain_sentence(&format!("文{i}。"), i as u32 + 1),
                unit(45.0 * (i % 2) as f32),
            ));
        }
        let out = run(&config(), provider, items).await;
        let lines: Vec<u32> = out.iter().map(|d| d.sentence.line_number).collect();
        let mut sorted = lines.clone();
        sorted.sort_unstable();
        assert_eq!(lines, sorted);
        assert_eq!(out.len(), 9);
    }

    #[tokio::test]
    async fn embedding_error_aborts_the_stream() {
        let provider = Arc::new(ScriptedProvider::always("YES", 0));
        let router = Arc::new(ProviderRouter::with_provider(provider, 2));
        let cfg = config();
        let detector = BoundaryDetector::new(&cfg, router, None);
        let items = stream::iter(vec![
            Ok((plain_sentence("文。", 1), unit(0.0))),
            Err(ChunkerError::Structural("broken".into())),
        ]);
        let out: Vec<_> = detector.detect(items).collect().await;
        assert!(out.last().unwrap().is_err());
    }
}
