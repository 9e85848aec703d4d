//! Stage C: LLM adjudication of ambiguous adjacencies.
//!
//! Each surviving adjacency is put to the model `n_vote` times with fresh
//! sampling; the majority decides. Ties and total failure fall back to the
//! Stage-B hint, the latter with a logged warning so degraded runs are
//! visible in the operator log.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::warn;

use crate::llm::{ChatProvider, GenerationParams};
use crate::types::Sentence;

use super::Verdict;

/// One parsed vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Vote {
    SameTopic,
    Boundary,
}

/// Strict-answer prompt. YES means the two sentences share a topic, NO means
/// a boundary runs between them.
pub(crate) fn vote_prompt(prev: &Sentence, next: &Sentence) -> String {
    format!(
        "次の2つの文が同じトピックに属するか判定してください。\n\
         同じトピックなら YES、異なるトピックなら NO のみを答えてください。\n\
         文の種別: {} / {}\n\
         -----\n{}\n-----\n{}",
        prev.structure_type, next.structure_type, prev.text, next.text
    )
}

/// Case-insensitive substring match, YES before NO. Anything else is a
/// discarded vote.
fn parse_vote(answer: &str) -> Option<Vote> {
    let lower = answer.to_lowercase();
    if lower.contains("yes") {
        Some(Vote::SameTopic)
    } else if lower.contains("no") {
        Some(Vote::Boundary)
    } else {
        None
    }
}

/// Resolve one ambiguous adjacency. Returns the boundary decision and the
/// verdict recorded in the adjacency signal.
pub(crate) async fn adjudicate(
    provider: Arc<dyn ChatProvider>,
    params: GenerationParams,
    n_vote: usize,
    prompt: String,
    hint: bool,
) -> (bool, Verdict) {
    let calls = (0..n_vote).map(|_| {
        let provider = Arc::clone(&provider);
        let prompt = prompt.clone();
        async move { provider.generate(&prompt, &params).await }
    });

    let mut boundary_votes = 0usize;
    let mut total = 0usize;
    for outcome in join_all(calls).await {
        match outcome {
            Ok(answer) => {
                if let Some(vote) = parse_vote(&answer) {
                    total += 1;
                    if vote == Vote::Boundary {
                        boundary_votes += 1;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "adjudication vote failed");
            }
        }
    }

    if total == 0 {
        warn!(hint, "all adjudication votes failed; falling back to window hint");
        return (hint, Verdict::HintFallback);
    }
    let verdict = Verdict::Votes {
        boundary: boundary_votes,
        total,
    };
    let boundary = match (boundary_votes * 2).cmp(&total) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => hint,
    };
    (boundary, verdict)
}
