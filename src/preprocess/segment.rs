//! Sentence segmentation for Japanese and mixed-script prose.
//!
//! Splits on terminal punctuation (`。．！？!?.`), keeping any run of closing
//! quotes or brackets attached to the sentence it terminates. Text inside an
//! open parenthetical or quoted span is never split, so `「はい。そうです。」`
//! stays one sentence.

/// Punctuation that can terminate a sentence.
const TERMINALS: &[char] = &['。', '．', '！', '？', '!', '?', '.'];

/// Opening delimiters that suppress splitting until balanced.
const OPENERS: &[char] = &['「', '『', '（', '(', '［', '[', '｛', '{', '【', '〈', '《'];

/// Closing delimiters, index-matched to [`OPENERS`].
const CLOSERS: &[char] = &['」', '』', '）', ')', '］', ']', '｝', '}', '】', '〉', '》'];

/// Closing marks that may trail a terminal and belong to the finished sentence.
const TRAILERS: &[char] = &[
    '」', '』', '）', ')', '］', ']', '｝', '}', '】', '〉', '》', '"', '\'', '”', '’',
];

fn is_opener(c: char) -> bool {
    OPENERS.contains(&c)
}

fn is_closer(c: char) -> bool {
    CLOSERS.contains(&c)
}

/// An ASCII period only terminates when what follows cannot continue the same
/// token: end of text, whitespace, or a closing trailer. This keeps decimals
/// (`3.5`), version strings, and `e.g.`-style abbreviations mid-token intact.
fn ascii_period_terminates(next: Option<char>) -> bool {
    match next {
        None => true,
        Some(c) => c.is_whitespace() || TRAILERS.contains(&c),
    }
}

/// Split `text` into trimmed sentences, each paired with the byte offset of
/// its first character in `text`. Offsets are ascending; empty fragments are
/// dropped.
pub(crate) fn segment_with_offsets(text: &str) -> Vec<(usize, String)> {
    let mut sentences = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if is_opener(c) {
            depth += 1;
            continue;
        }
        if is_closer(c) {
            depth = depth.saturating_sub(1);
            continue;
        }
        if depth > 0 || !TERMINALS.contains(&c) {
            continue;
        }
        if c == '.' && !ascii_period_terminates(chars.peek().map(|&(_, c)| c)) {
            continue;
        }
        // Pull trailing closers/quotes into this sentence.
        let mut end = idx + c.len_utf8();
        while let Some(&(next_idx, next_c)) = chars.peek() {
            if TRAILERS.contains(&next_c) {
                end = next_idx + next_c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        push_trimmed(&mut sentences, text, start, end);
        start = end;
    }
    push_trimmed(&mut sentences, text, start, text.len());
    sentences
}

/// Split `text` into trimmed sentences, discarding offsets.
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    segment_with_offsets(text)
        .into_iter()
        .map(|(_, s)| s)
        .collect()
}

fn push_trimmed(out: &mut Vec<(usize, String)>, text: &str, start: usize, end: usize) {
    let raw = &text[start..end];
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = raw.len() - raw.trim_start().len();
    out.push((start + lead, trimmed.to_string()));
}
