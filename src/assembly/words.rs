use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Widening applied to zero-length words, in seconds.
pub const DEGENERATE_EPSILON: f64 = 0.001;

/// Words shorter than this that open a new sentence get merged forward.
pub const MIN_FRAGMENT_DURATION: f64 = 0.11;

const SENTENCE_TERMINALS: &[char] = &['.', '!', '?', '…', '。', '！', '？'];

/// A timestamped word as produced by the generation service (absolute time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    #[serde(default)]
    pub words: Vec<RawWord>,
}

/// Clip-relative caption word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    #[serde(rename = "word")]
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl Word {
    pub fn duration(&self) -> f64 {
        round_ms(self.end - self.start)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    #[error("corrupt timing for word {index} ({text:?}): start {start} >= end {end}")]
    Corrupt {
        index: usize,
        text: String,
        start: f64,
        end: f64,
    },
    #[error("word {index} ({text:?}) starts at {start}, before the previous word at {previous}")]
    OutOfOrder {
        index: usize,
        text: String,
        start: f64,
        previous: f64,
    },
}

/// Turn one clip's nested per-segment words into a zero-based, validated
/// caption sequence.
pub fn normalize_words(segments: &[RawSegment]) -> Result<Vec<Word>, TimingError> {
    let flat: Vec<&RawWord> = segments.iter().flat_map(|s| s.words.iter()).collect();
    let Some(first) = flat.first() else {
        return Ok(Vec::new());
    };
    let origin = first.start;

    let mut words = Vec::with_capacity(flat.len());
    for (index, raw) in flat.iter().enumerate() {
        let start = round_ms(raw.start - origin);
        let mut end = round_ms(raw.end - origin);
        if start == end {
            end = round_ms(end + DEGENERATE_EPSILON);
        }
        if start >= end {
            return Err(TimingError::Corrupt {
                index,
                text: raw.word.clone(),
                start,
                end,
            });
        }
        let previous = words.last().map_or(start, |prev: &Word| prev.start);
        if start < previous {
            return Err(TimingError::OutOfOrder {
                index,
                text: raw.word.clone(),
                start,
                previous,
            });
        }
        words.push(Word {
            text: raw.word.clone(),
            start,
            end,
        });
    }

    Ok(merge_fragments(words))
}

/// Clip duration is the end of the final caption word.
pub fn clip_duration(words: &[Word]) -> Option<f64> {
    words.last().map(|w| w.end)
}

/// Expects validated words: positive intervals with non-decreasing starts,
/// so a merged word spans `word.start..next.end` with `start < end`.
fn merge_fragments(words: Vec<Word>) -> Vec<Word> {
    let mut merged: Vec<Word> = Vec::with_capacity(words.len());
    let mut iter = words.into_iter();

    while let Some(word) = iter.next() {
        let opens_sentence = merged.last().is_some_and(|prev| ends_sentence(&prev.text));
        if word.duration() < MIN_FRAGMENT_DURATION && opens_sentence {
            if let Some(next) = iter.next() {
                debug_assert!(word.start < next.end);
                merged.push(Word {
                    text: format!("{} {}", word.text, next.text),
                    start: word.start,
                    end: next.end,
                });
                continue;
            }
        }
        merged.push(word);
    }

    merged
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end()
        .chars()
        .last()
        .is_some_and(|c| SENTENCE_TERMINALS.contains(&c))
}

fn round_ms(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(word: &str, start: f64, end: f64) -> RawWord {
        RawWord {
            word: word.to_string(),
            start,
            end,
        }
    }

    fn segment(words: Vec<RawWord>) -> RawSegment {
        RawSegment { words }
    }

    #[test]
    fn test_rebases_to_zero_and_flattens_segments() {
        let segments = vec![
            segment(vec![raw("one", 12.5, 12.9), raw("two", 12.9, 13.4)]),
            segment(vec![raw("three", 13.5, 14.0)]),
        ];

        let words = normalize_words(&segments).unwrap();
        let texts: Vec<&str> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(words[0].start, 0.0);
        assert_eq!(words[0].end, 0.4);
        assert_eq!(words[2].start, 1.0);
        assert_eq!(clip_duration(&words), Some(1.5));
    }

    #[test]
    fn test_degenerate_interval_is_widened() {
        let segments = vec![segment(vec![raw("so", 0.0, 0.4), raw("um", 1.2, 1.2)])];

        let words = normalize_words(&segments).unwrap();
        assert_eq!(words[1].start, 1.2);
        assert_eq!(words[1].end, 1.201);
    }

    #[test]
    fn test_inverted_interval_is_corrupt() {
        let segments = vec![segment(vec![raw("fine", 3.0, 3.5), raw("broken", 4.0, 3.9)])];

        match normalize_words(&segments) {
            Err(TimingError::Corrupt { index, start, end, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(start, 1.0);
                assert_eq!(end, 0.9);
            }
            other => panic!("expected corrupt timing, got {:?}", other),
        }
    }

    #[test]
    fn test_word_starting_before_its_predecessor_is_rejected() {
        let segments = vec![segment(vec![raw("x", 5.0, 5.5), raw("y", 4.0, 4.5)])];

        match normalize_words(&segments) {
            Err(TimingError::OutOfOrder { index, start, previous, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(start, -1.0);
                assert_eq!(previous, 0.0);
            }
            other => panic!("expected out-of-order timing, got {:?}", other),
        }
    }

    #[test]
    fn test_fragment_followed_by_earlier_word_is_rejected_not_merged() {
        let segments = vec![segment(vec![
            raw("Hi.", 10.0, 10.5),
            raw("a", 10.5, 10.55),
            raw("b", 10.3, 10.4),
        ])];

        match normalize_words(&segments) {
            Err(TimingError::OutOfOrder { index, text, .. }) => {
                assert_eq!(index, 2);
                assert_eq!(text, "b");
            }
            other => panic!("expected out-of-order timing, got {:?}", other),
        }
    }

    #[test]
    fn test_equal_starts_are_allowed() {
        let segments = vec![segment(vec![raw("a", 1.0, 1.3), raw("b", 1.0, 1.4)])];

        let words = normalize_words(&segments).unwrap();
        assert_eq!(words[1].start, 0.0);
        assert_eq!(words[1].end, 0.4);
    }

    #[test]
    fn test_short_fragment_after_sentence_end_merges_forward() {
        let segments = vec![segment(vec![
            raw("Hello.", 0.0, 0.5),
            raw("a", 0.5, 0.55),
            raw("world", 0.55, 0.9),
        ])];

        let words = normalize_words(&segments).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[1].text, "a world");
        assert_eq!(words[1].start, 0.5);
        assert_eq!(words[1].end, 0.9);
    }

    #[test]
    fn test_short_fragment_mid_sentence_is_kept() {
        let segments = vec![segment(vec![
            raw("Hello", 0.0, 0.5),
            raw("a", 0.5, 0.55),
            raw("world", 0.55, 0.9),
        ])];

        let words = normalize_words(&segments).unwrap();
        assert_eq!(words.len(), 3);
    }

    #[test]
    fn test_trailing_fragment_without_follower() {
        let segments = vec![segment(vec![raw("Done!", 0.0, 0.5), raw("ok", 0.5, 0.52)])];

        let words = normalize_words(&segments).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[1].text, "ok");
    }

    #[test]
    fn test_empty_input() {
        assert!(normalize_words(&[]).unwrap().is_empty());
        assert!(normalize_words(&[RawSegment::default()]).unwrap().is_empty());
    }

    #[test]
    fn test_normalized_sequences_hold_ordering_invariants() {
        // small deterministic LCG so the sequences vary without a rand dependency
        let mut seed: u64 = 0x5eed;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as f64 / (1u64 << 31) as f64
        };

        for _ in 0..50 {
            let mut cursor = 30.0 + next() * 100.0;
            let mut words = Vec::new();
            for i in 0..20 {
                let duration = if next() < 0.2 { 0.0 } else { 0.02 + next() * 0.6 };
                let text = if next() < 0.3 { format!("w{}.", i) } else { format!("w{}", i) };
                words.push(raw(&text, cursor, cursor + duration));
                cursor += duration + next() * 0.1;
            }

            let normalized = normalize_words(&[segment(words)]).unwrap();
            assert_eq!(normalized[0].start, 0.0);
            for pair in normalized.windows(2) {
                assert!(pair[0].start <= pair[1].start);
            }
            for word in &normalized {
                assert!(word.start < word.end, "{:?}", word);
            }
        }
    }
}
