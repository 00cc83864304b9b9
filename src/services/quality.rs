use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::ContentType;
use crate::services::consistency::words;

pub const PASS_THRESHOLD: f64 = 0.6;

const LENGTH_WEIGHT: f64 = 0.4;
const OVERFLOW_WEIGHT: f64 = 0.2;
const COHERENCE_WEIGHT: f64 = 0.4;

const TRANSITION_WEIGHT: f64 = 0.4;
const VARIETY_WEIGHT: f64 = 0.3;
const PARAGRAPH_WEIGHT: f64 = 0.3;
const MIN_DISTINCT_SENTENCE_LENGTHS: usize = 3;

const TRANSITION_WORDS: &[&str] = &[
    "however",
    "therefore",
    "meanwhile",
    "furthermore",
    "moreover",
    "consequently",
    "nevertheless",
    "finally",
    "suddenly",
    "afterwards",
    "although",
    "because",
    "eventually",
    "instead",
    "then",
];

static SENTENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("valid sentence regex"));
static PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\r?\n").expect("valid paragraph regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub passes: bool,
    pub score: f64,
    pub word_count: usize,
    pub reason: String,
}

/// Scores generated text. The heuristic validator is the only implementation today;
/// the manager holds it behind this trait.
pub trait QualityScorer: Send + Sync {
    fn validate(&self, content: &str, content_type: ContentType) -> QualityReport;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicValidator;

impl QualityScorer for HeuristicValidator {
    fn validate(&self, content: &str, content_type: ContentType) -> QualityReport {
        let (min_words, max_words) = content_type.word_bounds();
        let word_count = content.split_whitespace().count();

        let length = (word_count as f64 / min_words.max(1) as f64).min(1.0);
        let overflow = if word_count > max_words {
            max_words as f64 / word_count as f64
        } else {
            1.0
        };
        let score = LENGTH_WEIGHT * length + OVERFLOW_WEIGHT * overflow + COHERENCE_WEIGHT * coherence(content);

        let mut problems = Vec::new();
        if word_count < min_words {
            problems.push(format!("word count {word_count} below minimum {min_words}"));
        }
        if score < PASS_THRESHOLD {
            problems.push(format!("score {score:.2} below {PASS_THRESHOLD:.2}"));
        }

        QualityReport {
            passes: problems.is_empty(),
            score,
            word_count,
            reason: if problems.is_empty() {
                "passed".to_string()
            } else {
                problems.join("; ")
            },
        }
    }
}

/// Surface-level coherence signal in [0, 1].
pub fn coherence(content: &str) -> f64 {
    let mut total = 0.0;

    if words(content).any(|w| TRANSITION_WORDS.contains(&w.as_str())) {
        total += TRANSITION_WEIGHT;
    }

    let sentence_lengths: HashSet<usize> = SENTENCE_RE
        .split(content)
        .map(|s| s.split_whitespace().count())
        .filter(|&n| n > 0)
        .collect();
    if sentence_lengths.len() >= MIN_DISTINCT_SENTENCE_LENGTHS {
        total += VARIETY_WEIGHT;
    }

    if PARAGRAPH_RE.is_match(content) {
        total += PARAGRAPH_WEIGHT;
    }

    f64::min(total, 1.0)
}
