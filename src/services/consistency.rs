use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}']+").expect("valid word regex"));

/// Lower-cased words of `text`: runs of letters, digits and apostrophes.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Jaccard similarity of the vocabularies of `new_content` and `prior_content`.
///
/// Two texts without any words are treated as identical (1.0); if only one side is
/// empty the score is 0.0.
pub fn score(new_content: &str, prior_content: &str) -> f64 {
    let new_words: HashSet<String> = words(new_content).collect();
    let prior_words: HashSet<String> = words(prior_content).collect();

    let union = new_words.union(&prior_words).count();
    if union == 0 {
        return 1.0;
    }
    let intersection = new_words.intersection(&prior_words).count();
    intersection as f64 / union as f64
}
