//! Text normalization shared by chunking, lexical scoring and the query cache.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use unicode_normalization::UnicodeNormalization;

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "about", "above", "after", "again", "against", "all", "also", "and", "any", "are",
        "because", "been", "before", "being", "below", "between", "both", "but", "can", "could",
        "did", "does", "doing", "down", "during", "each", "few", "for", "from", "further", "had",
        "has", "have", "having", "her", "here", "hers", "him", "his", "how", "into", "its",
        "itself", "just", "more", "most", "nor", "not", "now", "off", "once", "only", "other",
        "our", "ours", "out", "over", "own", "same", "she", "should", "some", "such", "than",
        "that", "the", "their", "theirs", "them", "then", "there", "these", "they", "this",
        "those", "through", "too", "under", "until", "very", "was", "were", "what", "when",
        "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your",
        "yours",
    ]
    .into_iter()
    .collect()
});

/// Whether `token` (already lowercased) is an English stop word.
#[must_use]
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(token)
}

/// Split into lowercase alphanumeric runs (NFKC-normalized). Punctuation is
/// a separator; nothing is filtered.
#[must_use]
pub fn raw_tokens(text: &str) -> Vec<String> {
    let normalized: String = text.nfkc().collect::<String>().to_lowercase();
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lexical tokens: lowercase, punctuation stripped, tokens of two characters
/// or fewer dropped, stop words dropped.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    tokenize_with(text, true)
}

/// [`tokenize`] with stop-word removal optional.
#[must_use]
pub fn tokenize_with(text: &str, drop_stop_words: bool) -> Vec<String> {
    raw_tokens(text)
        .into_iter()
        .filter(|token| token.chars().count() > 2 && !(drop_stop_words && is_stop_word(token)))
        .collect()
}

/// Cache key for exact query matching: lowercase, punctuation stripped,
/// tokens sorted and rejoined with single spaces.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    let mut tokens = raw_tokens(query);
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Rough token estimate: words x 4/3, at least 1 for non-blank text.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    if words == 0 {
        return 0;
    }
    (words * 4).div_ceil(3)
}

/// Most frequent non-stop-word terms, ties broken alphabetically.
///
/// Terms seen once are dropped when the text is long enough to have repeats.
#[must_use]
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let tokens = tokenize(text);
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in &tokens {
        if token.chars().all(char::is_numeric) {
            continue;
        }
        *counts.entry(token.as_str()).or_default() += 1;
    }

    let has_repeats = counts.values().any(|count| *count > 1);
    let mut ranked: Vec<(&str, usize)> = counts
        .into_iter()
        .filter(|(_, count)| !has_repeats || *count > 1)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(max)
        .map(|(term, _)| term.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_short_tokens_punctuation_and_stop_words() {
        let tokens = tokenize("The Miele dishwasher has a 14-place setting!");
        assert_eq!(tokens, vec!["miele", "dishwasher", "place", "setting"]);
    }

    #[test]
    fn tokenize_keeps_numbers_longer_than_two() {
        assert_eq!(tokenize("model 2024 v2"), vec!["model", "2024"]);
    }

    #[test]
    fn raw_tokens_normalizes_width_and_case() {
        assert_eq!(raw_tokens("ＲＵＳＴ, Rust!"), vec!["rust", "rust"]);
    }

    #[test]
    fn normalize_query_is_order_and_punctuation_insensitive() {
        assert_eq!(
            normalize_query("Warranty, dishwasher?"),
            normalize_query("dishwasher WARRANTY")
        );
        assert_eq!(normalize_query("b a c"), "a b c");
        assert_eq!(normalize_query("  ...  "), "");
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one"), 2);
        assert_eq!(estimate_tokens("one two three"), 4);
    }

    #[test]
    fn keywords_prefer_repeated_terms() {
        let keywords =
            extract_keywords("Rust ownership. Rust borrowing. Ownership rules in Rust.", 5);
        assert_eq!(keywords, vec!["rust", "ownership"]);
    }

    #[test]
    fn keywords_fall_back_to_singletons() {
        let keywords = extract_keywords("Warranty covers parts for two years", 3);
        assert_eq!(keywords, vec!["covers", "parts", "two"]);
    }
}
