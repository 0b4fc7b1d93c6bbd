use std::collections::HashSet;

use crate::core::error::{AppError, AppResult};

pub const MIN_WORDS: usize = 2;

/// Splits free text on commas and whitespace. Empty tokens are dropped and
/// only the first occurrence of each word is kept (case-sensitive).
pub fn normalize_words(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|word| !word.is_empty())
        .filter(|word| seen.insert(*word))
        .map(str::to_string)
        .collect()
}

pub fn ensure_enough_words(words: &[String]) -> AppResult<()> {
    if words.len() < MIN_WORDS {
        return Err(AppError::validation(format!(
            "Please enter at least {} distinct words.",
            MIN_WORDS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_dedups_and_keeps_order() {
        assert_eq!(
            normalize_words("coffee, coffee  meeting,weekend"),
            vec!["coffee", "meeting", "weekend"]
        );
    }

    #[test]
    fn test_normalize_handles_separator_runs() {
        assert_eq!(
            normalize_words(" ,, apple,\n\tbanana , ,cherry,, "),
            vec!["apple", "banana", "cherry"]
        );
        assert!(normalize_words("  , ,\n").is_empty());
        assert!(normalize_words("").is_empty());
    }

    #[test]
    fn test_normalize_is_case_sensitive() {
        assert_eq!(normalize_words("Coffee coffee COFFEE coffee"), vec!["Coffee", "coffee", "COFFEE"]);
    }

    #[test]
    fn test_output_never_contains_empty_or_duplicates() {
        let inputs = [
            "a,b,,a b",
            "one\ntwo\r\nthree two",
            "x",
            "éclair, café café, naïve",
        ];
        for input in inputs {
            let words = normalize_words(input);
            assert!(words.iter().all(|w| !w.is_empty()));
            let unique: HashSet<_> = words.iter().collect();
            assert_eq!(unique.len(), words.len(), "duplicates in {:?}", words);
        }
    }

    #[test]
    fn test_minimum_word_count() {
        assert!(matches!(
            ensure_enough_words(&normalize_words("coffee")),
            Err(AppError::Validation(_))
        ));
        assert!(ensure_enough_words(&normalize_words("coffee tea")).is_ok());
    }
}
