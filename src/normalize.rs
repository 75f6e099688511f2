//! Key canonicalization for catalog tables and user queries.
//!
//! Every table key and every query passes through [`normalize`], so a user
//! who types `obi wan`, `Obi-Wan` or `OBIWAN` lands on the same key.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RE_NON_WORD: Regex = Regex::new(r"\W+").unwrap();
    static ref RE_ABBREVIATION_NOISE: Regex = Regex::new(r"[^\w\s]+").unwrap();
    // "2-1B (Too-Onebee)" carries a second name in trailing parentheses
    static ref RE_ALIAS: Regex = Regex::new(r"^(.+?)\s*\((.+)\)$").unwrap();
}

/// Lower-case, trim and strip every non-word character (whitespace included).
pub fn normalize(text: &str) -> String {
    normalize_with(text, true)
}

/// Like [`normalize`], but leaves symbols and inner whitespace alone when
/// `strip_symbols` is false.
pub fn normalize_with(text: &str, strip_symbols: bool) -> String {
    let lowered = text.to_lowercase();
    let trimmed = lowered.trim();
    if strip_symbols {
        RE_NON_WORD.replace_all(trimmed, "").into_owned()
    } else {
        trimmed.to_string()
    }
}

/// Acronym of a multi-word name: "Obi-Wan Kenobi" becomes "owk".
///
/// Hyphens separate words, other punctuation is dropped, and words that do
/// not start with a letter contribute nothing.
pub fn abbreviate(text: &str) -> String {
    let lowered = text.to_lowercase().replace('-', " ");
    let reduced = RE_ABBREVIATION_NOISE.replace_all(lowered.trim(), "");
    reduced
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .filter(|c| c.is_alphabetic())
        .collect()
}

/// Split `"Name (Alias)"` into its two names.
pub fn split_alias(title: &str) -> Option<(&str, &str)> {
    let caps = RE_ALIAS.captures(title.trim())?;
    let name = caps.get(1)?.as_str();
    let alias = caps.get(2)?.as_str();
    Some((name, alias))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_strips_case_space_and_symbols() {
        assert_eq!(normalize("  Ben Kenobi "), "benkenobi");
        assert_eq!(normalize("•Obi-Wan's Lightsaber"), "obiwanslightsaber");
        assert_eq!(normalize("SER004"), "ser004");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" -- "), "");
    }

    #[test]
    fn test_normalize_without_symbol_stripping() {
        assert_eq!(normalize_with("  Obi-Wan Kenobi ", false), "obi-wan kenobi");
    }

    #[test]
    fn test_abbreviate_treats_hyphen_as_separator() {
        assert_eq!(abbreviate("Obi-Wan Kenobi"), "owk");
        assert_eq!(abbreviate("Luke Skywalker"), "ls");
        assert_eq!(abbreviate("Malachor: Sith Temple Upper Chamber"), "mstuc");
    }

    #[test]
    fn test_abbreviate_skips_non_letter_words() {
        assert_eq!(abbreviate("2-1B Medical Droid"), "md");
        assert_eq!(abbreviate("   "), "");
        assert_eq!(abbreviate("'Ello, Mate"), "em");
    }

    #[test]
    fn test_split_alias() {
        assert_eq!(split_alias("2-1B (Too-Onebee)"), Some(("2-1B", "Too-Onebee")));
        assert_eq!(split_alias("Luke Skywalker"), None);
    }

    proptest! {
        #[test]
        fn proptest_normalize_is_idempotent(s in "\\PC{0,40}") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn proptest_normalize_keeps_only_word_chars(s in "[A-Za-z0-9 ,.'!-]{0,40}") {
            let key = normalize(&s);
            prop_assert!(key.chars().all(|c| c.is_alphanumeric() || c == '_'));
        }
    }
}
