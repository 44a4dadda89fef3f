//! Folder-name heuristics
//!
//! Pure classification of an `Author/Title` folder pair. Each check answers
//! one question: does this author segment look like something other than a
//! person's name, or does the title look like it swapped places with one?

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Words that belong in titles, not author names
const TITLE_STOPWORDS: &[&str] = &["the", "of", "and", "a", "in", "to", "for"];

/// Release/format junk that never belongs in an author segment
const FORMAT_JUNK: &[&str] = &["epub", "pdf", "mp3", "m4b", "r1.", "r2.", "[", "]"];

/// Generational and degree suffixes that legitimately follow a comma
const NAME_SUFFIXES: &[&str] = &["jr", "jr.", "sr", "sr.", "ii", "iii", "iv", "phd", "md"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    YearInAuthor,
    TitleWordsInAuthor,
    LooksLikePersonNameSwap,
    CommaFormattedAuthor,
    FormatJunkInAuthor,
}

impl IssueKind {
    /// Stable string form, stored in the queue's `reason` column
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::YearInAuthor => "year_in_author",
            IssueKind::TitleWordsInAuthor => "title_words_in_author",
            IssueKind::LooksLikePersonNameSwap => "looks_like_person_name_swap",
            IssueKind::CommaFormattedAuthor => "comma_formatted_author",
            IssueKind::FormatJunkInAuthor => "format_junk_in_author",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

lazy_static! {
    // 1950..=2029, anywhere in the string (folder names rarely pad years)
    static ref YEAR: Regex = Regex::new(r"(19[5-9]\d|20[0-2]\d)").unwrap();
    static ref WORD: Regex = Regex::new(r"[A-Za-z0-9']+").unwrap();
}

/// Classify an `Author/Title` pair. Checks run in a fixed order and the
/// first hit wins, so the reported reason is deterministic.
pub fn classify(author: &str, title: &str) -> Option<IssueKind> {
    if contains_year(author) {
        return Some(IssueKind::YearInAuthor);
    }

    let author_words: Vec<String> = words(author);
    if author_words
        .iter()
        .any(|w| TITLE_STOPWORDS.contains(&w.as_str()))
    {
        return Some(IssueKind::TitleWordsInAuthor);
    }

    if looks_like_person_name(title) {
        return Some(IssueKind::LooksLikePersonNameSwap);
    }

    if is_comma_formatted(author) {
        return Some(IssueKind::CommaFormattedAuthor);
    }

    let author_lower = author.to_lowercase();
    if FORMAT_JUNK.iter().any(|junk| author_lower.contains(junk)) {
        return Some(IssueKind::FormatJunkInAuthor);
    }

    None
}

/// True when the string contains a plausible release year (1950-2029)
pub fn contains_year(s: &str) -> bool {
    YEAR.is_match(s)
}

/// Lowercased alphanumeric words
fn words(s: &str) -> Vec<String> {
    WORD.find_iter(s)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// True for a title shaped like a bare "First Last" person name:
/// exactly two capitalized words, no title stopwords, no digits.
pub fn looks_like_person_name(s: &str) -> bool {
    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() != 2 {
        return false;
    }

    for part in &parts {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_uppercase() => {}
            _ => return false,
        }
        // Allow initials ("J.K."), apostrophes and hyphenated surnames
        if !part
            .chars()
            .all(|c| c.is_alphabetic() || c == '.' || c == '\'' || c == '-')
        {
            return false;
        }
    }

    !words(s)
        .iter()
        .any(|w| TITLE_STOPWORDS.contains(&w.as_str()))
}

/// True for "LastName, FirstName" shapes. A single comma followed by a
/// generational/degree suffix ("King, Jr.") does not count.
pub fn is_comma_formatted(author: &str) -> bool {
    if author.matches(',').count() != 1 {
        return false;
    }
    let after = match author.split(',').nth(1) {
        Some(s) => s.trim().to_lowercase(),
        None => return false,
    };
    !after.is_empty() && !NAME_SUFFIXES.contains(&after.as_str())
}

/// Strip bracketed release tags and trailing format junk from a name,
/// e.g. "Service Model [bitsearch.to] (EPUB)" -> "Service Model".
pub fn strip_format_junk(name: &str) -> String {
    lazy_static! {
        static ref BRACKETED: Regex = Regex::new(r"[\[(][^\])]*[\])]").unwrap();
        static ref TRAILING_FORMAT: Regex =
            Regex::new(r"(?i)\b(epub|pdf|mp3|m4b|flac|\d{2,3}k(bps)?)\b\s*$").unwrap();
    }

    let mut result = BRACKETED.replace_all(name, " ").to_string();
    loop {
        let stripped = TRAILING_FORMAT.replace(&result, "").trim().to_string();
        if stripped == result {
            break;
        }
        result = stripped;
    }

    result
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_year_in_author() {
        assert_eq!(
            classify("Adrian Tchaikovsky 2023", "Service Model"),
            Some(IssueKind::YearInAuthor)
        );
        assert_eq!(classify("1984 George Orwell", "1984"), Some(IssueKind::YearInAuthor));
    }

    #[test]
    fn test_classify_title_words_in_author() {
        assert_eq!(
            classify("The Funhouse", "Dean Koontz"),
            Some(IssueKind::TitleWordsInAuthor)
        );
        assert_eq!(
            classify("Children of Time", "Adrian Tchaikovsky"),
            Some(IssueKind::TitleWordsInAuthor)
        );
    }

    #[test]
    fn test_classify_person_name_swap() {
        assert_eq!(
            classify("Stella Maris", "Cormac McCarthy"),
            Some(IssueKind::LooksLikePersonNameSwap)
        );
    }

    #[test]
    fn test_classify_comma_formatted_author() {
        assert_eq!(
            classify("Koontz, Dean", "Whispers"),
            Some(IssueKind::CommaFormattedAuthor)
        );
        // Suffix after the comma is a legitimate name
        assert_eq!(classify("Sammy Davis, Jr.", "Yes I Can"), None);
    }

    #[test]
    fn test_classify_format_junk_in_author() {
        assert_eq!(
            classify("Dean Koontz [r1.1]", "Whispers"),
            Some(IssueKind::FormatJunkInAuthor)
        );
        assert_eq!(
            classify("Dean Koontz EPUB", "Whispers"),
            Some(IssueKind::FormatJunkInAuthor)
        );
    }

    #[test]
    fn test_classify_clean_pair() {
        assert_eq!(classify("Dean Koontz", "Whispers"), None);
        assert_eq!(classify("Cormac McCarthy", "Blood Meridian"), None);
    }

    #[test]
    fn test_looks_like_person_name() {
        assert!(looks_like_person_name("Cormac McCarthy"));
        assert!(looks_like_person_name("J.K. Rowling"));
        assert!(!looks_like_person_name("The Hobbit"));
        assert!(!looks_like_person_name("Blood Meridian Extended Edition"));
        assert!(!looks_like_person_name("Project 2501"));
    }

    #[test]
    fn test_strip_format_junk() {
        assert_eq!(
            strip_format_junk("Service Model [bitsearch.to]"),
            "Service Model"
        );
        assert_eq!(strip_format_junk("Whispers (64k) MP3"), "Whispers");
        assert_eq!(strip_format_junk("Clean Title"), "Clean Title");
    }
}
