//! OCR quality assessment.
//!
//! Scores how trustworthy an extracted text looks, from 0 (garbage) to 100
//! (clean). The score only breaks ties between copies of the same document
//! when choosing a canonical; it never rejects anything.
//!
//! # Components
//!
//! | Signal | Weight | Measures |
//! |--------|--------|----------|
//! | printable ratio | 0.20 | share of non-space characters that are letters, digits or punctuation |
//! | dictionary ratio | 0.30 | share of tokens that are common English words, saturating at 50% |
//! | word shape | 0.25 | share of tokens that look like words or numbers |
//! | length sanity | 0.10 | mean token length within 3..=8 |
//! | noise density | 0.15 | stray single letters, punctuation-only tokens, letter/digit hybrids |

use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;

const PRINTABLE_WEIGHT: f64 = 0.20;
const DICTIONARY_WEIGHT: f64 = 0.30;
const SHAPE_WEIGHT: f64 = 0.25;
const LENGTH_WEIGHT: f64 = 0.10;
const NOISE_WEIGHT: f64 = 0.15;

/// Dictionary coverage at which the dictionary signal saturates.
const DICTIONARY_SATURATION: f64 = 0.5;

/// Noise density at which the noise signal bottoms out (25%).
const NOISE_SCALE: f64 = 4.0;

/// Longest alphabetic run still considered a plausible word.
const MAX_WORD_LEN: usize = 20;

/// Characters stripped from both ends of a token before classification.
const TOKEN_TRIM: &[char] = &[
    '"', '\'', '(', ')', '[', ']', '{', '}', '<', '>', '.', ',', ';', ':', '!', '?', '-', '–',
    '—', '*', '_', '`',
];

/// Non-ASCII punctuation that typesetting and OCR legitimately produce.
const TYPOGRAPHIC_PUNCTUATION: &[char] = &[
    '‘', '’', '“', '”', '«', '»', '–', '—', '…', '•', '·', '§', '¶',
];

static COMMON_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    include_str!("common_words.txt")
        .split_whitespace()
        .collect()
});

/// Per-signal breakdown of a quality score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityReport {
    /// Share of printable characters.
    pub printable_ratio: f64,
    /// Share of dictionary words.
    pub dictionary_ratio: f64,
    /// Share of word-shaped tokens.
    pub word_shape_ratio: f64,
    /// Mean token length.
    pub mean_token_length: f64,
    /// Share of noise tokens.
    pub noise_ratio: f64,
    /// Final 0-100 score.
    pub score: u8,
}

impl QualityReport {
    const fn empty() -> Self {
        Self {
            printable_ratio: 0.0,
            dictionary_ratio: 0.0,
            word_shape_ratio: 0.0,
            mean_token_length: 0.0,
            noise_ratio: 0.0,
            score: 0,
        }
    }
}

/// Heuristic OCR quality scorer.
///
/// # Example
///
/// ```rust
/// use docanon::QualityAssessor;
///
/// let assessor = QualityAssessor::new();
/// let clean = assessor.assess("The review team will convene each morning in the main office.");
/// let garbled = assessor.assess("Th3 r|v ~ w t3am w1ll c0nv ¦ l ea h m0rn ng");
/// assert!(clean > garbled);
/// assert_eq!(assessor.assess(""), 0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityAssessor;

impl QualityAssessor {
    /// Creates an assessor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Scores raw text from 0 to 100.
    #[must_use]
    pub fn assess(&self, raw_text: &str) -> u8 {
        self.report(raw_text).score
    }

    /// Scores raw text and returns every signal.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn report(&self, raw_text: &str) -> QualityReport {
        let mut visible = 0usize;
        let mut printable = 0usize;
        for c in raw_text.chars().filter(|c| !c.is_whitespace()) {
            visible += 1;
            if is_printable(c) {
                printable += 1;
            }
        }
        if visible == 0 {
            return QualityReport::empty();
        }

        let tokens: Vec<(&str, &str)> = raw_text
            .split_whitespace()
            .map(|raw| (raw, raw.trim_matches(TOKEN_TRIM)))
            .collect();
        let total = tokens.len() as f64;

        let dictionary = tokens
            .iter()
            .filter(|(_, word)| COMMON_WORDS.contains(word.to_lowercase().as_str()))
            .count();
        let shaped = tokens
            .iter()
            .filter(|(_, word)| !word.is_empty() && is_word_like(word))
            .count();
        let noise = tokens
            .iter()
            .filter(|(raw, word)| is_noise(raw, word))
            .count();
        let lengths: Vec<usize> = tokens
            .iter()
            .map(|(_, word)| word.chars().count())
            .filter(|&len| len > 0)
            .collect();
        let mean_len = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
        };

        let printable_ratio = printable as f64 / visible as f64;
        let dictionary_ratio = dictionary as f64 / total;
        let word_shape_ratio = shaped as f64 / total;
        let noise_ratio = noise as f64 / total;

        let raw_score = 100.0
            * (PRINTABLE_WEIGHT * printable_ratio
                + DICTIONARY_WEIGHT * (dictionary_ratio / DICTIONARY_SATURATION).min(1.0)
                + SHAPE_WEIGHT * word_shape_ratio
                + LENGTH_WEIGHT * length_sanity(mean_len)
                + NOISE_WEIGHT * (1.0 - (noise_ratio * NOISE_SCALE).min(1.0)));

        QualityReport {
            printable_ratio,
            dictionary_ratio,
            word_shape_ratio,
            mean_token_length: mean_len,
            noise_ratio,
            score: clamp_score(raw_score),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_score(raw: f64) -> u8 {
    raw.round().clamp(0.0, 100.0) as u8
}

fn length_sanity(mean: f64) -> f64 {
    if (3.0..=8.0).contains(&mean) {
        1.0
    } else {
        let distance = (mean - 3.0).abs().min((mean - 8.0).abs());
        (1.0 - distance / 4.0).max(0.0)
    }
}

fn is_printable(c: char) -> bool {
    if c.is_control() || c == char::REPLACEMENT_CHARACTER {
        return false;
    }
    c.is_alphanumeric() || c.is_ascii() || TYPOGRAPHIC_PUNCTUATION.contains(&c)
}

fn is_numeric_token(word: &str) -> bool {
    let digits: Vec<char> = word
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | '/' | '-'))
        .collect();
    !digits.is_empty() && digits.iter().all(char::is_ascii_digit)
}

fn is_word_like(word: &str) -> bool {
    if is_numeric_token(word) {
        return true;
    }
    let core: Vec<char> = word.chars().filter(|c| !matches!(c, '\'' | '-')).collect();
    if core.is_empty() || core.len() > MAX_WORD_LEN || !core.iter().all(|c| c.is_alphabetic()) {
        return false;
    }
    if core.len() == 1 {
        return is_word_letter(core[0]);
    }
    let has_vowel = core
        .iter()
        .flat_map(|c| c.to_lowercase())
        .any(|c| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y'));
    let tripled = core.windows(3).any(|w| w[0] == w[1] && w[1] == w[2]);
    has_vowel && !tripled
}

fn is_noise(raw: &str, word: &str) -> bool {
    if !raw.chars().any(char::is_alphanumeric) {
        return true;
    }
    let mut chars = word.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_alphabetic() && !is_word_letter(c) {
            return true;
        }
    }
    word.chars().any(char::is_alphabetic) && word.chars().any(|c| c.is_ascii_digit())
}

fn is_word_letter(c: char) -> bool {
    matches!(c, 'a' | 'A' | 'i' | 'I')
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const CLEAN: &str = "The review team will convene each morning at eight o'clock in the \
        main conference room. Documents requested by the review team must be delivered in \
        sealed envelopes and logged by the records custodian before the close of business.";

    #[test]
    fn test_empty_scores_zero() {
        let assessor = QualityAssessor::new();
        assert_eq!(assessor.assess(""), 0);
        assert_eq!(assessor.assess(" \n\t"), 0);
    }

    #[test]
    fn test_clean_prose_scores_high() {
        let score = QualityAssessor::new().assess(CLEAN);
        assert!(score >= 90, "clean prose scored {score}");
    }

    #[test]
    fn test_noise_lowers_score() {
        let assessor = QualityAssessor::new();
        let noisy = "Th3 rev1ew t ~ eam w|ll c0nvene ¦ each m0rn1ng » at e1ght l in th€ \
            ma1n c0nf ~ erence r00m . D0cuments « req ¦ uested";
        let clean = assessor.assess(CLEAN);
        let degraded = assessor.assess(noisy);
        assert!(clean > degraded + 20, "clean {clean} vs degraded {degraded}");
    }

    #[test]
    fn test_control_and_replacement_chars_unprintable() {
        assert!(!is_printable('\u{0007}'));
        assert!(!is_printable('\u{FFFD}'));
        assert!(is_printable('»'));
        assert!(is_printable('é'));
        assert!(!is_printable('¦'));
    }

    #[test_case("report", true ; "dictionary word")]
    #[test_case("custodian", true ; "long word")]
    #[test_case("o'clock", true ; "apostrophe")]
    #[test_case("2019", true ; "year")]
    #[test_case("3/4/19", true ; "date")]
    #[test_case("a", true ; "article")]
    #[test_case("x", false ; "stray letter")]
    #[test_case("rnrnrn", false ; "no vowel")]
    #[test_case("booook", false ; "tripled letter")]
    #[test_case("m0rn1ng", false ; "digit substitution")]
    fn test_word_like(word: &str, expected: bool) {
        assert_eq!(is_word_like(word), expected);
    }

    #[test_case("|", "" , true ; "punctuation only")]
    #[test_case("l", "l", true ; "stray letter")]
    #[test_case("I", "I", false ; "pronoun")]
    #[test_case("t3am", "t3am", true ; "hybrid")]
    #[test_case("memo,", "memo", false ; "word with comma")]
    fn test_noise(raw: &str, word: &str, expected: bool) {
        assert_eq!(is_noise(raw, word), expected);
    }

    #[test_case(5.0, 1.0 ; "inside range")]
    #[test_case(3.0, 1.0 ; "lower bound")]
    #[test_case(10.0, 0.5 ; "too long")]
    #[test_case(1.0, 0.5 ; "too short")]
    #[test_case(20.0, 0.0 ; "far off")]
    fn test_length_sanity(mean: f64, expected: f64) {
        assert!((length_sanity(mean) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_report_fields_in_range() {
        let report = QualityAssessor::new().report(CLEAN);
        for ratio in [
            report.printable_ratio,
            report.dictionary_ratio,
            report.word_shape_ratio,
            report.noise_ratio,
        ] {
            assert!((0.0..=1.0).contains(&ratio));
        }
        assert!(report.score <= 100);
    }

    #[test]
    fn test_dictionary_loaded() {
        assert!(COMMON_WORDS.contains("the"));
        assert!(COMMON_WORDS.contains("memorandum"));
    }
}
