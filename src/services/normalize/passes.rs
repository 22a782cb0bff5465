//! Individual normalization passes.

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Names of every built-in pass, in default pipeline order.
pub const PASS_NAMES: [&str; 6] = [
    UnicodeFold::NAME,
    PageFurniture::NAME,
    CollapseWhitespace::NAME,
    SmoothPunctuation::NAME,
    StrayCharacters::NAME,
    Trim::NAME,
];

/// Default page-number line patterns, applied to trimmed lowercase lines.
pub const DEFAULT_PAGE_PATTERNS: [&str; 3] = [
    // "page 3", "pg. 3", "p. 3 of 10", "page 3/10"
    r"^(?:page|pg\.?|p\.)\s*\d{1,4}(?:\s*(?:of|/)\s*\d{1,4})?$",
    // "12", "- 12 -"
    r"^[-\s]*\d{1,4}[-\s]*$",
    // "3 of 10"
    r"^\d{1,4}\s+of\s+\d{1,4}$",
];

static DEFAULT_PAGE_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DEFAULT_PAGE_PATTERNS
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|_| unreachable!()))
        .collect()
});

/// One step of the normalization pipeline.
///
/// Passes are pure: the same input always yields the same output, and no
/// pass may fail.
pub trait NormalizationPass: Send + Sync {
    /// Stable name used in configuration.
    fn name(&self) -> &'static str;

    /// Transforms the text.
    fn apply(&self, text: &str) -> String;
}

/// NFKC normalization followed by lowercasing.
///
/// Folds ligatures, full-width forms and compatibility characters that OCR
/// engines emit inconsistently.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicodeFold;

impl UnicodeFold {
    /// Configuration name.
    pub const NAME: &'static str = "unicode_fold";
}

impl NormalizationPass for UnicodeFold {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, text: &str) -> String {
        text.nfkc().collect::<String>().to_lowercase()
    }
}

/// Drops whole lines that are only page numbering.
#[derive(Debug, Clone)]
pub struct PageFurniture {
    patterns: Vec<Regex>,
}

impl PageFurniture {
    /// Configuration name.
    pub const NAME: &'static str = "page_furniture";

    /// Compiles custom line patterns.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if a pattern is not a valid regex.
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> crate::Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    crate::Error::InvalidInput(format!(
                        "invalid page pattern '{}': {e}",
                        p.as_ref()
                    ))
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    fn is_furniture(&self, line: &str) -> bool {
        let line = line.trim();
        !line.is_empty() && self.patterns.iter().any(|p| p.is_match(line))
    }
}

impl Default for PageFurniture {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_PAGE_REGEXES.clone(),
        }
    }
}

impl NormalizationPass for PageFurniture {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, text: &str) -> String {
        text.lines()
            .filter(|line| !self.is_furniture(line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Collapses every whitespace run, newlines included, to one space.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollapseWhitespace;

impl CollapseWhitespace {
    /// Configuration name.
    pub const NAME: &'static str = "collapse_whitespace";
}

impl NormalizationPass for CollapseWhitespace {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, text: &str) -> String {
        collapse(text)
    }
}

/// Replaces punctuation and symbols with spaces.
///
/// OCR confuses `.`/`,`, drops apostrophes and invents hyphens, so only
/// letters and digits carry identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmoothPunctuation;

impl SmoothPunctuation {
    /// Configuration name.
    pub const NAME: &'static str = "smooth_punctuation";
}

impl NormalizationPass for SmoothPunctuation {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, text: &str) -> String {
        let replaced: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c
                } else {
                    ' '
                }
            })
            .collect();
        collapse(&replaced)
    }
}

/// Drops isolated single letters left behind by specks and scan edges.
///
/// Letters in the allowlist (real one-letter words) and single digits stay.
#[derive(Debug, Clone)]
pub struct StrayCharacters {
    allowlist: Vec<char>,
}

impl StrayCharacters {
    /// Configuration name.
    pub const NAME: &'static str = "stray_characters";

    /// Creates the pass with the given allowed single letters.
    #[must_use]
    pub fn new(allowlist: &str) -> Self {
        Self {
            allowlist: allowlist.chars().flat_map(char::to_lowercase).collect(),
        }
    }

    fn is_stray(&self, token: &str) -> bool {
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => c.is_alphabetic() && !self.allowlist.contains(&c),
            _ => false,
        }
    }
}

impl Default for StrayCharacters {
    fn default() -> Self {
        Self::new("ai")
    }
}

impl NormalizationPass for StrayCharacters {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, text: &str) -> String {
        text.split_whitespace()
            .filter(|token| !self.is_stray(token))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Strips leading and trailing whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct Trim;

impl Trim {
    /// Configuration name.
    pub const NAME: &'static str = "trim";
}

impl NormalizationPass for Trim {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, text: &str) -> String {
        text.trim().to_string()
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_unicode_fold_handles_compatibility_forms() {
        // U+FB01 LATIN SMALL LIGATURE FI, full-width A
        assert_eq!(UnicodeFold.apply("\u{FB01}LE \u{FF21}"), "file a");
        assert_eq!(UnicodeFold.apply("MEMO"), "memo");
    }

    #[test_case("page 3" ; "bare page")]
    #[test_case("page 3 of 10" ; "page of")]
    #[test_case("pg. 12" ; "abbreviated")]
    #[test_case("p. 4/9" ; "slash form")]
    #[test_case("- 12 -" ; "dashed number")]
    #[test_case("17" ; "lone number")]
    #[test_case("3 of 10" ; "n of m")]
    fn test_page_furniture_drops_line(line: &str) {
        let text = format!("first line\n  {line}  \nlast line");
        assert_eq!(PageFurniture::default().apply(&text), "first line\nlast line");
    }

    #[test_case("page three" ; "spelled out")]
    #[test_case("see page 3 for details" ; "inline reference")]
    #[test_case("12345" ; "too long for a page number")]
    fn test_page_furniture_keeps_line(line: &str) {
        let text = format!("a\n{line}\nb");
        assert_eq!(PageFurniture::default().apply(&text), text);
    }

    #[test]
    fn test_page_furniture_custom_patterns() {
        let pass = PageFurniture::with_patterns(&[r"^confidential$"]).unwrap();
        assert_eq!(pass.apply("text\nconfidential\nmore"), "text\nmore");
        assert!(PageFurniture::with_patterns(&["[bad"]).is_err());
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(CollapseWhitespace.apply("a \t\n\n b   c"), "a b c");
    }

    #[test]
    fn test_smooth_punctuation() {
        assert_eq!(
            SmoothPunctuation.apply("re: travel, o'clock -- ok."),
            "re travel o clock ok"
        );
    }

    #[test]
    fn test_stray_characters_respects_allowlist_and_digits() {
        let pass = StrayCharacters::default();
        assert_eq!(pass.apply("a l memo i x 4 report"), "a memo i 4 report");

        let strict = StrayCharacters::new("");
        assert_eq!(strict.apply("a memo i"), "memo");
    }

    #[test]
    fn test_trim() {
        assert_eq!(Trim.apply("  memo  "), "memo");
    }

    #[test]
    fn test_pass_names_unique() {
        let mut names = PASS_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PASS_NAMES.len());
    }
}
