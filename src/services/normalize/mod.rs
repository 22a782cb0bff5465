//! Text normalization for duplicate detection.
//!
//! Two extractions of the same document rarely agree byte for byte: OCR
//! engines disagree on case, ligatures, punctuation and line breaks, and scans
//! pick up page numbers and specks. The normalizer folds those differences
//! away so that equality and similarity are judged on what the document says.
//!
//! The pipeline is an ordered list of [`NormalizationPass`]es:
//!
//! ```text
//! unicode_fold ─► page_furniture ─► collapse_whitespace ─► smooth_punctuation
//!              ─► stray_characters ─► trim
//! ```
//!
//! `page_furniture` works on lines, so it runs before whitespace is collapsed.

mod config;
mod passes;

pub use config::NormalizerConfig;
pub use passes::{
    CollapseWhitespace, DEFAULT_PAGE_PATTERNS, NormalizationPass, PASS_NAMES, PageFurniture,
    SmoothPunctuation, StrayCharacters, Trim, UnicodeFold,
};

use std::fmt;

/// Deterministic, total text normalizer.
///
/// # Example
///
/// ```rust
/// use docanon::Normalizer;
///
/// let normalizer = Normalizer::default();
/// assert_eq!(
///     normalizer.normalize("MEMO  re:\nTravel\n\nPage 2 of 3\nArrangements"),
///     "memo re travel arrangements"
/// );
/// assert_eq!(normalizer.normalize(" \n\t "), "");
/// ```
pub struct Normalizer {
    passes: Vec<Box<dyn NormalizationPass>>,
}

impl Normalizer {
    /// Builds the pipeline described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for unknown pass names or invalid
    /// page patterns.
    pub fn from_config(config: &NormalizerConfig) -> crate::Result<Self> {
        config.validate()?;

        let mut passes: Vec<Box<dyn NormalizationPass>> = Vec::with_capacity(PASS_NAMES.len());
        if config.is_enabled(UnicodeFold::NAME) {
            passes.push(Box::new(UnicodeFold));
        }
        if config.is_enabled(PageFurniture::NAME) {
            passes.push(Box::new(PageFurniture::with_patterns(&config.page_patterns)?));
        }
        if config.is_enabled(CollapseWhitespace::NAME) {
            passes.push(Box::new(CollapseWhitespace));
        }
        if config.is_enabled(SmoothPunctuation::NAME) {
            passes.push(Box::new(SmoothPunctuation));
        }
        if config.is_enabled(StrayCharacters::NAME) {
            passes.push(Box::new(StrayCharacters::new(
                &config.single_letter_allowlist,
            )));
        }
        if config.is_enabled(Trim::NAME) {
            passes.push(Box::new(Trim));
        }
        Ok(Self { passes })
    }

    /// Builds a normalizer from explicit passes, run in the given order.
    #[must_use]
    pub fn with_passes(passes: Vec<Box<dyn NormalizationPass>>) -> Self {
        Self { passes }
    }

    /// Names of the active passes, in order.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Normalizes raw extracted text.
    ///
    /// Empty or whitespace-only input yields an empty string.
    #[must_use]
    pub fn normalize(&self, raw_text: &str) -> String {
        if raw_text.trim().is_empty() {
            return String::new();
        }
        self.passes
            .iter()
            .fold(raw_text.to_string(), |text, pass| pass.apply(&text))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::with_passes(vec![
            Box::new(UnicodeFold),
            Box::new(PageFurniture::default()),
            Box::new(CollapseWhitespace),
            Box::new(SmoothPunctuation),
            Box::new(StrayCharacters::default()),
            Box::new(Trim),
        ])
    }
}

impl fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Normalizer")
            .field("passes", &self.pass_names())
            .finish()
    }
}
