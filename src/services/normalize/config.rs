//! Normalizer configuration.

use super::passes::{DEFAULT_PAGE_PATTERNS, PASS_NAMES};
use serde::{Deserialize, Serialize};

/// Configuration for the text normalizer.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `DOCANON_NORMALIZE_DISABLED_PASSES` | comma list | empty | Pass names to skip |
/// | `DOCANON_NORMALIZE_SINGLE_LETTER_ALLOWLIST` | string | `ai` | Single letters kept by `stray_characters` |
///
/// # Example
///
/// ```rust
/// use docanon::services::normalize::NormalizerConfig;
///
/// let config = NormalizerConfig::default().with_disabled_pass("stray_characters");
/// assert!(config.validate().is_ok());
/// assert!(NormalizerConfig::default().with_disabled_pass("spellcheck").validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Names of passes to skip.
    pub disabled_passes: Vec<String>,

    /// Regexes matched against each trimmed, lowercased line. Matching lines
    /// are dropped as page furniture.
    pub page_patterns: Vec<String>,

    /// Single letters that survive the `stray_characters` pass.
    pub single_letter_allowlist: String,
}

impl NormalizerConfig {
    /// Applies `DOCANON_NORMALIZE_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("DOCANON_NORMALIZE_DISABLED_PASSES") {
            self.disabled_passes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(v) = std::env::var("DOCANON_NORMALIZE_SINGLE_LETTER_ALLOWLIST") {
            self.single_letter_allowlist = v;
        }
        self
    }

    /// Checks pass names and page patterns.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for an unknown pass name or a
    /// page pattern that is not a valid regex.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(unknown) = self
            .disabled_passes
            .iter()
            .find(|name| !PASS_NAMES.contains(&name.as_str()))
        {
            return Err(crate::Error::InvalidInput(format!(
                "unknown normalization pass '{unknown}' (known: {})",
                PASS_NAMES.join(", ")
            )));
        }
        for pattern in &self.page_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                crate::Error::InvalidInput(format!("invalid page pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }

    /// Returns true if the named pass runs.
    #[must_use]
    pub fn is_enabled(&self, pass: &str) -> bool {
        !self.disabled_passes.iter().any(|p| p == pass)
    }

    /// Builder method to disable a pass.
    #[must_use]
    pub fn with_disabled_pass(mut self, pass: impl Into<String>) -> Self {
        self.disabled_passes.push(pass.into());
        self
    }

    /// Builder method to replace the page patterns.
    #[must_use]
    pub fn with_page_patterns(mut self, patterns: Vec<String>) -> Self {
        self.page_patterns = patterns;
        self
    }

    /// Builder method to set the single-letter allowlist.
    #[must_use]
    pub fn with_single_letter_allowlist(mut self, letters: impl Into<String>) -> Self {
        self.single_letter_allowlist = letters.into();
        self
    }
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            disabled_passes: Vec::new(),
            page_patterns: DEFAULT_PAGE_PATTERNS.iter().map(|p| (*p).to_string()).collect(),
            single_letter_allowlist: "ai".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NormalizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_patterns.len(), DEFAULT_PAGE_PATTERNS.len());
        assert!(config.is_enabled("page_furniture"));
    }

    #[test]
    fn test_unknown_pass_rejected() {
        let config = NormalizerConfig::default().with_disabled_pass("stemming");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stemming"));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let config = NormalizerConfig::default().with_page_patterns(vec!["(unclosed".to_string()]);
        assert!(matches!(
            config.validate(),
            Err(crate::Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_disable_pass() {
        let config = NormalizerConfig::default().with_disabled_pass("trim");
        assert!(!config.is_enabled("trim"));
        assert!(config.is_enabled("unicode_fold"));
    }
}
