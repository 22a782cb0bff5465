//! Log output configuration.

use crate::config::LoggingSettings;
use crate::{Error, Result};
use std::path::PathBuf;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses `pretty` or `json` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for any other value.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}' (expected pretty or json)"
            ))),
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive.
    pub filter: String,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from config settings with env overrides.
    ///
    /// The filter comes from `DOCANON_LOG`, then `RUST_LOG`, then the
    /// configured level, then `debug` with `verbose` or `info` without.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let fallback = if verbose { "debug" } else { "info" };
        let filter = env_directive("DOCANON_LOG")
            .or_else(|| env_directive("RUST_LOG"))
            .or_else(|| settings.and_then(|s| s.level.clone()))
            .unwrap_or_else(|| fallback.to_string());
        let format = settings
            .and_then(|s| s.format.as_deref())
            .and_then(|f| LogFormat::parse(f).ok())
            .unwrap_or_default();

        Self {
            format,
            filter,
            file: settings.and_then(|s| s.file.clone()),
        }
    }
}

fn env_directive(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("pretty", LogFormat::Pretty ; "pretty")]
    #[test_case("JSON", LogFormat::Json ; "json uppercase")]
    #[test_case(" text ", LogFormat::Pretty ; "text alias")]
    fn test_parse_format(input: &str, expected: LogFormat) {
        assert_eq!(LogFormat::parse(input).unwrap(), expected);
    }

    #[test]
    fn test_parse_unknown_format() {
        assert!(LogFormat::parse("xml").is_err());
    }

    #[test]
    fn test_settings_applied() {
        let settings = LoggingSettings {
            level: Some("docanon=trace".to_string()),
            format: Some("json".to_string()),
            file: Some(PathBuf::from("/var/log/docanon.log")),
        };
        let config = LoggingConfig::from_settings(Some(&settings), false);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("/var/log/docanon.log")));
        if std::env::var("DOCANON_LOG").is_err() && std::env::var("RUST_LOG").is_err() {
            assert_eq!(config.filter, "docanon=trace");
        }
    }

    #[test]
    fn test_verbose_default() {
        if std::env::var("DOCANON_LOG").is_err() && std::env::var("RUST_LOG").is_err() {
            assert_eq!(LoggingConfig::from_settings(None, true).filter, "debug");
            assert_eq!(LoggingConfig::from_settings(None, false).filter, "info");
        }
    }
}
