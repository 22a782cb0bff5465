//! Configuration management.
//!
//! Settings are layered, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config`, or `<config dir>/docanon/config.toml`)
//! 3. `DOCANON_*` environment variables
//! 4. Command-line flags (applied by the CLI through the `with_*` builders)
//!
//! ```toml
//! [storage]
//! db_path = "/srv/archive/docanon.db"
//! busy_timeout_ms = 5000
//!
//! [storage.retry]
//! max_attempts = 3
//! base_delay_ms = 50
//!
//! [dedup]
//! similarity_threshold = 0.85
//! promotion_margin = 10
//!
//! [normalize]
//! disabled_passes = ["stray_characters"]
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use crate::models::ArchiveParameters;
use crate::services::deduplication::DeduplicationConfig;
use crate::services::normalize::NormalizerConfig;
use crate::storage::{RetryPolicy, SqliteStoreOptions};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for docanon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocanonConfig {
    /// Where and how the archive is stored.
    pub storage: StorageSettings,
    /// Fingerprinting and resolution parameters.
    pub dedup: DeduplicationConfig,
    /// Normalization pipeline settings.
    pub normalize: NormalizerConfig,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Storage section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Path of the `SQLite` database file.
    pub db_path: PathBuf,
    /// How long to wait on another process's write lock, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Retry policy for contended writes.
    pub retry: RetryPolicy,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when neither `DOCANON_LOG` nor `RUST_LOG` is set.
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Storage section.
    pub storage: Option<ConfigFileStorage>,
    /// Deduplication section.
    pub dedup: Option<DeduplicationConfig>,
    /// Normalization section.
    pub normalize: Option<NormalizerConfig>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

/// Storage section in config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileStorage {
    /// Database path.
    pub db_path: Option<String>,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: Option<u64>,
    /// Retry policy.
    pub retry: Option<RetryPolicy>,
}

impl DocanonConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the text is not a valid config file.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| Error::InvalidInput(format!("invalid config file: {e}")))?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location, or defaults if there
    /// is no config file.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Loads `path` (or the default location), then applies environment
    /// overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns an error if loading fails or the result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default()?,
        }
        .with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(storage) = file.storage {
            if let Some(db_path) = storage.db_path {
                config.storage.db_path = PathBuf::from(db_path);
            }
            if let Some(ms) = storage.busy_timeout_ms {
                config.storage.busy_timeout_ms = ms;
            }
            if let Some(retry) = storage.retry {
                config.storage.retry = retry;
            }
        }
        if let Some(dedup) = file.dedup {
            config.dedup = dedup;
        }
        if let Some(normalize) = file.normalize {
            config.normalize = normalize;
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }

        config
    }

    /// Applies `DOCANON_*` environment variable overrides.
    ///
    /// | Variable | Setting |
    /// |----------|---------|
    /// | `DOCANON_DB` | `storage.db_path` |
    /// | `DOCANON_BUSY_TIMEOUT_MS` | `storage.busy_timeout_ms` |
    /// | `DOCANON_RETRY_ATTEMPTS` | `storage.retry.max_attempts` |
    /// | `DOCANON_RETRY_BASE_DELAY_MS` | `storage.retry.base_delay_ms` |
    /// | `DOCANON_LOG_FORMAT` | `logging.format` |
    /// | `DOCANON_LOG_FILE` | `logging.file` |
    /// | `DOCANON_DEDUP_*` | see [`DeduplicationConfig::with_env_overrides`] |
    /// | `DOCANON_NORMALIZE_*` | see [`NormalizerConfig::with_env_overrides`] |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(path) = env_string("DOCANON_DB") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(ms) = env_string("DOCANON_BUSY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.storage.busy_timeout_ms = ms;
        }
        if let Some(n) = env_string("DOCANON_RETRY_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.storage.retry.max_attempts = n;
        }
        if let Some(ms) = env_string("DOCANON_RETRY_BASE_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.storage.retry.base_delay_ms = ms;
        }
        if let Some(format) = env_string("DOCANON_LOG_FORMAT") {
            self.logging.format = Some(format);
        }
        if let Some(file) = env_string("DOCANON_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
        self.dedup = self.dedup.with_env_overrides();
        self.normalize = self.normalize.with_env_overrides();
        self
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.storage.db_path.as_os_str().is_empty() {
            return Err(Error::InvalidInput("storage.db_path is empty".to_string()));
        }
        if let Some(format) = &self.logging.format {
            crate::observability::LogFormat::parse(format)?;
        }
        self.dedup.validate()?;
        self.normalize.validate()
    }

    /// Fingerprinting parameters implied by the dedup and normalize sections.
    #[must_use]
    pub fn archive_parameters(&self) -> ArchiveParameters {
        ArchiveParameters::from_settings(&self.dedup, &self.normalize)
    }

    /// Store options derived from the storage, dedup and normalize sections.
    #[must_use]
    pub fn store_options(&self) -> SqliteStoreOptions {
        SqliteStoreOptions {
            busy_timeout: Duration::from_millis(self.storage.busy_timeout_ms),
            retry: self.storage.retry,
            parameters: self.archive_parameters(),
        }
    }

    /// Sets the database path.
    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.db_path = path.into();
        self
    }

    /// Replaces the deduplication settings.
    #[must_use]
    pub fn with_dedup(mut self, dedup: DeduplicationConfig) -> Self {
        self.dedup = dedup;
        self
    }

    /// Replaces the normalization settings.
    #[must_use]
    pub fn with_normalize(mut self, normalize: NormalizerConfig) -> Self {
        self.normalize = normalize;
        self
    }

    /// Sets the store retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.storage.retry = retry;
        self
    }
}

/// `<config dir>/docanon/config.toml`, if the platform has a config dir.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("docanon").join("config.toml"))
}

/// `<data dir>/docanon/docanon.db`, or `docanon.db` in the working directory.
#[must_use]
pub fn default_db_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("docanon.db"),
        |dirs| dirs.data_dir().join("docanon").join("docanon.db"),
    )
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
