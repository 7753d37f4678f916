//! Configuration structures for dirmon.
//!
//! - [`MonitorConfig`] - per-session engine tunables (buffer size, journal
//!   capacity, shutdown wait) and default watch settings
//! - [`CliConfig`] - how the command-line host renders events
//! - [`Config`] - root configuration combining both
//!
//! All configuration types implement [`Default`] and deserialize with
//! missing fields filled from those defaults, so a configuration file only
//! needs to name what it changes.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::ChangeFilter;

/// Smallest scratch buffer able to hold one record with a one-character name.
pub const MIN_BUFFER_SIZE: usize = 16;

/// Largest scratch buffer a watch may request.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Output format for delivered events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum OutputFormat {
    /// One human-readable line per change.
    #[default]
    Text,
    /// One JSON object per delivered event.
    Json,
}

/// Tunables for the monitor engine.
///
/// # Examples
///
/// ```
/// use dm_core::MonitorConfig;
///
/// let config = MonitorConfig::default();
/// assert_eq!(config.buffer_size, 16 * 1024);
/// assert!(config.include_subtree);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Size in bytes of each watch's scratch read buffer.
    ///
    /// Changes that do not fit in one read stay journaled for the next.
    pub buffer_size: usize,

    /// Journaled changes a watch may accumulate before it overflows.
    ///
    /// On overflow the journal is discarded and the next read completes with
    /// zero bytes.
    pub max_pending_changes: usize,

    /// Upper bound in milliseconds on how long closing a watch waits for an
    /// aborted read to signal completion.
    pub close_wait_ms: u64,

    /// Default include-subtree flag for watches that do not specify one.
    pub include_subtree: bool,

    /// Default change-class mask for watches that do not specify one.
    pub filter: ChangeFilter,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            max_pending_changes: 4096,
            close_wait_ms: 1000,
            include_subtree: true,
            filter: ChangeFilter::default(),
        }
    }
}

impl MonitorConfig {
    /// Checks that every tunable is within its supported range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::invalid_option(
                "buffer_size",
                format!("must be at least {MIN_BUFFER_SIZE} bytes"),
            ));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::invalid_option(
                "buffer_size",
                format!("must be at most {MAX_BUFFER_SIZE} bytes"),
            ));
        }
        if self.max_pending_changes == 0 {
            return Err(ConfigError::invalid_option(
                "max_pending_changes",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Settings for the command-line host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// How delivered events are printed.
    pub format: OutputFormat,

    /// Stop after this many delivered events. `None` runs until interrupted.
    pub max_events: Option<u64>,
}

/// Root configuration for dirmon.
///
/// # Examples
///
/// ```
/// use dm_core::Config;
///
/// let config: Config = serde_json::from_str(r#"{"monitor": {"buffer_size": 4096}}"#).unwrap();
/// assert_eq!(config.monitor.buffer_size, 4096);
/// assert_eq!(config.monitor.max_pending_changes, 4096);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Monitor engine configuration.
    pub monitor: MonitorConfig,

    /// Command-line host configuration.
    pub cli: CliConfig,
}

impl Config {
    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingFile`] if `path` does not exist,
    /// [`ConfigError::Parse`] for malformed JSON, and
    /// [`ConfigError::InvalidOption`] for out-of-range values.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingFile(path.to_owned()));
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.monitor.validate()
    }
}
