//! Error types for the dm-core crate.
//!
//! This module provides the [`ConfigError`] type for configuration-related
//! errors that can occur across the workspace.

use camino::Utf8PathBuf;

/// Errors that can occur during configuration loading and validation.
///
/// # Examples
///
/// ```
/// use dm_core::ConfigError;
/// use camino::Utf8PathBuf;
///
/// let error = ConfigError::MissingFile(Utf8PathBuf::from("/etc/dirmon.json"));
/// assert!(error.to_string().contains("/etc/dirmon.json"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {0}")]
    MissingFile(Utf8PathBuf),

    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// An I/O error occurred while reading configuration.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a new [`ConfigError::InvalidOption`] error.
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_display() {
        let error = ConfigError::MissingFile(Utf8PathBuf::from("/missing/dirmon.json"));
        assert!(error.to_string().contains("/missing/dirmon.json"));
    }

    #[test]
    fn test_invalid_option_display() {
        let error = ConfigError::invalid_option("buffer_size", "must be at least 16 bytes");
        let msg = error.to_string();
        assert!(msg.contains("buffer_size"));
        assert!(msg.contains("at least 16"));
    }

    #[test]
    fn test_parse_error_from_serde() {
        let err: ConfigError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(err.to_string().starts_with("failed to parse configuration"));
    }
}
