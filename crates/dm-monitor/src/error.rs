//! Error types for the dm-monitor crate.
//!
//! [`WatchError`] covers the setup errors surfaced synchronously by
//! [`Session::register`](crate::Session::register) and the lookup errors of
//! [`Session::unregister`](crate::Session::unregister). Failures that happen
//! after a watch is running travel as
//! [`EventPayload::Error`](crate::EventPayload::Error) instead.

use camino::Utf8PathBuf;
use dm_core::WatchHandle;

/// Errors that can occur while setting up or tearing down a watch.
///
/// # Error Recovery Strategy
///
/// - **Invalid pattern** ([`WatchError::InvalidPattern`]): Recoverable - fix
///   the pattern and register again
/// - **Unknown handle** ([`WatchError::UnknownHandle`]): Recoverable - the
///   watch was already closed
/// - Everything else: Fatal for the watch being registered
///
/// # Examples
///
/// ```
/// use dm_monitor::WatchError;
///
/// fn report(err: &WatchError) -> &'static str {
///     if err.is_recoverable() { "warning" } else { "error" }
/// }
///
/// assert_eq!(report(&WatchError::SessionClosed), "error");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The path to watch does not exist.
    #[error("path does not exist: {0}")]
    PathNotFound(Utf8PathBuf),

    /// The path to watch exists but is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(Utf8PathBuf),

    /// A glob pattern failed to compile.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern as supplied, including any `+`/`-` prefix.
        pattern: String,
        /// Why the glob was rejected.
        reason: String,
    },

    /// No active watch has this handle.
    #[error("no active watch with handle {0}")]
    UnknownHandle(WatchHandle),

    /// The session was torn down and accepts no new watches.
    #[error("session has been torn down")]
    SessionClosed,

    /// The OS notification backend failed.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// An I/O error occurred while opening, reading, or spawning.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Creates a new [`WatchError::InvalidPattern`] error.
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the caller can correct the request and carry on.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidPattern { .. } | Self::UnknownHandle(_))
    }

    /// Returns `true` if the watch cannot be established.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the filesystem path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::PathNotFound(path) | Self::NotADirectory(path) => Some(path),
            Self::InvalidPattern { .. }
            | Self::UnknownHandle(_)
            | Self::SessionClosed
            | Self::Notify(_)
            | Self::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_path_not_found() {
        let err = WatchError::path_not_found("/srv/missing");
        assert!(err.is_fatal());
        assert_eq!(err.path().map(|p| p.as_str()), Some("/srv/missing"));
        assert_eq!(err.to_string(), "path does not exist: /srv/missing");
    }

    #[test]
    fn test_not_a_directory() {
        let err = WatchError::NotADirectory(Utf8PathBuf::from("/etc/hosts"));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_invalid_pattern_is_recoverable() {
        let err = WatchError::invalid_pattern("-[abc", "unclosed character class");
        assert!(err.is_recoverable());
        assert!(err.path().is_none());
        assert!(err.to_string().contains("-[abc"));
    }

    #[test]
    fn test_unknown_handle() {
        let err = WatchError::UnknownHandle(WatchHandle::new(5));
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("dirmon#5"));
    }

    #[test]
    fn test_io() {
        let err = WatchError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("I/O error"));
    }
}
