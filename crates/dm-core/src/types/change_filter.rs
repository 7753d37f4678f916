//! The mask of change classes a watch asks the OS to report.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

bitflags! {
    /// Classes of change a watch receives from the OS.
    ///
    /// A change is journaled only if its class intersects the watch's mask.
    /// Serializes as the pipe-separated flag names in human-readable formats.
    ///
    /// # Examples
    ///
    /// ```
    /// use dm_core::ChangeFilter;
    ///
    /// let filter = ChangeFilter::default();
    /// assert!(filter.contains(ChangeFilter::FILE_NAME));
    /// assert!(!filter.contains(ChangeFilter::LAST_ACCESS));
    ///
    /// let parsed = ChangeFilter::from_names(["size", "last-write"]).unwrap();
    /// assert_eq!(parsed, ChangeFilter::SIZE | ChangeFilter::LAST_WRITE);
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ChangeFilter: u32 {
        /// File creation, deletion, and renames.
        const FILE_NAME = 0x0001;
        /// Directory creation, deletion, and renames.
        const DIR_NAME = 0x0002;
        /// Attribute changes.
        const ATTRIBUTES = 0x0004;
        /// File size changes.
        const SIZE = 0x0008;
        /// Last-write time changes (content writes).
        const LAST_WRITE = 0x0010;
        /// Last-access time changes.
        const LAST_ACCESS = 0x0020;
        /// Creation time changes.
        const CREATION = 0x0040;
        /// Permission and ownership changes.
        const SECURITY = 0x0100;
    }
}

impl Default for ChangeFilter {
    fn default() -> Self {
        Self::FILE_NAME | Self::DIR_NAME | Self::LAST_WRITE
    }
}

impl ChangeFilter {
    /// Parses a list of flag names into a mask.
    ///
    /// Names are case-insensitive and may use `-` in place of `_`. An empty
    /// list yields the empty mask.
    pub fn from_names<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Self::empty(), |mask, name| {
            let name = name.as_ref();
            let normalized = name.trim().to_ascii_uppercase().replace('-', "_");
            Self::from_name(&normalized)
                .map(|flag| mask | flag)
                .ok_or_else(|| ConfigError::InvalidOption {
                    option: "filter".to_owned(),
                    reason: format!("unknown change class '{name}'"),
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mask() {
        let filter = ChangeFilter::default();
        assert_eq!(
            filter,
            ChangeFilter::FILE_NAME | ChangeFilter::DIR_NAME | ChangeFilter::LAST_WRITE
        );
    }

    #[test]
    fn test_from_names_accepts_mixed_spelling() {
        let filter = ChangeFilter::from_names(["FILE_NAME", "dir-name", " security "]).unwrap();
        assert_eq!(
            filter,
            ChangeFilter::FILE_NAME | ChangeFilter::DIR_NAME | ChangeFilter::SECURITY
        );
    }

    #[test]
    fn test_from_names_rejects_unknown() {
        let err = ChangeFilter::from_names(["bogus"]).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_serde_round_trip_through_names() {
        let filter = ChangeFilter::SIZE | ChangeFilter::ATTRIBUTES;
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains("SIZE"));
        let back: ChangeFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }
}
