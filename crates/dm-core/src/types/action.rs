//! Change action types.
//!
//! This module provides the [`ChangeAction`] enum, the kind of change a
//! decoded change record reports for a path.

use serde::{Deserialize, Serialize};

/// The kind of change reported for a single path.
///
/// The numeric codes are the ones stored in the action field of a raw change
/// record. Codes outside the known range decode to [`Unknown`](Self::Unknown)
/// rather than failing.
///
/// # Examples
///
/// ```
/// use dm_core::ChangeAction;
///
/// assert_eq!(ChangeAction::from_code(1), ChangeAction::Added);
/// assert_eq!(ChangeAction::from_code(77), ChangeAction::Unknown);
/// assert_eq!(ChangeAction::RenamedTo.label(), "renamed_to");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// A file or directory was created.
    Added,

    /// A file or directory was deleted.
    Removed,

    /// A file or directory's content or attributes changed.
    Modified,

    /// The old name of a renamed entry.
    RenamedFrom,

    /// The new name of a renamed entry.
    RenamedTo,

    /// The record carried an action code this crate does not recognize.
    Unknown,
}

impl ChangeAction {
    /// Maps a raw record action code to an action.
    #[inline]
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Added,
            2 => Self::Removed,
            3 => Self::Modified,
            4 => Self::RenamedFrom,
            5 => Self::RenamedTo,
            _ => Self::Unknown,
        }
    }

    /// Returns the raw record action code. [`Unknown`](Self::Unknown) maps to 0.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Added => 1,
            Self::Removed => 2,
            Self::Modified => 3,
            Self::RenamedFrom => 4,
            Self::RenamedTo => 5,
            Self::Unknown => 0,
        }
    }

    /// Returns the action name delivered to hosts.
    ///
    /// The names are `'static`, so every change of one kind in a decoded
    /// batch shares the same string.
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::RenamedFrom => "renamed_from",
            Self::RenamedTo => "renamed_to",
            Self::Unknown => "unknown",
        }
    }

    /// Returns `true` for either half of a rename.
    #[inline]
    #[must_use]
    pub const fn is_rename(self) -> bool {
        matches!(self, Self::RenamedFrom | Self::RenamedTo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_map_both_ways() {
        for action in [
            ChangeAction::Added,
            ChangeAction::Removed,
            ChangeAction::Modified,
            ChangeAction::RenamedFrom,
            ChangeAction::RenamedTo,
        ] {
            assert_eq!(ChangeAction::from_code(action.code()), action);
        }
        assert_eq!(ChangeAction::from_code(0), ChangeAction::Unknown);
        assert_eq!(ChangeAction::from_code(6), ChangeAction::Unknown);
    }

    #[test]
    fn test_is_rename() {
        assert!(ChangeAction::RenamedFrom.is_rename());
        assert!(ChangeAction::RenamedTo.is_rename());
        assert!(!ChangeAction::Modified.is_rename());
    }

    #[test]
    fn test_serialization_matches_label() {
        for action in [ChangeAction::Added, ChangeAction::RenamedFrom, ChangeAction::Unknown] {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.label()));
        }
    }
}
