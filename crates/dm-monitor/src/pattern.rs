//! Include/exclude glob matching for changed paths.
//!
//! A watch may carry an ordered list of patterns. Each changed path is tested
//! against them before it is placed in a notification:
//!
//! - A pattern prefixed with `-` excludes the paths it matches.
//! - A pattern prefixed with `+`, or with no prefix, includes them.
//! - The first pattern in configured order that matches decides.
//! - With patterns configured, a path that matches none is dropped.
//! - With no patterns configured, every path is reported.
//!
//! Globs are matched case-insensitively against the full relative path, and
//! `*` also matches `/`, so `*.txt` catches `a/b/c.txt`.
//!
//! # Examples
//!
//! ```
//! use dm_monitor::{MatchOutcome, PatternSet, match_path};
//!
//! assert_eq!(match_path("a/b.txt", "*.txt").unwrap(), MatchOutcome::Include);
//! assert_eq!(match_path("a/b.log", "-*.log").unwrap(), MatchOutcome::Exclude);
//! assert_eq!(match_path("a/b.log", "*.txt").unwrap(), MatchOutcome::NoMatch);
//!
//! let set = PatternSet::new(["-*.tmp", "*"]).unwrap();
//! assert!(set.should_process("notes.md"));
//! assert!(!set.should_process("cache/x.TMP"));
//! ```

use globset::{GlobBuilder, GlobMatcher};
use smallvec::SmallVec;

use crate::error::WatchError;

/// Most patterns one watch may carry.
pub const MAX_PATTERNS: usize = 64;

/// Whether a pattern admits or rejects the paths it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    /// `+glob` or a bare `glob`.
    Include,
    /// `-glob`.
    Exclude,
}

/// The result of testing one path against one pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOutcome {
    /// The glob did not match.
    NoMatch,
    /// The glob matched an inclusion pattern.
    Include,
    /// The glob matched an exclusion pattern.
    Exclude,
}

/// One compiled include or exclude pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    kind: PatternKind,
    source: String,
    matcher: GlobMatcher,
}

impl Pattern {
    /// Parses a pattern, splitting off its `+`/`-` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidPattern`] if the glob does not compile.
    pub fn parse(pattern: &str) -> Result<Self, WatchError> {
        let (kind, glob) = match pattern.as_bytes().first() {
            Some(b'-') => (PatternKind::Exclude, &pattern[1..]),
            Some(b'+') => (PatternKind::Include, &pattern[1..]),
            _ => (PatternKind::Include, pattern),
        };

        let matcher = GlobBuilder::new(glob)
            .case_insensitive(true)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| WatchError::invalid_pattern(pattern, e.kind()))?
            .compile_matcher();

        Ok(Self {
            kind,
            source: pattern.to_owned(),
            matcher,
        })
    }

    /// Returns whether this pattern includes or excludes.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Returns the pattern as supplied, prefix included.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Tests a relative path against this pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> MatchOutcome {
        if !self.matcher.is_match(path) {
            return MatchOutcome::NoMatch;
        }
        match self.kind {
            PatternKind::Include => MatchOutcome::Include,
            PatternKind::Exclude => MatchOutcome::Exclude,
        }
    }
}

/// Tests `path` against a single uncompiled pattern.
///
/// # Errors
///
/// Returns [`WatchError::InvalidPattern`] if the glob does not compile.
pub fn match_path(path: &str, pattern: &str) -> Result<MatchOutcome, WatchError> {
    Ok(Pattern::parse(pattern)?.matches(path))
}

/// The ordered patterns of one watch.
///
/// Immutable once built; shared by the worker thread that filters decoded
/// changes without any locking.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: SmallVec<[Pattern; 4]>,
}

impl PatternSet {
    /// Compiles patterns, preserving their order.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidPattern`] for the first pattern that does
    /// not compile.
    pub fn new<I, S>(patterns: I) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Pattern::parse(p.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    /// A set with no patterns; every path is reported.
    #[must_use]
    pub fn unfiltered() -> Self {
        Self::default()
    }

    /// Returns the number of patterns.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Returns `true` if no patterns are configured.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Iterates the patterns in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    /// Returns the outcome decided by the first matching pattern.
    ///
    /// An empty set yields [`MatchOutcome::Include`].
    #[must_use]
    pub fn classify(&self, path: &str) -> MatchOutcome {
        if self.patterns.is_empty() {
            return MatchOutcome::Include;
        }
        self.patterns
            .iter()
            .map(|p| p.matches(path))
            .find(|outcome| *outcome != MatchOutcome::NoMatch)
            .unwrap_or(MatchOutcome::NoMatch)
    }

    /// Returns `true` if a change to `path` should be reported.
    #[inline]
    #[must_use]
    pub fn should_process(&self, path: &str) -> bool {
        self.classify(path) == MatchOutcome::Include
    }
}
