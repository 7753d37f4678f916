//! The identifier of an active directory watch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Source of fresh handle values. Zero is never handed out.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// An opaque identifier for one directory watch.
///
/// The value is the one carried by the watch's directory handle, and it is
/// reused as the external identifier hosts pass back to `unregister`. Values
/// are unique for the lifetime of the process.
///
/// # Examples
///
/// ```
/// use dm_core::WatchHandle;
///
/// let a = WatchHandle::allocate();
/// let b = WatchHandle::allocate();
/// assert_ne!(a, b);
/// assert_eq!(WatchHandle::new(42).as_u64(), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchHandle(u64);

impl WatchHandle {
    /// Wraps a raw handle value, e.g. one received back from a host.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocates a handle value never returned before in this process.
    #[must_use]
    pub fn allocate() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw handle value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for WatchHandle {
    #[inline]
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<WatchHandle> for u64 {
    #[inline]
    fn from(handle: WatchHandle) -> Self {
        handle.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dirmon#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_is_unique_and_nonzero() {
        let handles: Vec<_> = (0..64).map(|_| WatchHandle::allocate()).collect();
        let mut raw: Vec<u64> = handles.iter().map(|h| h.as_u64()).collect();
        raw.sort_unstable();
        raw.dedup();
        assert_eq!(raw.len(), 64);
        assert!(raw.iter().all(|&v| v != 0));
    }

    #[test]
    fn test_display() {
        assert_eq!(WatchHandle::new(9).to_string(), "dirmon#9");
    }

    #[test]
    fn test_serializes_as_number() {
        let json = serde_json::to_string(&WatchHandle::new(12)).unwrap();
        assert_eq!(json, "12");
        let back: WatchHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WatchHandle::new(12));
    }
}
