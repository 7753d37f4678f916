//! Fast hash map type alias.
//!
//! The session's active-watch set is keyed by [`WatchHandle`](crate::WatchHandle),
//! a small integer. SipHash's denial-of-service resistance buys nothing for
//! process-local integer keys, so the workspace uses the Fx hash from
//! `rustc-hash` instead.
//!
//! # Examples
//!
//! ```
//! use dm_core::{FxHashMap, WatchHandle, fx_hash_map};
//!
//! let mut active: FxHashMap<WatchHandle, &str> = fx_hash_map();
//! active.insert(WatchHandle::new(7), "/srv/data");
//! assert_eq!(active.get(&WatchHandle::new(7)), Some(&"/srv/data"));
//! ```

/// A [`HashMap`](std::collections::HashMap) using the Fx hash algorithm.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// Creates a new empty [`FxHashMap`].
#[inline]
#[must_use]
pub fn fx_hash_map<K, V>() -> FxHashMap<K, V> {
    FxHashMap::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WatchHandle;

    #[test]
    fn test_fx_hash_map_keyed_by_handle() {
        let mut map: FxHashMap<WatchHandle, u32> = fx_hash_map();
        map.insert(WatchHandle::new(1), 10);
        map.insert(WatchHandle::new(2), 20);
        assert_eq!(map.get(&WatchHandle::new(1)), Some(&10));
        assert_eq!(map.remove(&WatchHandle::new(2)), Some(20));
        assert!(!map.contains_key(&WatchHandle::new(2)));
    }
}
