//! Domain types shared by the monitor engine and its hosts.
//!
//! - [`handle`] - the watch identifier
//! - [`action`] - the kind of change reported for a path
//! - [`change_filter`] - the mask of change classes requested from the OS
//!
//! All public types are re-exported here and at the crate root:
//!
//! ```
//! use dm_core::{ChangeAction, ChangeFilter, WatchHandle};
//! ```

mod action;
mod change_filter;
mod handle;

pub use action::ChangeAction;
pub use change_filter::ChangeFilter;
pub use handle::WatchHandle;
