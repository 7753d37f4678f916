//! Event types for change notifications.
//!
//! # Event Flow
//!
//! ```text
//! OS change ──► directory journal ──► scratch buffer (raw records)
//!                                           │  worker thread: decode + filter
//!                                           ▼
//!                                 PendingNotification ──► session channel
//!                                                               │  host thread
//!                                                               ▼
//!                                                   WatchEvent ──► handler
//! ```

use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use dm_core::{ChangeAction, WatchHandle};
use serde::{Deserialize, Serialize};

use crate::context::WatchContext;

/// One `(action, path)` pair decoded from a change buffer.
///
/// `path` is relative to the watch root and uses `/` separators.
///
/// # Examples
///
/// ```
/// use dm_core::ChangeAction;
/// use dm_monitor::DecodedChange;
///
/// let change = DecodedChange::new(ChangeAction::Added, "logs/today.txt");
/// assert_eq!(change.action.label(), "added");
/// assert_eq!(change.path.file_name(), Some("today.txt"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecodedChange {
    /// What happened to the path.
    pub action: ChangeAction,

    /// The affected path, relative to the watch root.
    pub path: Utf8PathBuf,
}

impl DecodedChange {
    /// Creates a change record.
    #[inline]
    #[must_use]
    pub fn new(action: ChangeAction, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            action,
            path: path.into(),
        }
    }
}

/// The status half of the outbound `(handle, status, changes | error)` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// At least one change survived filtering.
    Changes,
    /// Every change was filtered out. Never delivered to handlers.
    NoChanges,
    /// The watch failed and will produce nothing further.
    Error,
}

/// What a notification carries.
#[derive(Debug)]
pub enum EventPayload {
    /// Decoded, filtered changes, in the order the OS reported them.
    Changes(Vec<DecodedChange>),

    /// The read engine stopped with this error. The host is expected to
    /// unregister the watch.
    Error(io::Error),
}

impl EventPayload {
    /// Returns the outbound status for this payload.
    #[must_use]
    pub fn status(&self) -> EventStatus {
        match self {
            Self::Changes(changes) if changes.is_empty() => EventStatus::NoChanges,
            Self::Changes(_) => EventStatus::Changes,
            Self::Error(_) => EventStatus::Error,
        }
    }
}

/// An event delivered to a host handler.
///
/// # Examples
///
/// ```
/// use dm_core::{ChangeAction, WatchHandle};
/// use dm_monitor::{DecodedChange, EventPayload, EventStatus, WatchEvent};
///
/// let event = WatchEvent::new(
///     WatchHandle::new(3),
///     EventPayload::Changes(vec![DecodedChange::new(ChangeAction::Modified, "a.txt")]),
/// );
/// assert_eq!(event.status(), EventStatus::Changes);
/// assert_eq!(event.changes().len(), 1);
/// assert!(event.error().is_none());
/// ```
#[derive(Debug)]
pub struct WatchEvent {
    /// The watch the event belongs to.
    pub handle: WatchHandle,

    /// The changes or the error.
    pub payload: EventPayload,
}

impl WatchEvent {
    /// Creates an event.
    #[inline]
    #[must_use]
    pub const fn new(handle: WatchHandle, payload: EventPayload) -> Self {
        Self { handle, payload }
    }

    /// Returns the outbound status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> EventStatus {
        self.payload.status()
    }

    /// Returns the changes, or an empty slice for an error event.
    #[must_use]
    pub fn changes(&self) -> &[DecodedChange] {
        match &self.payload {
            EventPayload::Changes(changes) => changes,
            EventPayload::Error(_) => &[],
        }
    }

    /// Returns the error, if this is an error event.
    #[must_use]
    pub fn error(&self) -> Option<&io::Error> {
        match &self.payload {
            EventPayload::Error(err) => Some(err),
            EventPayload::Changes(_) => None,
        }
    }

    /// Returns the OS error code of an error event, when the OS supplied one.
    #[must_use]
    pub fn error_code(&self) -> Option<i32> {
        self.error().and_then(io::Error::raw_os_error)
    }

    /// Returns a serializable view of this event.
    #[must_use]
    pub fn record(&self) -> EventRecord<'_> {
        EventRecord {
            handle: self.handle,
            status: self.status(),
            changes: self.changes(),
            error: self.error().map(|err| ErrorRecord {
                kind: format!("{:?}", err.kind()),
                code: err.raw_os_error(),
                message: err.to_string(),
            }),
        }
    }
}

/// Serializable view of a [`WatchEvent`].
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    /// The watch the event belongs to.
    pub handle: WatchHandle,
    /// The outbound status.
    pub status: EventStatus,
    /// The changes; empty for error events.
    pub changes: &'a [DecodedChange],
    /// The error, for error events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

/// Serializable view of an I/O error.
#[derive(Debug, Serialize)]
pub struct ErrorRecord {
    /// The `io::ErrorKind`, debug-formatted.
    pub kind: String,
    /// The raw OS error code, if any.
    pub code: Option<i32>,
    /// The error message.
    pub message: String,
}

/// A message from a worker thread to the host thread.
///
/// Holds a strong reference to its watch so the context outlives every
/// message about it; the reference is released once the host has processed
/// the message.
#[derive(Debug)]
pub(crate) struct PendingNotification {
    pub(crate) context: Arc<WatchContext>,
    pub(crate) payload: EventPayload,
}
