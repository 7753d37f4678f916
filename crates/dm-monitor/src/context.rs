//! Watch contexts: one per active directory watch.
//!
//! A [`WatchContext`] is shared through `Arc`. The strong count is the
//! reference count:
//!
//! | holder | acquired | released |
//! |--------|----------|----------|
//! | creator | [`WatchContext::new`] | creator drops it |
//! | session active-watch set | after a successful start | `unregister` / teardown |
//! | pool worker | registration | `close` unregisters and joins |
//! | pending notification | enqueue | dispatcher processed the message |
//!
//! The context cannot be freed while the session or the pool worker holds
//! it, and everything a worker touches lives inside it.
//!
//! # Locking
//!
//! Configuration is immutable and read without locks. The handle, signal,
//! scratch buffer, registration and session back-link sit behind one
//! `parking_lot::Mutex`, taken before the directory journal and the
//! completion signal, never after.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use dm_core::{ChangeFilter, MonitorConfig, WatchHandle};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::completion::{CompletionSignal, WaitRegistration, register_wait};
use crate::directory::DirectoryHandle;
use crate::engine;
use crate::error::WatchError;
use crate::events::PendingNotification;
use crate::pattern::{MAX_PATTERNS, PatternSet};

/// Mutable per-watch state, guarded by the context's lock.
#[derive(Debug, Default)]
pub(crate) struct ContextState {
    /// The open directory. `None` before start and after close.
    pub(crate) directory: Option<DirectoryHandle>,

    /// Auto-reset signal the directory sets when a read finishes.
    pub(crate) signal: Option<Arc<CompletionSignal>>,

    /// The scratch buffer while no read is in flight.
    pub(crate) buffer: Option<Vec<u8>>,

    /// A read has been issued and its completion not yet consumed.
    pub(crate) read_outstanding: bool,

    /// Present while a pool worker waits on `signal`.
    pub(crate) registration: Option<WaitRegistration>,

    /// Back-link to the session's notification channel.
    pub(crate) notifier: Option<UnboundedSender<PendingNotification>>,
}

/// Read instrumentation counters.
#[derive(Debug, Default)]
pub(crate) struct ReadCounters {
    issued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    outstanding: AtomicU64,
    max_outstanding: AtomicU64,
}

impl ReadCounters {
    pub(crate) fn on_issue(&self) {
        self.issued.fetch_add(1, Ordering::Relaxed);
        let now = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_outstanding.fetch_max(now, Ordering::AcqRel);
    }

    /// A read finished, successfully or not, or was never accepted.
    pub(crate) fn on_finish(&self, ok: bool) {
        if ok {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    fn snapshot(&self) -> ReadStats {
        ReadStats {
            issued: self.issued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Acquire),
            max_outstanding: self.max_outstanding.load(Ordering::Acquire),
        }
    }
}

/// A point-in-time copy of a watch's read counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReadStats {
    /// Reads handed to the directory handle.
    pub issued: u64,
    /// Reads that completed with data (possibly zero bytes).
    pub completed: u64,
    /// Reads that failed, were aborted, or were refused.
    pub failed: u64,
    /// Reads currently in flight. Never more than one.
    pub outstanding: u64,
    /// Highest value `outstanding` ever reached.
    pub max_outstanding: u64,
}

/// One active directory watch.
pub struct WatchContext {
    handle: WatchHandle,
    path: Utf8PathBuf,
    include_subtree: bool,
    filter: ChangeFilter,
    patterns: PatternSet,
    buffer_size: usize,
    max_pending_changes: usize,
    close_wait: Duration,

    closed: AtomicBool,
    pub(crate) state: Mutex<ContextState>,
    pub(crate) counters: ReadCounters,
}

impl fmt::Debug for WatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchContext")
            .field("handle", &self.handle)
            .field("path", &self.path)
            .field("include_subtree", &self.include_subtree)
            .field("filter", &self.filter)
            .field("patterns", &self.patterns.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl WatchContext {
    /// Creates an unstarted watch. No OS resources are acquired.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_PATTERNS`] patterns are supplied.
    #[must_use]
    pub fn new(
        path: impl Into<Utf8PathBuf>,
        include_subtree: bool,
        filter: ChangeFilter,
        patterns: PatternSet,
        config: &MonitorConfig,
    ) -> Arc<Self> {
        assert!(
            patterns.len() <= MAX_PATTERNS,
            "a watch takes at most {MAX_PATTERNS} patterns, got {}",
            patterns.len()
        );

        Arc::new(Self {
            handle: WatchHandle::allocate(),
            path: path.into(),
            include_subtree,
            filter,
            patterns,
            buffer_size: config.buffer_size,
            max_pending_changes: config.max_pending_changes,
            close_wait: Duration::from_millis(config.close_wait_ms),
            closed: AtomicBool::new(false),
            state: Mutex::new(ContextState::default()),
            counters: ReadCounters::default(),
        })
    }

    /// Returns the watch's handle.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> WatchHandle {
        self.handle
    }

    /// Returns the path as registered.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns `true` if changes below the root's children are reported.
    #[inline]
    #[must_use]
    pub fn include_subtree(&self) -> bool {
        self.include_subtree
    }

    /// Returns the change-class mask.
    #[inline]
    #[must_use]
    pub fn filter(&self) -> ChangeFilter {
        self.filter
    }

    /// Returns the include/exclude patterns.
    #[inline]
    #[must_use]
    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// Returns `true` once the watch has begun closing.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the read counters.
    #[must_use]
    pub fn read_stats(&self) -> ReadStats {
        self.counters.snapshot()
    }

    pub(crate) fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub(crate) fn close_wait(&self) -> Duration {
        self.close_wait
    }

    /// Marks the context closed. Returns `false` if it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Opens the directory, issues the first read, links the context to
    /// `notifier` and registers the completion callback with the pool.
    ///
    /// On error the caller must [`close`](Self::close) the context.
    pub(crate) fn start(
        self: &Arc<Self>,
        notifier: UnboundedSender<PendingNotification>,
    ) -> Result<(), WatchError> {
        let mut state = self.state.lock();

        let directory = DirectoryHandle::open(self.handle, &self.path, self.max_pending_changes)?;
        tracing::info!(
            handle = %self.handle,
            path = %directory.root(),
            include_subtree = self.include_subtree,
            filter = ?self.filter,
            patterns = self.patterns.len(),
            "Starting watch"
        );
        state.directory = Some(directory);

        let signal = Arc::new(CompletionSignal::new());
        state.signal = Some(Arc::clone(&signal));

        engine::initiate_read(self, &mut state)?;

        state.notifier = Some(notifier);

        let worker = Arc::clone(self);
        let registration = register_wait(format!("dirmon-{}", self.handle), signal, move || {
            engine::on_read_complete(&worker);
        })?;
        state.registration = Some(registration);

        Ok(())
    }
}

impl Drop for WatchContext {
    fn drop(&mut self) {
        // Never-started and already-closed contexts have nothing to release.
        let state = self.state.get_mut();
        if state.directory.is_some() || state.registration.is_some() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(patterns: PatternSet) -> Arc<WatchContext> {
        WatchContext::new(
            "/tmp/unused",
            true,
            ChangeFilter::default(),
            patterns,
            &MonitorConfig::default(),
        )
    }

    #[test]
    fn test_new_context_is_idle() {
        let ctx = context(PatternSet::unfiltered());
        assert_eq!(Arc::strong_count(&ctx), 1);
        assert!(!ctx.is_closed());
        assert_eq!(ctx.read_stats(), ReadStats::default());

        let state = ctx.state.lock();
        assert!(state.directory.is_none());
        assert!(state.signal.is_none());
        assert!(state.buffer.is_none());
        assert!(state.registration.is_none());
        assert!(state.notifier.is_none());
        assert!(!state.read_outstanding);
    }

    #[test]
    fn test_handles_are_distinct() {
        let a = context(PatternSet::unfiltered());
        let b = context(PatternSet::unfiltered());
        assert_ne!(a.handle(), b.handle());
    }

    #[test]
    fn test_accepts_max_patterns() {
        let patterns: Vec<String> = (0..MAX_PATTERNS).map(|i| format!("*.e{i}")).collect();
        let ctx = context(PatternSet::new(&patterns).unwrap());
        assert_eq!(ctx.patterns().len(), MAX_PATTERNS);
    }

    #[test]
    #[should_panic(expected = "at most 64 patterns")]
    fn test_rejects_too_many_patterns() {
        let patterns: Vec<String> = (0..=MAX_PATTERNS).map(|i| format!("*.e{i}")).collect();
        let _ = context(PatternSet::new(&patterns).unwrap());
    }

    #[test]
    fn test_counters_track_max_outstanding() {
        let counters = ReadCounters::default();
        counters.on_issue();
        counters.on_finish(true);
        counters.on_issue();
        counters.on_finish(false);
        let stats = counters.snapshot();
        assert_eq!(stats.issued, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.max_outstanding, 1);
    }

    #[test]
    fn test_start_fails_for_missing_path() {
        let ctx = context(PatternSet::unfiltered());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let err = ctx.start(tx).unwrap_err();
        assert!(matches!(err, WatchError::PathNotFound(_)));
        ctx.close();
        assert!(ctx.is_closed());
        assert_eq!(Arc::strong_count(&ctx), 1);
    }
}
