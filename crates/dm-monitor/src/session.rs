//! The host-side session: the set of active watches and their channel.
//!
//! A [`Session`] belongs to the single host thread. Every method takes
//! `&mut self` or `&self` on that thread; workers only ever see the sending
//! half of the session's channel.

use std::sync::Arc;

use camino::Utf8Path;
use dm_core::{ChangeFilter, FxHashMap, MonitorConfig, WatchHandle, fx_hash_map};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::context::{ReadStats, WatchContext};
use crate::dispatcher::{self, DispatchReport, NotificationHandler};
use crate::error::WatchError;
use crate::events::PendingNotification;
use crate::pattern::PatternSet;

/// Active watches plus the channel their workers report through.
///
/// Dropping a session tears it down.
///
/// # Examples
///
/// ```no_run
/// use dm_core::{ChangeFilter, MonitorConfig};
/// use dm_monitor::{HandlerError, Session, WatchEvent};
///
/// # async fn example() -> Result<(), dm_monitor::WatchError> {
/// let mut session = Session::new(MonitorConfig::default());
/// let handle = session.register("./logs", true, ChangeFilter::default(), &["*.log"])?;
///
/// let mut print = |event: WatchEvent| -> Result<(), HandlerError> {
///     for change in event.changes() {
///         println!("{} {}", change.action.label(), change.path);
///     }
///     Ok(())
/// };
/// session.dispatch_next(&mut print).await;
///
/// session.unregister(handle)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Session {
    config: MonitorConfig,
    watches: FxHashMap<WatchHandle, Arc<WatchContext>>,
    sender: UnboundedSender<PendingNotification>,
    receiver: UnboundedReceiver<PendingNotification>,
    torn_down: bool,
    totals: DispatchReport,
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            config,
            watches: fx_hash_map(),
            sender,
            receiver,
            torn_down: false,
            totals: DispatchReport::default(),
        }
    }

    /// Returns the session's engine configuration.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Starts watching `path`.
    ///
    /// `patterns` are include (`+glob` or `glob`) and exclude (`-glob`)
    /// patterns in priority order; empty reports every path.
    ///
    /// # Errors
    ///
    /// - [`WatchError::SessionClosed`] after [`teardown`](Self::teardown)
    /// - [`WatchError::InvalidPattern`] if a glob does not compile
    /// - [`WatchError::PathNotFound`] / [`WatchError::NotADirectory`]
    /// - [`WatchError::Notify`] / [`WatchError::Io`] if the OS refuses the
    ///   watch, the first read, or the worker
    ///
    /// Nothing is left behind on error.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_PATTERNS`](crate::MAX_PATTERNS) patterns
    /// are supplied.
    pub fn register<P, S>(
        &mut self,
        path: P,
        include_subtree: bool,
        filter: ChangeFilter,
        patterns: &[S],
    ) -> Result<WatchHandle, WatchError>
    where
        P: AsRef<Utf8Path>,
        S: AsRef<str>,
    {
        if self.torn_down {
            return Err(WatchError::SessionClosed);
        }
        let patterns = PatternSet::new(patterns)?;
        let context = WatchContext::new(
            path.as_ref(),
            include_subtree,
            filter,
            patterns,
            &self.config,
        );

        if let Err(err) = context.start(self.sender.clone()) {
            tracing::debug!(path = %path.as_ref(), error = %err, "Watch setup failed");
            context.close();
            return Err(err);
        }

        let handle = context.handle();
        self.watches.insert(handle, context);
        Ok(handle)
    }

    /// Starts watching `path` with the configured subtree flag and filter
    /// and no patterns.
    ///
    /// # Errors
    ///
    /// As [`register`](Self::register).
    pub fn watch(&mut self, path: impl AsRef<Utf8Path>) -> Result<WatchHandle, WatchError> {
        let (include_subtree, filter) = (self.config.include_subtree, self.config.filter);
        let no_patterns: [&str; 0] = [];
        self.register(path, include_subtree, filter, &no_patterns)
    }

    /// Stops a watch. When this returns the handler will not be called for
    /// `handle` again.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::UnknownHandle`] if no active watch has `handle`.
    pub fn unregister(&mut self, handle: WatchHandle) -> Result<(), WatchError> {
        let context = self
            .watches
            .remove(&handle)
            .ok_or(WatchError::UnknownHandle(handle))?;
        context.close();
        Ok(())
    }

    /// Closes every watch and releases every queued notification.
    ///
    /// Later registrations fail with [`WatchError::SessionClosed`]. Returns
    /// the number of watches closed.
    pub fn teardown(&mut self) -> usize {
        let mut closed = 0;
        for (_, context) in self.watches.drain() {
            if context.close() {
                closed += 1;
            }
        }

        let was_torn_down = std::mem::replace(&mut self.torn_down, true);
        let mut report = DispatchReport::default();
        while let Ok(message) = self.receiver.try_recv() {
            drop(message);
            report.discarded += 1;
        }
        self.totals += report;

        if !was_torn_down {
            tracing::info!(closed, discarded = report.discarded, "Session torn down");
        }
        closed
    }

    /// Returns `true` once the session has been torn down.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Returns the number of active watches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// Returns `true` if no watches are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Returns `true` if `handle` is an active watch.
    #[must_use]
    pub fn contains(&self, handle: WatchHandle) -> bool {
        self.watches.contains_key(&handle)
    }

    /// Returns the context of an active watch.
    #[must_use]
    pub fn context(&self, handle: WatchHandle) -> Option<&Arc<WatchContext>> {
        self.watches.get(&handle)
    }

    /// Returns the read counters of an active watch.
    #[must_use]
    pub fn read_stats(&self, handle: WatchHandle) -> Option<ReadStats> {
        self.watches.get(&handle).map(|c| c.read_stats())
    }

    /// Returns the counters accumulated over the session's lifetime.
    #[must_use]
    pub fn totals(&self) -> DispatchReport {
        self.totals
    }

    /// Delivers every notification already queued, without waiting.
    pub fn dispatch_pending<H>(&mut self, handler: &mut H) -> DispatchReport
    where
        H: NotificationHandler + ?Sized,
    {
        let mut report = DispatchReport::default();
        while let Ok(message) = self.receiver.try_recv() {
            dispatcher::dispatch(message, self.torn_down, handler, &mut report);
        }
        self.record(report)
    }

    /// Waits for the next notification, then delivers it and everything
    /// queued behind it.
    ///
    /// Cancel-safe: dropping the future before it completes loses nothing.
    pub async fn dispatch_next<H>(&mut self, handler: &mut H) -> DispatchReport
    where
        H: NotificationHandler + ?Sized,
    {
        let mut report = DispatchReport::default();
        // The session owns a sender, so the channel never closes.
        if let Some(message) = self.receiver.recv().await {
            dispatcher::dispatch(message, self.torn_down, handler, &mut report);
        }
        while let Ok(message) = self.receiver.try_recv() {
            dispatcher::dispatch(message, self.torn_down, handler, &mut report);
        }
        self.record(report)
    }

    fn record(&mut self, report: DispatchReport) -> DispatchReport {
        if report.processed() > 0 {
            tracing::debug!(
                delivered = report.delivered,
                suppressed = report.suppressed,
                discarded = report.discarded,
                "Dispatched notifications"
            );
        }
        self.totals += report;
        report
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}
