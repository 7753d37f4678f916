//! Closing a watch.
//!
//! The order matters. Completions are silenced before any resource they use
//! is released:
//!
//! 1. Unregister the pool wait, blocking until a running callback returns.
//!    The worker's reference to the context goes with it.
//! 2. Drop the back-link to the session channel. The session drops its own
//!    reference when it removes the watch from its active set.
//! 3. Close the directory handle. An outstanding read is aborted and
//!    signals.
//! 4. If a read was outstanding, wait (bounded) for its signal, then reclaim
//!    and release the scratch buffer and the signal.

use crate::context::WatchContext;
use crate::directory::ReadCompletion;

impl WatchContext {
    /// Closes the watch. Idempotent; safe with a read in flight.
    ///
    /// Blocks until the completion callback can no longer run. Returns `true`
    /// if this call performed the close.
    pub(crate) fn close(&self) -> bool {
        if !self.mark_closed() {
            return false;
        }

        // The worker takes the state lock, so it must not be held while
        // waiting for the worker to finish.
        let registration = self.state.lock().registration.take();
        if let Some(registration) = registration {
            registration.unregister();
            tracing::debug!(handle = %self.handle(), "Unregistered completion wait");
        }

        let mut state = self.state.lock();
        state.notifier = None;

        let aborted = state
            .directory
            .as_mut()
            .is_some_and(|directory| directory.close());

        if state.read_outstanding {
            let signaled = state
                .signal
                .as_ref()
                .is_some_and(|signal| signal.wait_timeout(self.close_wait()));
            if !signaled {
                tracing::warn!(
                    handle = %self.handle(),
                    wait_ms = self.close_wait().as_millis(),
                    "Timed out waiting for the aborted read to complete"
                );
            }

            let ok = match state.directory.as_ref().map(|d| d.take_completion()) {
                Some(ReadCompletion::Done { .. }) => true,
                Some(ReadCompletion::Failed(err)) => {
                    tracing::trace!(handle = %self.handle(), error = %err, "Reclaimed aborted read");
                    false
                }
                Some(ReadCompletion::Incomplete) | None => false,
            };
            state.read_outstanding = false;
            self.counters.on_finish(ok);
        }

        state.buffer = None;
        state.signal = None;
        let opened = state.directory.take().is_some();

        if opened {
            tracing::info!(handle = %self.handle(), path = %self.path(), aborted, "Watch closed");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use camino::Utf8PathBuf;
    use dm_core::{ChangeFilter, MonitorConfig};

    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    use crate::context::WatchContext;
    use crate::events::PendingNotification;
    use crate::pattern::PatternSet;

    fn started(root: &Utf8PathBuf) -> (Arc<WatchContext>, UnboundedReceiver<PendingNotification>) {
        let ctx = WatchContext::new(
            root.clone(),
            true,
            ChangeFilter::default(),
            PatternSet::unfiltered(),
            &MonitorConfig {
                close_wait_ms: 200,
                ..MonitorConfig::default()
            },
        );
        let (tx, rx) = unbounded_channel();
        ctx.start(tx).unwrap();
        (ctx, rx)
    }

    #[test]
    fn test_close_with_read_outstanding_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let (ctx, mut rx) = started(&root);
        assert_eq!(Arc::strong_count(&ctx), 2, "creator + pool worker");
        assert!(ctx.state.lock().read_outstanding);

        assert!(ctx.close());
        assert_eq!(Arc::strong_count(&ctx), 1);

        let state = ctx.state.lock();
        assert!(state.directory.is_none());
        assert!(state.signal.is_none());
        assert!(state.buffer.is_none());
        assert!(state.registration.is_none());
        assert!(state.notifier.is_none());
        assert!(!state.read_outstanding);
        drop(state);

        assert_eq!(ctx.read_stats().outstanding, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let (ctx, _rx) = started(&root);
        assert!(ctx.close());
        assert!(!ctx.close());
        assert!(ctx.is_closed());
    }

    #[test]
    fn test_close_after_changes_stops_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let (ctx, mut rx) = started(&root);

        std::fs::write(root.join("a.txt"), "1").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        ctx.close();

        // Whatever was queued before close stays queued; nothing arrives after.
        while rx.try_recv().is_ok() {}
        std::fs::write(root.join("b.txt"), "2").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err());
        assert_eq!(Arc::strong_count(&ctx), 1);
    }
}
