//! Host-thread delivery of queued notifications.
//!
//! Workers never call user code. They queue a [`PendingNotification`] and
//! the host thread, draining the session channel, decides here whether the
//! message reaches the user's [`NotificationHandler`].

use std::ops::AddAssign;

use serde::Serialize;

use crate::events::{EventStatus, PendingNotification, WatchEvent};

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives delivered events on the host thread.
///
/// Implemented for every `FnMut(WatchEvent) -> Result<(), HandlerError>`.
///
/// # Examples
///
/// ```
/// use dm_monitor::{HandlerError, NotificationHandler, WatchEvent};
///
/// struct Counter(usize);
///
/// impl NotificationHandler for Counter {
///     fn handle(&mut self, event: WatchEvent) -> Result<(), HandlerError> {
///         self.0 += event.changes().len();
///         Ok(())
///     }
/// }
/// ```
pub trait NotificationHandler {
    /// Handles one event. An error is logged and counted; delivery continues.
    fn handle(&mut self, event: WatchEvent) -> Result<(), HandlerError>;
}

impl<F> NotificationHandler for F
where
    F: FnMut(WatchEvent) -> Result<(), HandlerError>,
{
    fn handle(&mut self, event: WatchEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

/// What happened to the messages of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Events handed to the handler.
    pub delivered: u64,
    /// Messages with an empty change list.
    pub suppressed: u64,
    /// Messages for closed watches or a torn-down session.
    pub discarded: u64,
    /// Deliveries where the handler returned an error.
    pub handler_errors: u64,
}

impl DispatchReport {
    /// Messages processed in total.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.delivered + self.suppressed + self.discarded
    }
}

impl AddAssign for DispatchReport {
    fn add_assign(&mut self, rhs: Self) {
        self.delivered += rhs.delivered;
        self.suppressed += rhs.suppressed;
        self.discarded += rhs.discarded;
        self.handler_errors += rhs.handler_errors;
    }
}

/// Processes one message. Its context reference is released on return.
pub(crate) fn dispatch<H>(
    message: PendingNotification,
    torn_down: bool,
    handler: &mut H,
    report: &mut DispatchReport,
) where
    H: NotificationHandler + ?Sized,
{
    let PendingNotification { context, payload } = message;
    let handle = context.handle();

    if torn_down || context.is_closed() {
        tracing::trace!(%handle, torn_down, "Discarding notification for closed watch");
        report.discarded += 1;
        return;
    }

    if payload.status() == EventStatus::NoChanges {
        tracing::trace!(%handle, "Suppressing empty notification");
        report.suppressed += 1;
        return;
    }

    // Do not keep the watch alive across user code.
    drop(context);

    let event = WatchEvent::new(handle, payload);
    tracing::debug!(%handle, status = ?event.status(), changes = event.changes().len(), "Delivering");
    report.delivered += 1;
    if let Err(err) = handler.handle(event) {
        tracing::warn!(%handle, error = %err, "Notification handler failed");
        report.handler_errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use dm_core::{ChangeAction, ChangeFilter, MonitorConfig, WatchHandle};

    use super::*;
    use crate::context::WatchContext;
    use crate::events::{DecodedChange, EventPayload};
    use crate::pattern::PatternSet;

    fn context() -> Arc<WatchContext> {
        WatchContext::new(
            "/unused",
            true,
            ChangeFilter::default(),
            PatternSet::unfiltered(),
            &MonitorConfig::default(),
        )
    }

    fn message(context: &Arc<WatchContext>, payload: EventPayload) -> PendingNotification {
        PendingNotification {
            context: Arc::clone(context),
            payload,
        }
    }

    fn changes() -> EventPayload {
        EventPayload::Changes(vec![DecodedChange::new(ChangeAction::Added, "f1")])
    }

    #[test]
    fn test_delivers_changes_and_releases_reference() {
        let ctx = context();
        let mut seen: Vec<WatchHandle> = Vec::new();
        let mut handler = |event: WatchEvent| -> Result<(), HandlerError> {
            seen.push(event.handle);
            Ok(())
        };
        let mut report = DispatchReport::default();

        dispatch(message(&ctx, changes()), false, &mut handler, &mut report);

        assert_eq!(report.delivered, 1);
        assert_eq!(Arc::strong_count(&ctx), 1);
        assert_eq!(seen, vec![ctx.handle()]);
    }

    #[test]
    fn test_suppresses_empty_change_list() {
        let ctx = context();
        let mut calls = 0;
        let mut handler = |_: WatchEvent| -> Result<(), HandlerError> {
            calls += 1;
            Ok(())
        };
        let mut report = DispatchReport::default();

        dispatch(
            message(&ctx, EventPayload::Changes(Vec::new())),
            false,
            &mut handler,
            &mut report,
        );

        assert_eq!(calls, 0);
        assert_eq!(report.suppressed, 1);
        assert_eq!(Arc::strong_count(&ctx), 1);
    }

    #[test]
    fn test_discards_for_closed_watch_and_torn_down_session() {
        let ctx = context();
        let mut calls = 0;
        let mut handler = |_: WatchEvent| -> Result<(), HandlerError> {
            calls += 1;
            Ok(())
        };
        let mut report = DispatchReport::default();

        dispatch(message(&ctx, changes()), true, &mut handler, &mut report);
        ctx.close();
        dispatch(message(&ctx, changes()), false, &mut handler, &mut report);

        assert_eq!(calls, 0);
        assert_eq!(report.discarded, 2);
        assert_eq!(Arc::strong_count(&ctx), 1);
    }

    #[test]
    fn test_delivers_errors() {
        let ctx = context();
        let mut codes = Vec::new();
        let mut handler = |event: WatchEvent| -> Result<(), HandlerError> {
            codes.push(event.status());
            Ok(())
        };
        let mut report = DispatchReport::default();

        dispatch(
            message(&ctx, EventPayload::Error(io::Error::other("gone"))),
            false,
            &mut handler,
            &mut report,
        );

        assert_eq!(codes, vec![EventStatus::Error]);
    }

    #[test]
    fn test_handler_errors_are_counted() {
        let ctx = context();
        let mut handler =
            |_: WatchEvent| -> Result<(), HandlerError> { Err("handler exploded".into()) };
        let mut report = DispatchReport::default();

        dispatch(message(&ctx, changes()), false, &mut handler, &mut report);
        dispatch(message(&ctx, changes()), false, &mut handler, &mut report);

        assert_eq!(report.delivered, 2);
        assert_eq!(report.handler_errors, 2);
        assert_eq!(report.processed(), 2);
    }

    #[test]
    fn test_report_accumulates() {
        let mut total = DispatchReport::default();
        total += DispatchReport {
            delivered: 1,
            suppressed: 2,
            discarded: 3,
            handler_errors: 1,
        };
        total += DispatchReport {
            delivered: 1,
            ..DispatchReport::default()
        };
        assert_eq!(total.delivered, 2);
        assert_eq!(total.processed(), 7);
    }
}
