//! The asynchronous read engine.
//!
//! Each watch keeps exactly one read in flight. The completion callback runs
//! on the watch's pool worker, decodes the finished buffer, hands the result
//! to the host thread and immediately re-arms the next read with the same
//! buffer. Because reads are strictly serialized per watch, notifications for
//! one watch reach the host in the order the OS reported the changes.

use std::io;
use std::sync::Arc;

use crate::codec;
use crate::context::{ContextState, WatchContext};
use crate::directory::ReadCompletion;
use crate::events::{EventPayload, PendingNotification};

/// Issues the next read on `context`.
///
/// Allocates the scratch buffer on first use. Succeeds whether the read
/// completed on the spot or is pending. On failure the buffer is released and
/// no read is outstanding.
pub(crate) fn initiate_read(context: &WatchContext, state: &mut ContextState) -> io::Result<()> {
    debug_assert!(!state.read_outstanding, "a read is already outstanding");

    let not_open = || io::Error::new(io::ErrorKind::NotConnected, "watch is not open");
    let signal = state.signal.as_ref().map(Arc::clone).ok_or_else(not_open)?;
    let directory = state.directory.as_mut().ok_or_else(not_open)?;

    let buffer = state
        .buffer
        .take()
        .unwrap_or_else(|| vec![0; context.buffer_size()]);

    context.counters.on_issue();
    state.read_outstanding = true;

    match directory.read_changes(buffer, context.include_subtree(), context.filter(), signal) {
        Ok(()) => {
            tracing::debug!(handle = %context.handle(), "Read issued");
            Ok(())
        }
        Err(err) => {
            state.read_outstanding = false;
            context.counters.on_finish(false);
            tracing::debug!(handle = %context.handle(), error = %err, "Read could not be issued");
            Err(err)
        }
    }
}

/// Completion callback. Runs on the watch's pool worker only.
pub(crate) fn on_read_complete(context: &Arc<WatchContext>) {
    let mut state = context.state.lock();

    let completion = match state.directory.as_ref() {
        Some(directory) => directory.take_completion(),
        None => ReadCompletion::Incomplete,
    };

    match completion {
        ReadCompletion::Incomplete => {
            tracing::trace!(handle = %context.handle(), "Spurious wake-up");
        }
        ReadCompletion::Failed(err) => {
            state.read_outstanding = false;
            context.counters.on_finish(false);
            tracing::debug!(handle = %context.handle(), error = %err, "Read failed");
            enqueue(context, &state, EventPayload::Error(err));
        }
        ReadCompletion::Done { buffer, bytes } => {
            state.read_outstanding = false;
            context.counters.on_finish(true);

            if bytes == 0 {
                tracing::warn!(
                    handle = %context.handle(),
                    "Read completed with no data, changes may have been lost"
                );
            }
            let changes = codec::decode_filtered(&buffer, bytes, context.patterns());
            tracing::debug!(
                handle = %context.handle(),
                bytes,
                changes = changes.len(),
                "Read completed"
            );
            state.buffer = Some(buffer);
            enqueue(context, &state, EventPayload::Changes(changes));

            if context.is_closed() {
                return;
            }
            if let Err(err) = initiate_read(context, &mut state) {
                tracing::warn!(handle = %context.handle(), error = %err, "Failed to re-arm read");
                enqueue(context, &state, EventPayload::Error(err));
            }
        }
    }
}

/// Queues `payload` for the host thread, if the watch is still linked.
fn enqueue(context: &Arc<WatchContext>, state: &ContextState, payload: EventPayload) {
    let Some(notifier) = state.notifier.as_ref() else {
        tracing::trace!(handle = %context.handle(), "Watch unlinked, dropping notification");
        return;
    };
    let message = PendingNotification {
        context: Arc::clone(context),
        payload,
    };
    if notifier.send(message).is_err() {
        tracing::trace!(handle = %context.handle(), "Session gone, dropping notification");
    }
}
