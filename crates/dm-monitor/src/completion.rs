//! Completion signals and thread-pool wait registrations.
//!
//! A [`CompletionSignal`] is an auto-reset event: [`set`](CompletionSignal::set)
//! latches it, and exactly one wait consumes the latch. Auto-reset matters
//! because a registered wait must run its callback once per completion, not
//! once per wake-up.
//!
//! [`register_wait`] parks a pool worker on a signal and runs a callback each
//! time the signal fires. [`WaitRegistration::unregister`] cancels the wait
//! and blocks until a callback already running has returned. Only after that
//! may the caller release anything the callback touches.
//!
//! # Threads
//!
//! Each registration owns one named `std::thread`, so a watch costs two OS
//! threads: this worker and the `notify` backend's event thread. The
//! worker cannot live on tokio's blocking pool. `unregister` joins it
//! synchronously from the host thread, which runs a current-thread runtime,
//! and a `spawn_blocking` task offers no join that may be awaited there
//! without driving the runtime. Hosts watching thousands of directories pay
//! for that in thread stacks.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// An auto-reset event.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use dm_monitor::CompletionSignal;
///
/// let signal = CompletionSignal::new();
/// signal.set();
/// assert!(signal.wait_timeout(Duration::from_millis(10)));
/// // The first wait reset it.
/// assert!(!signal.wait_timeout(Duration::from_millis(10)));
/// ```
#[derive(Debug, Default)]
pub struct CompletionSignal {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl CompletionSignal {
    /// Creates an unsignaled event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches the signal and wakes one waiter.
    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_one();
    }

    /// Returns `true` if the signal is latched, without consuming it.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// Waits up to `timeout` for the signal, consuming it.
    ///
    /// Returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        std::mem::take(&mut *signaled)
    }

    /// Waits for the signal or for `cancelled` to become true.
    ///
    /// Cancellation is checked first and leaves a latched signal in place.
    /// Returns `true` if the signal was consumed.
    fn wait_or_cancel(&self, cancelled: &AtomicBool) -> bool {
        let mut signaled = self.signaled.lock();
        loop {
            if cancelled.load(Ordering::Acquire) {
                return false;
            }
            if std::mem::take(&mut *signaled) {
                return true;
            }
            self.cond.wait(&mut signaled);
        }
    }

    /// Sets `cancelled` under the signal's lock and wakes every waiter.
    fn cancel_waiters(&self, cancelled: &AtomicBool) {
        let _guard = self.signaled.lock();
        cancelled.store(true, Ordering::Release);
        self.cond.notify_all();
    }
}

/// A live registration of a callback against a [`CompletionSignal`].
///
/// Dropping a registration without calling
/// [`unregister`](Self::unregister) cancels it the same way.
#[derive(Debug)]
pub struct WaitRegistration {
    signal: Arc<CompletionSignal>,
    cancelled: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

/// Registers `callback` to run on a pool worker each time `signal` fires.
///
/// At most one invocation runs at a time, and never on the calling thread.
///
/// # Errors
///
/// Returns the OS error if the worker cannot be spawned.
pub fn register_wait<F>(
    name: String,
    signal: Arc<CompletionSignal>,
    mut callback: F,
) -> io::Result<WaitRegistration>
where
    F: FnMut() + Send + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let worker_signal = Arc::clone(&signal);
    let worker_cancelled = Arc::clone(&cancelled);

    let worker = thread::Builder::new().name(name).spawn(move || {
        while worker_signal.wait_or_cancel(&worker_cancelled) {
            callback();
        }
    })?;
    let worker_id = worker.thread().id();

    Ok(WaitRegistration {
        signal,
        cancelled,
        worker: Some(worker),
        worker_id,
    })
}

impl WaitRegistration {
    /// Cancels the wait and blocks until any running callback has returned.
    ///
    /// The callback, and everything it captured, is dropped before this
    /// returns. Calling it from inside the callback cancels without waiting.
    pub fn unregister(mut self) {
        self.cancel_and_join();
    }

    /// Returns `true` if the worker is still parked or running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn cancel_and_join(&mut self) {
        self.signal.cancel_waiters(&self.cancelled);
        let Some(worker) = self.worker.take() else {
            return;
        };
        if thread::current().id() == self.worker_id {
            return;
        }
        if worker.join().is_err() {
            tracing::error!("Completion callback panicked");
        }
    }
}

impl Drop for WaitRegistration {
    fn drop(&mut self) {
        self.cancel_and_join();
    }
}
