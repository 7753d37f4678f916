//! Directory change monitoring with a thread-pool completion engine.
//!
//! This crate watches directory trees for file and subdirectory changes and
//! delivers structured events to a single host thread without ever blocking
//! that thread's event loop.
//!
//! # Overview
//!
//! The dm-monitor crate is designed to:
//!
//! - Keep exactly one asynchronous read in flight per watched directory
//! - Decode raw change buffers and filter them through include/exclude globs
//!   on a pool worker, off the host thread
//! - Hand results to the host through a channel so user code only ever runs
//!   on the host thread
//! - Close watches, including ones with a read in flight, without races or
//!   dangling references
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Pool Worker (one per watch)                  │
//! │  ┌──────────────────┐    ┌────────────────┐    ┌────────────┐  │
//! │  │ DirectoryHandle  │ -> │ codec::decode  │ -> │ PatternSet │  │
//! │  │ (notify journal) │    │ (raw records)  │    │ (globs)    │  │
//! │  └────────▲─────────┘    └────────────────┘    └─────┬──────┘  │
//! │           └───────────── re-arm next read ◄──────────┤         │
//! └──────────────────────────────────────────────────────│─────────┘
//!                                                        │
//!                                     unbounded mpsc send│
//!                                                        ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Host Thread                                  │
//! │  ┌──────────────────┐    ┌────────────────┐                     │
//! │  │ Session          │    │ dispatcher     │ -> user handler     │
//! │  │ (register/close) │    │ (discard/      │                     │
//! │  │                  │    │  suppress)     │                     │
//! │  └──────────────────┘    └────────────────┘                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Crate Dependencies
//!
//! ```text
//! dm-cli ──► dm-monitor ──► dm-core
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use dm_core::{ChangeFilter, MonitorConfig};
//! use dm_monitor::{HandlerError, Session, WatchEvent};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::new(MonitorConfig::default());
//!     session.register("./src", true, ChangeFilter::default(), &["*.rs", "-target/*"])?;
//!
//!     let mut print = |event: WatchEvent| -> Result<(), HandlerError> {
//!         for change in event.changes() {
//!             println!("{:<12} {}", change.action.label(), change.path);
//!         }
//!         Ok(())
//!     };
//!
//!     loop {
//!         tokio::select! {
//!             _ = session.dispatch_next(&mut print) => {}
//!             _ = tokio::signal::ctrl_c() => break,
//!         }
//!     }
//!
//!     session.teardown();
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Setup failures come back from [`Session::register`] as [`WatchError`].
//! Failures of a running watch arrive as events with
//! [`EventStatus::Error`]; the watch produces nothing further and should be
//! unregistered:
//!
//! ```
//! use dm_monitor::{EventStatus, WatchEvent};
//!
//! fn failed_watch(event: &WatchEvent) -> bool {
//!     event.status() == EventStatus::Error
//! }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod codec;
mod completion;
mod context;
mod directory;
mod dispatcher;
mod engine;
pub mod error;
pub mod events;
pub mod pattern;
mod session;
mod shutdown;

// Re-export error types
pub use error::WatchError;

// Re-export event types
pub use events::{DecodedChange, EventPayload, EventRecord, EventStatus, WatchEvent};

// Re-export pattern types
pub use pattern::{MAX_PATTERNS, MatchOutcome, PatternSet, match_path};

// Re-export engine and session types
pub use completion::{CompletionSignal, WaitRegistration, register_wait};
pub use context::{ReadStats, WatchContext};
pub use dispatcher::{DispatchReport, HandlerError, NotificationHandler};
pub use session::Session;
