//! Core types, configuration, and errors for the dirmon workspace.
//!
//! This crate provides the foundational types shared by the monitor engine
//! and the command-line host:
//!
//! - [`WatchHandle`] - the identifier of an active directory watch
//! - [`ChangeAction`] - the kind of change reported for a path
//! - [`ChangeFilter`] - the mask of change classes requested from the OS
//! - [`Config`] / [`MonitorConfig`] - tunables loaded from JSON
//! - [`ConfigError`] - configuration failures
//! - The `FxHashMap` alias for handle-keyed maps

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hash;
pub mod types;

pub use config::{CliConfig, Config, MonitorConfig, OutputFormat};
pub use error::ConfigError;
pub use hash::{FxHashMap, fx_hash_map};
pub use types::{ChangeAction, ChangeFilter, WatchHandle};
