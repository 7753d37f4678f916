//! CLI entry point for dirmon.
//!
//! This binary hosts a directory change monitor session on a single thread
//! and prints every change it is notified of.
//!
//! # Usage
//!
//! ```bash
//! dirmon [OPTIONS] <COMMAND>
//!
//! # Watch two trees, only Rust sources, skipping build output
//! dirmon watch ./src ./tests --pattern '-target/*' --pattern '*.rs'
//!
//! # Watch a directory's direct children for size changes, as JSON
//! dirmon watch ./logs --no-subtree --filter size --format json
//!
//! # Decode a raw change buffer captured to disk
//! dirmon decode buffer.bin
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand, ValueEnum};
use dm_core::{ChangeFilter, Config, OutputFormat, WatchHandle};
use dm_monitor::{DecodedChange, EventStatus, HandlerError, Session, WatchEvent, codec};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Watch directory trees and print file and subdirectory changes.
#[derive(Parser)]
#[command(name = "dirmon", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file.
    #[arg(short, long, global = true, env = "DIRMON_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Output format (overrides the configuration file).
    #[arg(long, global = true, value_enum)]
    format: Option<FormatArg>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Watch directories and print changes until interrupted.
    Watch {
        /// Directories to watch.
        #[arg(required = true)]
        paths: Vec<Utf8PathBuf>,

        /// Include (`glob` or `+glob`) or exclude (`-glob`) pattern; first
        /// match wins. Repeatable.
        #[arg(short, long = "pattern", allow_hyphen_values = true)]
        patterns: Vec<String>,

        /// Only report changes to the directories' direct children.
        #[arg(long)]
        no_subtree: bool,

        /// Change class to report (file-name, dir-name, attributes, size,
        /// last-write, last-access, creation, security). Repeatable.
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Exit after this many delivered events.
        #[arg(long)]
        max_events: Option<u64>,
    },

    /// Decode a raw change buffer file and print its records.
    Decode {
        /// The buffer file.
        file: Utf8PathBuf,
    },
}

/// Output format.
#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    /// One line per change.
    Text,
    /// One JSON object per event.
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `warn` level by default so log
/// lines do not interleave with printed changes.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "warn" };
        EnvFilter::new(format!("{level},notify=warn,mio=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(io::stderr),
        )
        .with(filter)
        .init();
}

/// Loads the configuration file, if any, and applies command-line overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or a filter name is unknown.
fn build_config(cli: &Cli) -> color_eyre::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(format) = cli.format {
        config.cli.format = format.into();
    }

    if let Commands::Watch {
        no_subtree,
        filters,
        max_events,
        ..
    } = &cli.command
    {
        if *no_subtree {
            config.monitor.include_subtree = false;
        }
        if !filters.is_empty() {
            config.monitor.filter = ChangeFilter::from_names(filters)?;
        }
        if max_events.is_some() {
            config.cli.max_events = *max_events;
        }
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Watches `paths` until interrupted, the event limit is hit, or every
/// watch has failed.
///
/// # Errors
///
/// Returns an error if a watch cannot be registered or output fails.
async fn run_watch(
    config: &Config,
    paths: &[Utf8PathBuf],
    patterns: &[String],
) -> color_eyre::Result<()> {
    let mut session = Session::new(config.monitor);

    for path in paths {
        let handle = session.register(
            path,
            config.monitor.include_subtree,
            config.monitor.filter,
            patterns,
        )?;
        info!(%handle, %path, "Watching");
        report_watching(handle, path)?;
    }

    let printer = EventPrinter::new(config.cli.format);
    let mut delivered = 0_u64;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let mut failed: Vec<WatchHandle> = Vec::new();
        let mut handler = |event: WatchEvent| -> Result<(), HandlerError> {
            if event.status() == EventStatus::Error {
                failed.push(event.handle);
            }
            let stdout = io::stdout();
            let mut out = stdout.lock();
            printer.print(&mut out, &event)?;
            out.flush()?;
            Ok(())
        };

        tokio::select! {
            report = session.dispatch_next(&mut handler) => {
                delivered += report.delivered;
            }
            result = &mut shutdown => {
                result?;
                info!("Received shutdown signal");
                break;
            }
        }

        for handle in failed {
            if session.unregister(handle).is_ok() {
                info!(%handle, "Unregistered failed watch");
            }
        }
        if session.is_empty() {
            info!("No watches left");
            break;
        }
        if config.cli.max_events.is_some_and(|max| delivered >= max) {
            break;
        }
    }

    let closed = session.teardown();
    info!(closed, delivered, "Session finished");
    Ok(())
}

/// Decodes a raw change buffer file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or output fails.
fn run_decode(config: &Config, file: &Utf8Path) -> color_eyre::Result<()> {
    let bytes = std::fs::read(file)?;
    let changes = codec::decode(&bytes, bytes.len());
    info!(path = %file, bytes = bytes.len(), records = changes.len(), "Decoded buffer");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match config.cli.format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, &changes)?;
            writeln!(out)?;
        }
        _ => {
            for change in &changes {
                write_change(&mut out, None, change)?;
            }
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

fn report_watching(handle: WatchHandle, path: &Utf8Path) -> io::Result<()> {
    let stderr = io::stderr();
    let mut err = stderr.lock();
    writeln!(err, "{handle}  watching {path}")
}

/// Renders delivered events.
struct EventPrinter {
    format: OutputFormat,
}

impl EventPrinter {
    fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn print(&self, out: &mut impl Write, event: &WatchEvent) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut *out, &event.record())?;
                writeln!(out)
            }
            _ => {
                if let Some(err) = event.error() {
                    return writeln!(out, "{}  {:<12} {err}", event.handle, "error");
                }
                for change in event.changes() {
                    write_change(out, Some(event.handle), change)?;
                }
                Ok(())
            }
        }
    }
}

fn write_change(
    out: &mut impl Write,
    handle: Option<WatchHandle>,
    change: &DecodedChange,
) -> io::Result<()> {
    let action = change.action.label();
    match handle {
        Some(handle) => writeln!(out, "{handle}  {action:<12} {}", change.path),
        None => writeln!(out, "{action:<12} {}", change.path),
    }
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
///
/// The current-thread runtime is the single host thread: every handler
/// invocation and every close runs on it.
#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Load configuration and apply overrides
    let config = build_config(&cli)?;

    // 5. Route to appropriate command
    match &cli.command {
        Commands::Watch {
            paths, patterns, ..
        } => run_watch(&config, paths, patterns).await,
        Commands::Decode { file } => run_decode(&config, file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_core::ChangeAction;
    use dm_monitor::EventPayload;

    fn render(format: OutputFormat, event: &WatchEvent) -> String {
        let mut out = Vec::new();
        EventPrinter::new(format).print(&mut out, event).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_text_output() {
        let event = WatchEvent::new(
            WatchHandle::new(5),
            EventPayload::Changes(vec![
                DecodedChange::new(ChangeAction::Added, "a.txt"),
                DecodedChange::new(ChangeAction::RenamedTo, "dir/b.txt"),
            ]),
        );
        assert_eq!(
            render(OutputFormat::Text, &event),
            "dirmon#5  added        a.txt\ndirmon#5  renamed_to   dir/b.txt\n"
        );
    }

    #[test]
    fn test_json_output_is_one_line_per_event() {
        let event = WatchEvent::new(
            WatchHandle::new(5),
            EventPayload::Changes(vec![DecodedChange::new(ChangeAction::Removed, "gone")]),
        );
        let text = render(OutputFormat::Json, &event);
        assert_eq!(text.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["changes"][0]["action"], "removed");
    }

    #[test]
    fn test_error_output() {
        let event = WatchEvent::new(
            WatchHandle::new(9),
            EventPayload::Error(io::Error::other("watch lost")),
        );
        assert_eq!(
            render(OutputFormat::Text, &event),
            "dirmon#9  error        watch lost\n"
        );
    }

    #[test]
    fn test_cli_parses_watch_overrides() {
        let cli = Cli::try_parse_from([
            "dirmon",
            "watch",
            "/tmp",
            "--pattern",
            "-*.log",
            "--no-subtree",
            "--filter",
            "size",
            "--max-events",
            "3",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        assert!(!config.monitor.include_subtree);
        assert_eq!(config.monitor.filter, ChangeFilter::SIZE);
        assert_eq!(config.cli.max_events, Some(3));

        let Commands::Watch { patterns, .. } = &cli.command else {
            panic!("expected watch command");
        };
        assert_eq!(patterns, &vec!["-*.log".to_owned()]);
    }

    #[test]
    fn test_unknown_filter_is_rejected() {
        let cli = Cli::try_parse_from(["dirmon", "watch", "/tmp", "--filter", "colour"]).unwrap();
        assert!(build_config(&cli).is_err());
    }
}
