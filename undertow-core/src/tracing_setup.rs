//! Tracing setup for Undertow
//!
//! The console shows undertow's own events at the chosen level while HTTP
//! plumbing stays at `warn` unless the operator asks for more. Long-running
//! commands also keep a per-run trace file scoped to the workspace crates.

use std::fs::{File, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the per-run trace file inside the logs directory.
pub const LOG_FILE_NAME: &str = "undertow-last-run.log";

/// Crates whose events count as undertow's own.
const UNDERTOW_TARGETS: [&str; 4] = ["undertow", "undertow_core", "undertow_web", "undertow_sim"];

/// Where tracing output goes for one process.
#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// Level for undertow events on the console, unless `RUST_LOG` is set
    pub console_level: Level,
    /// Directory for the per-run trace file; console only when `None`
    pub trace_dir: Option<PathBuf>,
}

impl TracingOptions {
    /// Console output only, for short-lived commands.
    pub fn console(console_level: Level) -> Self {
        Self {
            console_level,
            trace_dir: None,
        }
    }

    /// Console output plus a trace file under `dir`.
    pub fn with_trace_file(console_level: Level, dir: impl Into<PathBuf>) -> Self {
        Self {
            console_level,
            trace_dir: Some(dir.into()),
        }
    }
}

/// Filter directives for the console.
///
/// Request spans from `tower_http` surface only at debug and trace.
pub fn console_directives(level: Level) -> String {
    let http_level = if level >= Level::DEBUG {
        level
    } else {
        Level::WARN
    };
    let mut directives = vec!["warn".to_string(), format!("tower_http={http_level}")];
    directives.extend(UNDERTOW_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Filter directives for the trace file: everything from undertow, request
/// spans at debug, and other crates at info.
pub fn trace_file_directives() -> String {
    let mut directives = vec!["info".to_string(), "tower_http=debug".to_string()];
    directives.extend(UNDERTOW_TARGETS.iter().map(|target| format!("{target}=trace")));
    directives.join(",")
}

/// Installs the global subscriber.
///
/// Returns the trace file path when one was opened. A second call in the same
/// process leaves the first subscriber in place.
///
/// # Errors
/// - `std::io::Error` - Trace directory could not be created or the file opened
pub fn init_tracing(options: &TracingOptions) -> io::Result<Option<PathBuf>> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directives(options.console_level)));
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let (file_layer, trace_path) = match options.trace_dir.as_deref() {
        Some(dir) => {
            let (file, path) = open_trace_file(dir)?;
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(file)
                .with_filter(EnvFilter::new(trace_file_directives()));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init();

    match &trace_path {
        Some(path) => tracing::debug!(
            "Tracing initialized: console={}, trace_file={}",
            options.console_level,
            path.display()
        ),
        None => tracing::debug!("Tracing initialized: console={}", options.console_level),
    }

    Ok(trace_path)
}

fn open_trace_file(dir: &Path) -> io::Result<(File, PathBuf)> {
    create_dir_all(dir)?;
    let path = dir.join(LOG_FILE_NAME);
    let file = File::create(&path)?;
    Ok((file, path))
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}
