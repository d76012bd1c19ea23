//! Line-oriented logging on top of `tracing`.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;

use crate::endpoint;

pub const DEBUG_FILE_ENV: &str = "YABRIDGE_DEBUG_FILE";
pub const DEBUG_LEVEL_ENV: &str = "YABRIDGE_DEBUG_LEVEL";

/// Accepts already formatted lines.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

/// Emits one INFO event per line, tagged with the label of the plugin or
/// group it belongs to.
#[derive(Debug, Clone)]
pub struct Logger {
    prefix: String,
}

impl Logger {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn for_group(group_endpoint: &Path) -> Self {
        Self::new(endpoint::group_logger_prefix(group_endpoint))
    }

    pub fn for_endpoint(endpoint_base_dir: &Path) -> Self {
        Self::new(endpoint::endpoint_logger_prefix(endpoint_base_dir))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl LogSink for Logger {
    fn log(&self, message: &str) {
        tracing::info!(target: "yabridge", "{}{}", self.prefix, message);
    }
}

/// How much gets logged, from `YABRIDGE_DEBUG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Basic,
    MostEvents,
    AllEvents,
}

impl Verbosity {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("1") => Verbosity::MostEvents,
            Some(level) if level.parse::<u32>().is_ok_and(|level| level >= 2) => {
                Verbosity::AllEvents
            }
            _ => Verbosity::Basic,
        }
    }

    pub fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Basic => LevelFilter::INFO,
            Verbosity::MostEvents => LevelFilter::DEBUG,
            Verbosity::AllEvents => LevelFilter::TRACE,
        }
    }
}

pub fn init_from_environment() {
    init_with_stderr(None);
}

/// Installs the global subscriber. Lines go to `YABRIDGE_DEBUG_FILE` when it
/// can be opened, otherwise to `stderr` (or the real STDERR if `None`).
/// Calling this more than once keeps the first subscriber.
pub fn init_with_stderr(stderr: Option<File>) {
    let verbosity = Verbosity::parse(std::env::var(DEBUG_LEVEL_ENV).ok().as_deref());
    let builder = tracing_subscriber::fmt().with_max_level(verbosity.level_filter());

    let debug_file = std::env::var_os(DEBUG_FILE_ENV).and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                eprintln!(
                    "Could not open log file '{}': {err}",
                    Path::new(&path).display()
                )
            })
            .ok()
    });

    let _ = match debug_file.or(stderr) {
        Some(file) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
}
