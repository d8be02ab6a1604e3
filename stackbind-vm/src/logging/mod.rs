//! Logging infrastructure - structured tracing for the runtime and its bindings
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Level filtering through `RUST_LOG` or `STACKBIND_LOG_LEVEL`
//! - Zero cost when disabled
//! - Console or file output (file writes go through a non-blocking appender)
//! - Optional JSON formatting

use crate::config::LogSettings;
use crate::error::Error;
use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

pub use tracing::{debug, error, info, trace, warn};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the file appender's worker alive for the life of the process
static APPENDER_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut settings = LogSettings::default();
        if let Ok(level) = std::env::var("STACKBIND_LOG_LEVEL") {
            settings.level = level;
        }
        settings.file = std::env::var("STACKBIND_LOG_FILE").ok();
        settings.json = std::env::var("STACKBIND_LOG_JSON").is_ok();
        settings.spans = std::env::var("STACKBIND_LOG_SPANS").is_ok();
        Self::from_settings(&settings)
    }

    /// Create config from the `[log]` section of a runtime config
    pub fn from_settings(settings: &LogSettings) -> Self {
        Self {
            level: parse_level(&settings.level),
            file_output: settings.file.is_some(),
            log_path: settings.file.clone(),
            json_format: settings.json,
            show_spans: settings.spans,
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Everything, including span enter/exit
    pub fn verbose() -> Self {
        Self {
            level: Level::TRACE,
            show_spans: true,
            ..Self::default()
        }
    }
}

fn parse_level(name: &str) -> Level {
    name.trim().parse().unwrap_or(Level::INFO)
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration.
///
/// Only the first call installs a subscriber; later calls are ignored.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let level = config.level.as_str().to_lowercase();
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("stackbind={level},stackbind_vm={level}"))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let writer = match config.log_path.as_deref() {
            Some(path) if config.file_output => file_writer(Path::new(path)),
            _ => BoxMakeWriter::new(io::stdout),
        };

        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_target(true)
            .with_line_number(cfg!(debug_assertions));

        let registry = tracing_subscriber::registry().with(env_filter);
        // A subscriber installed by the host wins
        let installed = if config.json_format {
            registry.with(layer.json()).try_init()
        } else {
            registry.with(layer).try_init()
        };
        if installed.is_ok() {
            debug!(level = %level, json = config.json_format, "logging initialized");
        }
    });
}

fn file_writer(path: &Path) -> BoxMakeWriter {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "stackbind.log".into());

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = APPENDER_GUARD.set(guard);
    BoxMakeWriter::new(writer)
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Runtime events
// ============================================================================

/// Log GC cycle start
pub fn log_gc_start(root_count: usize) {
    debug!(
        event = "gc_start",
        roots = root_count,
        "Starting garbage collection cycle"
    );
}

/// Log GC cycle completion
pub fn log_gc_complete(duration_us: u64, collected: usize, live: usize) {
    info!(
        event = "gc_complete",
        objects_collected = collected,
        live_objects = live,
        duration_us = duration_us,
        "Garbage collection cycle complete"
    );
}

/// Finalizers must not fail; when one does the error is reported here and the sweep continues
pub fn log_finalizer_error(error: &Error) {
    warn!(
        event = "finalizer_error",
        error = %error,
        "Finalizer raised an error"
    );
}

/// Log a bound native call
#[inline]
pub fn log_native_call(function: &str, arg_count: usize) {
    trace!(
        event = "native_call",
        function = function,
        args = arg_count,
        "Native function called"
    );
}
