use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where and how much a binary logs.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter used when `RUST_LOG` is unset, e.g. `"info"` or `"classalign=debug"`.
    pub base_level: String,
    pub dir: PathBuf,
    /// Rolling files are named `<prefix>.<date>.log`.
    pub file_prefix: String,
    pub max_files: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            base_level: "info".to_string(),
            dir: PathBuf::from("logs"),
            file_prefix: "classalign".to_string(),
            max_files: 5,
        }
    }
}

/// Console plus daily rolling file logging under `logs/`.
pub fn setup_logging(base_level: &str) {
    setup_logging_with(LogOptions {
        base_level: base_level.to_string(),
        ..Default::default()
    });
}

/// Panics if called twice or if the log directory cannot be created.
pub fn setup_logging_with(options: LogOptions) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.base_level))
        .unwrap_or_else(|e| panic!("Invalid log filter: {}", e));

    std::fs::create_dir_all(&options.dir).unwrap_or_else(|e| {
        panic!(
            "Failed to create log directory {}: {}",
            options.dir.display(),
            e
        )
    });

    let file_appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(&options.file_prefix)
        .filename_suffix("log")
        .max_log_files(options.max_files)
        .build(&options.dir)
        .unwrap_or_else(|e| panic!("Failed to create log file appender: {}", e));

    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD.set(guard).expect("Logging already initialized");

    // Warnings and errors go to stderr as well, so they survive stdout redirection.
    let console_writer = std::io::stdout.and(std::io::stderr.with_min_level(Level::WARN));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_ansi(true)
        .with_writer(console_writer);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .unwrap_or_else(|e| panic!("Logger initialization failed: {}", e));
}
