//! Logging configuration.
//!
//! Events always go to stderr. A daily rolling file is written when a log
//! directory is available, and on Linux events are also forwarded to
//! systemd-journald when the journal socket is reachable.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the logging system.
///
/// Log level can be controlled via the `RECALLER_LOG` environment variable:
/// - `RECALLER_LOG=debug` for per-frame output
/// - `RECALLER_LOG=info` for standard output (default)
/// - `RECALLER_LOG=warn` for drops, warnings and errors only
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("RECALLER_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = log_dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("recaller")
            .join("logs")
    });

    let file_layer = match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(&log_dir, "recaller.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // init() runs once at startup, so the guard lives for the whole process.
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        Err(_) => None,
    };

    #[cfg(target_os = "linux")]
    let journald_layer = tracing_journald::layer().ok();
    #[cfg(not(target_os = "linux"))]
    let journald_layer: Option<fmt::Layer<_>> = None;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_thread_names(true))
        .with(file_layer)
        .with(journald_layer)
        .try_init()?;

    tracing::debug!(log_dir = ?log_dir, "Logging initialized");
    Ok(())
}
