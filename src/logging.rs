use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::time::{FormatTime, OffsetTime, SystemTime};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes console and rolling JSON file logging.
///
/// Timestamps use the local UTC offset, read once here before the file
/// writer thread starts. If the offset cannot be determined they fall back
/// to UTC.
///
/// The returned guard flushes the file writer when dropped, so the caller keeps
/// it alive for the whole run.
pub fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("[logging] cannot create {}: {}", log_dir.display(), e);
        return None;
    }
    let local_timer = OffsetTime::local_rfc_3339();

    let file_appender = tracing_appender::rolling::daily(log_dir, "pageview_rollup.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let installed = match local_timer {
        Ok(timer) => install(timer, non_blocking_writer),
        Err(_) => {
            eprintln!("[logging] local offset unavailable, logging in UTC");
            install(SystemTime, non_blocking_writer)
        }
    };

    match installed {
        Ok(()) => Some(guard),
        Err(e) => {
            eprintln!("[logging] subscriber already installed: {}", e);
            None
        }
    }
}

fn install<T>(timer: T, file_writer: NonBlocking) -> Result<(), TryInitError>
where
    T: FormatTime + Clone + Send + Sync + 'static,
{
    let file_layer = fmt::layer()
        .json()
        .with_timer(timer.clone())
        .with_writer(file_writer);
    let console_layer = fmt::layer()
        .with_target(false)
        .with_timer(timer)
        .with_writer(std::io::stderr);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pageview_rollup=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
}
