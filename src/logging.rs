use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable enabling terminal logging (also used as the filter).
pub const LOG_ENV: &str = "BRANCHWORK_LOG";

/// File name prefix; the daily appender adds `.YYYY-MM-DD`
pub const LOG_FILE: &str = "branchwork.log";

/// sqlx logs every statement at debug
const FILE_FILTER: &str = "debug,sqlx=warn";

/// File logging is always on. The terminal only gets logs with `--verbose`
/// or when `BRANCHWORK_LOG` is set, so agent waits keep a clean screen.
pub fn init(verbose: bool) -> Result<()> {
    let log_dir = log_dir()?;
    fs::create_dir_all(&log_dir)?;

    let file_layer = fmt::layer()
        .with_writer(RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(EnvFilter::new(FILE_FILTER));

    let terminal_layer = (verbose || std::env::var(LOG_ENV).is_ok()).then(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter)
    });

    // An Option layer is a no-op when None
    tracing_subscriber::registry()
        .with(file_layer)
        .with(terminal_layer)
        .try_init()?;

    Ok(())
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(crate::config::config_dir()?.join("logs"))
}
