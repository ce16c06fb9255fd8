//! Tracing setup shared by the four binaries
//!
//! Console output goes to stderr so it never mixes with the login wall or
//! console prompts on stdout. A daily file per binary is kept under the
//! logs directory when it can be created.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber. Keep the returned guard alive for the
/// whole process so buffered file lines get flushed.
pub fn init(logs_dir: &Path, file_prefix: &str, console: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console_layer = console.then(|| fmt::layer().with_writer(std::io::stderr));

    let (file_layer, guard) = match std::fs::create_dir_all(logs_dir) {
        Ok(()) => {
            let appender = rolling::daily(logs_dir, format!("{}.log", file_prefix));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        Err(e) => {
            eprintln!("Cannot create log directory {}: {}", logs_dir.display(), e);
            (None, None)
        }
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
    guard
}
