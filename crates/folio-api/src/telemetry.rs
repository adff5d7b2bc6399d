//! Tracing subscriber setup for the server binary.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogFormat};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "folio_api=debug,folio_jobs=info,tower_http=debug";

/// Install the global subscriber.
///
/// Returns the file writer guard when `LOG_FILE` is set; it must be held for
/// the life of the process or buffered lines are lost.
pub fn init_tracing(config: &LogConfig) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(env_filter);

    match &config.file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path.parent().unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("folio-api.log");
            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            match config.format {
                LogFormat::Json => registry
                    .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                    .init(),
                LogFormat::Text => registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(writer)
                            .with_ansi(config.ansi.unwrap_or(false)),
                    )
                    .init(),
            }
            Some(guard)
        }
        None => {
            match config.format {
                LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
                LogFormat::Text => {
                    let mut layer = tracing_subscriber::fmt::layer();
                    if let Some(ansi) = config.ansi {
                        layer = layer.with_ansi(ansi);
                    }
                    registry.with(layer).init();
                }
            }
            None
        }
    }
}
