use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{FileLogConfig, LogRotation, LoggingConfig};

/// Keeps the non-blocking file writer alive; drop it last.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

fn file_writer(config: &FileLogConfig) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(&config.dir)?;
    let appender =
        RollingFileAppender::new(rotation(config.rotation), &config.dir, &config.prefix);
    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber: stdout always, plus the rolling file when configured.
pub fn init_tracing(config: &LoggingConfig) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let file = config
        .file
        .as_ref()
        .and_then(|file| match file_writer(file) {
            Ok(writer) => Some(writer),
            Err(err) => {
                eprintln!("failed to open log directory {}: {err}", file.dir.display());
                None
            }
        });
    let (file_layer, guard) = match file {
        Some((writer, guard)) => (
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            ),
            Some(FileLogGuard { _guard: guard }),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    if let (Some(file), Some(_)) = (&config.file, &guard) {
        tracing::debug!(dir = %file.dir.display(), prefix = %file.prefix, "file logging enabled");
    }

    guard
}
