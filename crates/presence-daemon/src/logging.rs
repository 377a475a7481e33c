//! Tracing subscriber setup.
//!
//! Two modes, picked by `logging.production`:
//! - production: daily JSON files for later inspection, plus plain compact
//!   lines on stdout for journald
//! - development: pretty stdout with span open/close events, so each scan
//!   cycle is visible as a block

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use presence_core::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable consulted when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "PRESENCE_LOG_LEVEL";

/// Prefix of the rolling log files (`beacon-presence.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "beacon-presence";

// Flushing workers for the non-blocking writers; dropped only at exit.
static WRITER_GUARDS: OnceLock<[WorkerGuard; 2]> = OnceLock::new();

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG`, then [`LOG_LEVEL_ENV`], then `info`.
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = filter()?;

    if config.production {
        let dir = resolve_directory(config);
        init_production(filter, &dir);
        tracing::debug!(directory = %dir.display(), "File logging enabled");
    } else {
        init_development(filter);
    }

    Ok(())
}

fn filter() -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    Ok(EnvFilter::try_new(level)?)
}

fn init_production(filter: EnvFilter, dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        // Subscriber is not up yet.
        eprintln!("cannot create log directory {}: {e}", dir.display());
    }

    let (file_writer, file_guard) = tracing_appender::non_blocking(RollingFileAppender::new(
        Rotation::DAILY,
        dir,
        LOG_FILE_PREFIX,
    ));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_file(true)
                .with_line_number(true)
                .with_writer(file_writer),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(false)
                .with_writer(stdout_writer),
        )
        .init();

    let _ = WRITER_GUARDS.set([file_guard, stdout_guard]);
}

fn init_development(filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
        )
        .init();
}

fn resolve_directory(config: &LoggingConfig) -> PathBuf {
    config.directory.clone().unwrap_or_else(default_directory)
}

fn default_directory() -> PathBuf {
    if cfg!(target_os = "linux") {
        return PathBuf::from("/var/log/beacon-presence");
    }
    directories::ProjectDirs::from("", "", "beacon-presence")
        .map_or_else(|| PathBuf::from("logs"), |dirs| dirs.data_local_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directory_is_not_empty() {
        assert!(!default_directory().as_os_str().is_empty());
    }

    #[test]
    fn test_configured_directory_wins() {
        let config = LoggingConfig {
            production: true,
            directory: Some(PathBuf::from("/tmp/presence-logs")),
        };
        assert_eq!(resolve_directory(&config), PathBuf::from("/tmp/presence-logs"));
    }

    #[test]
    fn test_unset_directory_falls_back_to_default() {
        assert_eq!(resolve_directory(&LoggingConfig::default()), default_directory());
    }
}
