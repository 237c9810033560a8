//! Structured logging and tracing for Nebula Sync.
//!
//! Provides structured, span-based, filterable logging via the `tracing` ecosystem.
//! Supports console output with uptime timestamps and module paths, plus JSON file
//! logging in debug builds for post-mortem analysis of replication traffic.
//! Integrates with the configuration system to allow runtime log level control.

use nebula_config::Config;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config names one.
pub const DEFAULT_FILTER: &str = "info,bevy_ecs=warn";

/// File name of the JSON log written in debug builds.
pub const LOG_FILE_NAME: &str = "nebula-sync.log";

/// Initialize the tracing subscriber.
///
/// Sets up structured logging with:
/// - Console output with uptime timestamps, module paths, and severity levels
/// - JSON file logging in debug builds (optional)
/// - Environment-based filtering (respects RUST_LOG)
/// - Integration with the config `debug.log_level` setting
///
/// # Examples
///
/// ```no_run
/// use nebula_log::init_logging;
/// use nebula_config::Config;
///
/// // With file logging in debug mode and the config's log level
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let filter_str = filter_directives(config);

    // RUST_LOG wins over the config.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true) // I/O threads feeding the inbound queue are named
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && let Some(log_file) = open_log_file(log_dir)
    {
        let file_layer = fmt::layer()
            .with_writer(Mutex::new(log_file))
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// The filter directives to use: the config's `debug.log_level` if set,
/// [`DEFAULT_FILTER`] otherwise.
pub fn filter_directives(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.trim().is_empty() => config.debug.log_level.clone(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Create an `EnvFilter` from [`DEFAULT_FILTER`].
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

/// Creates `log_dir` and a fresh [`LOG_FILE_NAME`] inside it.
pub fn open_log_file(log_dir: &Path) -> Option<File> {
    std::fs::create_dir_all(log_dir).ok()?;
    File::create(log_dir.join(LOG_FILE_NAME)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        let filter_str = format!("{}", default_env_filter());
        assert!(filter_str.contains("bevy_ecs=warn"));
        assert!(filter_str.contains("info"));
    }

    #[test]
    fn test_config_level_overrides_default() {
        let mut config = Config::default();
        config.debug.log_level = "debug,nebula_sync=trace".to_string();
        assert_eq!(filter_directives(Some(&config)), "debug,nebula_sync=trace");
    }

    #[test]
    fn test_blank_config_level_falls_back() {
        let mut config = Config::default();
        config.debug.log_level = "  ".to_string();
        assert_eq!(filter_directives(Some(&config)), DEFAULT_FILTER);
        assert_eq!(filter_directives(None), DEFAULT_FILTER);
    }

    #[test]
    fn test_env_filter_parsing() {
        let valid_filters = [
            "info",
            "debug,nebula_sync=trace",
            "warn,nebula_sync::ledger=trace,nebula_sync::engine=debug",
            "error",
        ];

        for filter_str in &valid_filters {
            let result = EnvFilter::try_from(*filter_str);
            assert!(result.is_ok(), "Failed to parse filter: {}", filter_str);
        }
    }

    #[test]
    fn test_open_log_file_creates_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_dir = temp_dir.path().join("nested").join("logs");
        assert!(open_log_file(&log_dir).is_some());
        assert!(log_dir.join(LOG_FILE_NAME).exists());
    }

    #[test]
    fn test_json_file_layer_writes_structured_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_file = open_log_file(temp_dir.path()).unwrap();
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false)
                .json(),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(network_id = 7, "entity announced");
        });

        let contents = std::fs::read_to_string(temp_dir.path().join(LOG_FILE_NAME)).unwrap();
        let line = contents.lines().next().unwrap();
        let json: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(json["level"], "INFO");
        assert_eq!(json["fields"]["message"], "entity announced");
        assert_eq!(json["fields"]["network_id"], 7);
    }
}
