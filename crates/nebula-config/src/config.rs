//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level replication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Replication timing and smoothing settings.
    pub sync: SyncConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Replication configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// How many ticks behind the local tick smoothed values are displayed.
    pub render_delay_ticks: u32,
    /// Refresh interval for properties that do not pick their own.
    pub default_refresh_interval_ticks: u32,
    /// Samples kept per smoothed property.
    pub default_history_depth: usize,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log replication counters every this many ticks (0 = never).
    pub stats_interval_ticks: u32,
}

// --- Default implementations ---

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            render_delay_ticks: 2,
            default_refresh_interval_ticks: 3,
            default_history_depth: 16,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stats_interval_ticks: 0,
        }
    }
}

impl SyncConfig {
    /// Largest accepted `default_history_depth`.
    pub const MAX_HISTORY_DEPTH: usize = 1024;

    /// Length of one tick.
    pub fn tick_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(1) / self.tick_rate.max(1)
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Rejects values the replication core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.tick_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.tick_rate",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(1..=SyncConfig::MAX_HISTORY_DEPTH).contains(&self.sync.default_history_depth) {
            return Err(ConfigError::InvalidValue {
                field: "sync.default_history_depth",
                reason: format!("must be between 1 and {}", SyncConfig::MAX_HISTORY_DEPTH),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("tick_rate: 20"));
        assert!(ron_str.contains("default_history_depth: 16"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(debug: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let ron_str = "(sync: (render_delay_ticks: 4))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.sync.render_delay_ticks, 4);
        assert_eq!(config.sync.tick_rate, 20);
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sync.tick_rate = 60;
        config.sync.default_history_depth = 32;
        config.debug.stats_interval_ticks = 100;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.sync.render_delay_ticks = 6;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.map(|c| c.sync.render_delay_ticks), Some(6));
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_invalid_values_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sync.tick_rate = 0;
        config.save(dir.path()).unwrap();

        let result = Config::load_or_create(dir.path());
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "sync.tick_rate", .. })
        ));
    }

    #[test]
    fn test_history_depth_bounded() {
        let mut config = Config::default();
        config.sync.default_history_depth = SyncConfig::MAX_HISTORY_DEPTH;
        assert!(config.validate().is_ok());

        for depth in [0, SyncConfig::MAX_HISTORY_DEPTH + 1, usize::MAX] {
            config.sync.default_history_depth = depth;
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidValue { field: "sync.default_history_depth", .. })
            ));
        }
    }

    #[test]
    fn test_huge_history_depth_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.ron"),
            "(sync: (default_history_depth: 1000000000))",
        )
        .unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::InvalidValue { field: "sync.default_history_depth", .. })
        ));
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }

    #[test]
    fn test_tick_duration() {
        let sync = SyncConfig {
            tick_rate: 50,
            ..Default::default()
        };
        assert_eq!(sync.tick_duration(), std::time::Duration::from_millis(20));
    }
}
