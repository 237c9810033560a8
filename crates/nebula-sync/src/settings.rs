//! Runtime knobs of the replication core, bridged from `nebula-config`.

use nebula_config::SyncConfig;

/// Per-side replication settings shared by every [`SyncComponent`](crate::SyncComponent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// How far behind the local tick smoothed properties are displayed.
    pub render_delay_ticks: u32,
    /// Smoothing depth used by the `synchronise_smoothed` helpers.
    pub default_history_depth: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            render_delay_ticks: 2,
            default_history_depth: 16,
        }
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            render_delay_ticks: config.render_delay_ticks,
            default_history_depth: config.default_history_depth.clamp(1, SyncConfig::MAX_HISTORY_DEPTH),
        }
    }
}
