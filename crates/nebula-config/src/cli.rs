//! Command-line argument parsing for the replication demo.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Nebula Sync command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "nebula-sync", about = "Nebula entity replication")]
pub struct CliArgs {
    /// Simulation ticks per second.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Display delay for smoothed properties, in ticks.
    #[arg(long)]
    pub render_delay: Option<u32>,

    /// Samples kept per smoothed property.
    #[arg(long)]
    pub history_depth: Option<usize>,

    /// Number of ticks to simulate before exiting.
    #[arg(long, default_value_t = 60)]
    pub ticks: u32,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(rate) = args.tick_rate {
            self.sync.tick_rate = rate;
        }
        if let Some(delay) = args.render_delay {
            self.sync.render_delay_ticks = delay;
        }
        if let Some(depth) = args.history_depth {
            self.sync.default_history_depth = depth;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
