//! Configuration system for Nebula Sync.
//!
//! Provides runtime-configurable replication settings that persist to disk as
//! RON files. Supports CLI overrides via clap, hot-reload detection, and
//! forward/backward compatible serialization.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, SyncConfig};
pub use error::ConfigError;
