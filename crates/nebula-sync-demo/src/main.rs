//! Demo binary that replicates ships from a loopback server to two clients.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p nebula-sync-demo` to watch the replication log.
//! Run with `cargo run -p nebula-sync-demo -- --tick-rate 60 --render-delay 4` to override timing.

mod sim;

use std::path::PathBuf;

use clap::Parser;
use glam::Vec3;
use nebula_config::{CliArgs, Config};
use nebula_sync::{EndpointId, SyncError, SyncSettings};
use sim::{ClientProcess, ServerProcess};
use tracing::{error, info};

const SERVER: EndpointId = EndpointId(1);
const PILOT: EndpointId = EndpointId(2);
const OBSERVER: EndpointId = EndpointId(3);

fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args
        .config
        .clone()
        .or_else(|| dirs::config_dir().map(|dir| dir.join("nebula-sync")))
        .unwrap_or_else(|| PathBuf::from(".nebula-sync"));

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(2);
    }

    let log_dir = config_dir.join("logs");
    nebula_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    info!(
        tick_rate = config.sync.tick_rate,
        render_delay = config.sync.render_delay_ticks,
        history_depth = config.sync.default_history_depth,
        ticks = args.ticks,
        "Starting replication demo"
    );

    if let Err(e) = run(&config, args.ticks) {
        error!("Replication demo failed: {e}");
        std::process::exit(1);
    }
}

fn run(config: &Config, ticks: u32) -> Result<(), SyncError> {
    let settings = SyncSettings::from(&config.sync);
    let interval = config.sync.default_refresh_interval_ticks;

    let mut server = ServerProcess::new(SERVER, settings, interval);
    let mut pilot = ClientProcess::new(PILOT, settings, interval, true);
    let mut observer = ClientProcess::new(OBSERVER, settings, interval, false);
    sim::connect(&mut server, &mut pilot);
    sim::connect(&mut server, &mut observer);

    server.spawn_ship("Raider", Vec3::new(10.0, 0.0, 0.0), None)?;
    server.spawn_ship("Kestrel", Vec3::ZERO, Some(PILOT))?;

    let tick_duration = config.sync.tick_duration();
    let report_every = config.sync.tick_rate.max(1);
    let stats_every = config.debug.stats_interval_ticks;

    for tick in 1..=ticks {
        server.tick(tick);
        pilot.tick(tick);
        observer.tick(tick);

        if tick % report_every == 0 {
            for (who, reports) in [
                ("server", server.report()),
                ("pilot", pilot.report()),
                ("observer", observer.report()),
            ] {
                for r in reports {
                    info!(
                        tick,
                        who,
                        id = ?r.network_id,
                        name = %r.ship.name,
                        hp = r.ship.hp,
                        x = r.ship.position.x,
                        z = r.ship.position.z,
                        shield = r.ship.shield,
                        "ship state"
                    );
                }
            }
        }

        if stats_every > 0 && tick % stats_every == 0 {
            for (id, stats) in server.stats() {
                info!(tick, ?id, ?stats, "replication stats");
            }
        }

        std::thread::sleep(tick_duration);
    }

    server.shutdown(ticks + 1);
    pilot.tick(ticks + 1);
    observer.tick(ticks + 1);

    let link = server.link.counters();
    info!(
        reliable = link.reliable,
        unreliable = link.unreliable,
        pilot_ships = pilot.ship_count(),
        observer_ships = observer.ship_count(),
        "Replication demo finished"
    );
    Ok(())
}
