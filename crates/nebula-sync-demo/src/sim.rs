//! Loopback server and client processes replicating ships.
//!
//! Each process owns a bevy [`World`] and a [`LoopbackLink`]. The server
//! simulates the AI ship and relays the player ship, which the piloting
//! client drives under `TrustClient` authority.

use bevy_ecs::prelude::*;
use glam::Vec3;
use nebula_sync::{
    ClientAuthoritativeMode, DispatcherId, EndpointId, LoopbackLink, NetworkEngine, NetworkId, NetworkIdAllocator, PropertyId,
    RoutedMessage, Side, SyncComponent, SyncError, SyncSettings, SyncStats, SyncTarget, Tick, Transform, Value,
};

/// Entity type of ships the server simulates.
pub const AI_SHIP: &str = "ai_ship";
/// Entity type of the ship a client pilots.
pub const PLAYER_SHIP: &str = "player_ship";
/// Dispatcher every ship replicates over.
pub const SHIPS: DispatcherId = DispatcherId(1);

// ---------------------------------------------------------------------------
// Ship
// ---------------------------------------------------------------------------

/// Game state of one ship, mirrored on every process.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct Ship {
    /// Display name.
    pub name: String,
    /// Hit points.
    pub hp: i32,
    /// World position.
    pub position: Vec3,
    /// Shield charge, only the owner sees it.
    pub shield: f32,
}

impl Default for Ship {
    fn default() -> Self {
        Self {
            name: String::new(),
            hp: 100,
            position: Vec3::ZERO,
            shield: 1.0,
        }
    }
}

impl Ship {
    /// Declares every replicated property for this tick.
    fn declare(&self, sync: &mut SyncComponent, refresh_interval: u32) {
        sync.synchronise("name", refresh_interval, self.name.as_str());
        sync.synchronise("hp", refresh_interval, self.hp);
        sync.synchronise_smoothed("position", 0, self.position);
        sync.synchronise_to_owner("shield", refresh_interval, self.shield);
    }
}

impl SyncTarget for Ship {
    fn apply(&mut self, _id: PropertyId, name: &str, value: &Value) {
        match (name, value) {
            ("name", Value::String(v)) => self.name.clone_from(v),
            ("hp", Value::Int32(v)) => self.hp = *v,
            ("position", Value::Vector3(v)) => self.position = *v,
            ("shield", Value::Single(v)) => self.shield = *v,
            _ => tracing::warn!(name, ?value, "unexpected property value"),
        }
    }
}

/// One line of the periodic state report.
#[derive(Debug, Clone)]
pub struct ShipReport {
    /// Network id, once assigned.
    pub network_id: Option<NetworkId>,
    /// Ship state.
    pub ship: Ship,
}

fn report(world: &mut World) -> Vec<ShipReport> {
    let mut query = world.query::<(&SyncComponent, &Ship)>();
    let mut reports: Vec<ShipReport> = query
        .iter(world)
        .map(|(sync, ship)| ShipReport {
            network_id: sync.network_id(),
            ship: ship.clone(),
        })
        .collect();
    reports.sort_by_key(|r| r.network_id);
    reports
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// The authority process.
pub struct ServerProcess {
    /// Transport.
    pub link: LoopbackLink,
    world: World,
    allocator: NetworkIdAllocator,
    settings: SyncSettings,
    refresh_interval: u32,
}

impl ServerProcess {
    /// Creates a server reachable as `endpoint`.
    pub fn new(endpoint: EndpointId, settings: SyncSettings, refresh_interval: u32) -> Self {
        Self {
            link: LoopbackLink::new(endpoint),
            world: World::new(),
            allocator: NetworkIdAllocator::new(),
            settings,
            refresh_interval,
        }
    }

    /// Spawns a replicated ship. With an `owner`, that client drives it.
    pub fn spawn_ship(
        &mut self,
        name: &str,
        position: Vec3,
        owner: Option<EndpointId>,
    ) -> Result<Entity, SyncError> {
        let ship = Ship {
            name: name.to_string(),
            position,
            ..Default::default()
        };
        let entity_type = if owner.is_some() { PLAYER_SHIP } else { AI_SHIP };
        let entity = self.world.spawn(ship).id();
        let mut sync = SyncComponent::new(entity, entity_type, Side::Server, self.settings)
            .with_dispatcher(SHIPS)
            .with_transform(Transform::from_translation(position));
        if owner.is_some() {
            sync.set_client_authority(ClientAuthoritativeMode::TrustClient, owner)?;
        }
        self.world.entity_mut(entity).insert(sync);
        Ok(entity)
    }

    /// Runs one server tick.
    pub fn tick(&mut self, tick: Tick) {
        let mut query = self.world.query::<(&mut SyncComponent, &mut Ship)>();

        // Owner updates first, so this tick relays them.
        let world = &mut self.world;
        self.link.poll(|_, routed| {
            if let RoutedMessage::Properties { endpoint, entity, message } = routed
                && let Ok((mut sync, mut ship)) = query.get_mut(world, entity)
            {
                sync.receive_properties(endpoint, &message, tick, &mut *ship);
            }
        });

        for (mut sync, mut ship) in query.iter_mut(&mut self.world) {
            if sync.is_local_authoritative() {
                simulate_ai(&mut ship, tick);
            }
            ship.declare(&mut sync, self.refresh_interval);
            sync.update(tick, &mut self.link, &self.allocator);
        }
    }

    /// Current state of every ship.
    pub fn report(&mut self) -> Vec<ShipReport> {
        report(&mut self.world)
    }

    /// Replication counters per ship.
    pub fn stats(&mut self) -> Vec<(Option<NetworkId>, SyncStats)> {
        let mut query = self.world.query::<&SyncComponent>();
        query.iter(&self.world).map(|s| (s.network_id(), s.stats())).collect()
    }

    /// Despawns every ship, telling clients they are gone.
    pub fn shutdown(&mut self, tick: Tick) {
        let mut query = self.world.query::<&mut SyncComponent>();
        for mut sync in query.iter_mut(&mut self.world) {
            sync.despawn(tick, &mut self.link);
        }
    }
}

fn simulate_ai(ship: &mut Ship, tick: Tick) {
    let angle = tick as f32 * 0.1;
    ship.position = Vec3::new(angle.cos(), 0.0, angle.sin()) * 10.0;
    if tick % 25 == 0 {
        ship.hp = (ship.hp - 10).max(0);
    }
    ship.shield = (ship.shield - 0.01).max(0.0);
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A client process mirroring the server's ships.
pub struct ClientProcess {
    /// Transport.
    pub link: LoopbackLink,
    world: World,
    settings: SyncSettings,
    refresh_interval: u32,
    pilot: bool,
}

impl ClientProcess {
    /// Creates a client reachable as `endpoint`. A `pilot` takes control of
    /// the player ship when it appears.
    pub fn new(endpoint: EndpointId, settings: SyncSettings, refresh_interval: u32, pilot: bool) -> Self {
        Self {
            link: LoopbackLink::new(endpoint),
            world: World::new(),
            settings,
            refresh_interval,
            pilot,
        }
    }

    /// Runs one client tick.
    pub fn tick(&mut self, tick: Tick) {
        let mut query = self.world.query::<(&mut SyncComponent, &mut Ship)>();
        let world = &mut self.world;
        let settings = self.settings;
        let pilot = self.pilot;
        let refresh_interval = self.refresh_interval;
        let endpoint = self.link.endpoint();

        self.link.poll(|router, routed| match routed {
            RoutedMessage::Create { message, .. } => {
                let id = NetworkId(message.entity_id);
                let ship = Ship {
                    position: Transform::from(message.initial_transform).translation,
                    ..Default::default()
                };
                let entity = world.spawn(ship.clone()).id();
                let mut sync = SyncComponent::new(entity, message.entity_type.as_str(), Side::Client, settings)
                    .with_dispatcher(SHIPS);
                if let Err(e) = sync.receive_network_id(id, message.frame_tick) {
                    tracing::warn!(%endpoint, error = %e, "rejecting entity create");
                    world.despawn(entity);
                    return;
                }
                if pilot && message.entity_type == PLAYER_SHIP {
                    let owned = sync
                        .set_client_authority(ClientAuthoritativeMode::TrustClient, None)
                        .and_then(|()| sync.set_locally_owned(true));
                    if let Err(e) = owned {
                        tracing::warn!(%endpoint, error = %e, "cannot take control of player ship");
                    }
                }
                ship.declare(&mut sync, refresh_interval);
                world.entity_mut(entity).insert(sync);
                router.register(id, entity);
                tracing::info!(%endpoint, %id, entity_type = %message.entity_type, "ship appeared");
            }
            RoutedMessage::Properties { endpoint: from, entity, message } => {
                if let Ok((mut sync, mut ship)) = query.get_mut(world, entity) {
                    sync.receive_properties(from, &message, tick, &mut *ship);
                }
            }
            RoutedMessage::Destroy { entity, message, .. } => {
                router.unregister(NetworkId(message.entity_id));
                world.despawn(entity);
                tracing::info!(%endpoint, id = message.entity_id, "ship destroyed");
            }
        });

        for (mut sync, mut ship) in query.iter_mut(&mut self.world) {
            if sync.is_local_authoritative() {
                fly_player(&mut ship);
            } else {
                sync.apply_smoothing(tick, &mut *ship);
            }
            ship.declare(&mut sync, self.refresh_interval);
            sync.update(tick, &mut self.link, NetworkIdAllocator::global());
        }
    }

    /// Current state of every mirrored ship.
    pub fn report(&mut self) -> Vec<ShipReport> {
        report(&mut self.world)
    }

    /// Number of mirrored ships.
    pub fn ship_count(&mut self) -> usize {
        self.world.query::<&Ship>().iter(&self.world).count()
    }
}

fn fly_player(ship: &mut Ship) {
    ship.position += Vec3::X * 0.5;
}

/// Connects `client` to `server` on the [`SHIPS`] dispatcher.
pub fn connect(server: &mut ServerProcess, client: &mut ClientProcess) {
    LoopbackLink::connect(&mut server.link, &mut client.link, SHIPS);
    tracing::debug!(
        server = %server.link.endpoint(),
        client = %client.link.endpoint(),
        endpoints = server.link.current_endpoints(SHIPS).len(),
        "client connected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: EndpointId = EndpointId(1);
    const PILOT: EndpointId = EndpointId(2);
    const OBSERVER: EndpointId = EndpointId(3);

    fn processes() -> (ServerProcess, ClientProcess, ClientProcess) {
        let settings = SyncSettings::default();
        let mut server = ServerProcess::new(SERVER, settings, 1);
        let mut pilot = ClientProcess::new(PILOT, settings, 1, true);
        let mut observer = ClientProcess::new(OBSERVER, settings, 1, false);
        connect(&mut server, &mut pilot);
        connect(&mut server, &mut observer);
        (server, pilot, observer)
    }

    fn run(server: &mut ServerProcess, clients: &mut [&mut ClientProcess], ticks: std::ops::RangeInclusive<Tick>) {
        for tick in ticks {
            server.tick(tick);
            for client in clients.iter_mut() {
                client.tick(tick);
            }
        }
    }

    #[test]
    fn test_clients_mirror_server_ships() {
        let (mut server, mut pilot, mut observer) = processes();
        server.spawn_ship("Raider", Vec3::new(10.0, 0.0, 0.0), None).unwrap();
        server.spawn_ship("Kestrel", Vec3::ZERO, Some(PILOT)).unwrap();

        run(&mut server, &mut [&mut pilot, &mut observer], 1..=30);

        assert_eq!(pilot.ship_count(), 2);
        assert_eq!(observer.ship_count(), 2);
        let names: Vec<String> = observer.report().into_iter().map(|r| r.ship.name).collect();
        assert_eq!(names, vec!["Raider".to_string(), "Kestrel".to_string()]);
    }

    #[test]
    fn test_pilot_moves_player_ship_for_everyone() {
        let (mut server, mut pilot, mut observer) = processes();
        server.spawn_ship("Kestrel", Vec3::ZERO, Some(PILOT)).unwrap();

        run(&mut server, &mut [&mut pilot, &mut observer], 1..=40);

        let piloted = pilot.report()[0].ship.position.x;
        let relayed = server.report()[0].ship.position.x;
        let observed = observer.report()[0].ship.position.x;
        assert!(piloted > 10.0, "pilot at {piloted}");
        assert!(relayed > 5.0 && relayed <= piloted, "server at {relayed}");
        assert!(observed > 0.0 && observed <= relayed, "observer at {observed}");
    }

    #[test]
    fn test_shutdown_clears_clients() {
        let (mut server, mut pilot, mut observer) = processes();
        server.spawn_ship("Raider", Vec3::ZERO, None).unwrap();
        run(&mut server, &mut [&mut pilot, &mut observer], 1..=3);

        server.shutdown(4);
        pilot.tick(4);
        observer.tick(4);
        assert_eq!(pilot.ship_count(), 0);
        assert_eq!(observer.ship_count(), 0);
        assert!(server.stats().iter().all(|(_, s)| s.destroys_sent == 2));
    }
}
