//! The seam between replication and the transport.
//!
//! The transport delivers payloads from its own threads through an
//! [`InboundSender`]; the simulation drains the matching [`InboundQueue`] at a
//! fixed point of its tick and hands each packet to the
//! [`ReplicationRouter`], which resolves the entity the message is about.

use bevy_ecs::prelude::*;
use rustc_hash::FxHashMap;

use crate::id::{DispatcherId, EndpointId, NetworkId};
use crate::message::{
    self, ENTITY_CREATE, ENTITY_DESTROY, ENTITY_PROPERTIES, EntityCreateMessage,
    EntityDestroyMessage, EntityPropertiesMessage, MessageError, SyncMessage,
};

// ---------------------------------------------------------------------------
// NetworkEngine
// ---------------------------------------------------------------------------

/// What the replication layer needs from the transport.
pub trait NetworkEngine {
    /// Queues `message` for `endpoint` on `dispatcher`. Fire-and-forget:
    /// delivery failures are the transport's concern.
    fn send(&mut self, dispatcher: DispatcherId, endpoint: EndpointId, message: SyncMessage, reliable: bool);

    /// Endpoints currently connected on `dispatcher`.
    fn current_endpoints(&self, dispatcher: DispatcherId) -> Vec<EndpointId>;

    /// Makes `entity` reachable by inbound messages carrying `id`.
    fn register_network_id(&mut self, id: NetworkId, entity: Entity);

    /// Forgets the mapping for `id`. Engines without a router may ignore it.
    fn unregister_network_id(&mut self, _id: NetworkId) {}
}

// ---------------------------------------------------------------------------
// Inbound queue
// ---------------------------------------------------------------------------

/// A framed payload received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    /// Sender.
    pub from: EndpointId,
    /// Framed bytes as produced by [`message::serialize_message`].
    pub payload: Vec<u8>,
}

/// Cloneable producer half of an [`InboundQueue`], handed to I/O threads.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: crossbeam_channel::Sender<InboundPacket>,
}

impl InboundSender {
    /// Enqueues a packet. Returns `false` if the queue was dropped.
    pub fn push(&self, packet: InboundPacket) -> bool {
        self.tx.send(packet).is_ok()
    }
}

/// Unbounded inbound packet queue drained on the simulation thread.
#[derive(Debug)]
pub struct InboundQueue {
    tx: crossbeam_channel::Sender<InboundPacket>,
    rx: crossbeam_channel::Receiver<InboundPacket>,
}

impl InboundQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// A new producer handle.
    pub fn sender(&self) -> InboundSender {
        InboundSender { tx: self.tx.clone() }
    }

    /// Takes every packet queued so far, in arrival order.
    pub fn drain(&self) -> Vec<InboundPacket> {
        self.rx.try_iter().collect()
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ReplicationRouter
// ---------------------------------------------------------------------------

/// An inbound message resolved against the local entity table.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedMessage {
    /// A new entity announced by the authority. There is no local entity yet.
    Create {
        /// Sender.
        endpoint: EndpointId,
        /// Decoded message.
        message: EntityCreateMessage,
    },
    /// Property values for a known entity.
    Properties {
        /// Sender.
        endpoint: EndpointId,
        /// Local entity the message targets.
        entity: Entity,
        /// Decoded message.
        message: EntityPropertiesMessage,
    },
    /// Removal of a known entity.
    Destroy {
        /// Sender.
        endpoint: EndpointId,
        /// Local entity the message targets.
        entity: Entity,
        /// Decoded message.
        message: EntityDestroyMessage,
    },
}

/// Counters for inbound packets the router discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterCounters {
    /// Packets that failed to unframe or decode.
    pub malformed: u64,
    /// Packets about an entity id with no local mapping.
    pub unknown_entity: u64,
}

/// Maps network ids to local entities and routes inbound packets.
#[derive(Resource, Debug, Default)]
pub struct ReplicationRouter {
    entities: FxHashMap<NetworkId, Entity>,
    counters: RouterCounters,
}

impl ReplicationRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `id` to `entity`, replacing any previous mapping.
    pub fn register(&mut self, id: NetworkId, entity: Entity) {
        if let Some(previous) = self.entities.insert(id, entity)
            && previous != entity
        {
            tracing::warn!(%id, ?previous, ?entity, "network id remapped to a different entity");
        }
    }

    /// Removes the mapping for `id`.
    pub fn unregister(&mut self, id: NetworkId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Local entity for `id`.
    pub fn entity(&self, id: NetworkId) -> Option<Entity> {
        self.entities.get(&id).copied()
    }

    /// Number of mapped entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Discard counters.
    pub fn counters(&self) -> RouterCounters {
        self.counters
    }

    /// Decodes `packet` and resolves its target entity. Malformed packets and
    /// packets about unknown entities are dropped and counted.
    pub fn route(&mut self, packet: &InboundPacket) -> Option<RoutedMessage> {
        match self.try_route(packet) {
            Ok(routed) => routed,
            Err(e) => {
                self.counters.malformed += 1;
                tracing::debug!(from = %packet.from, error = %e, "dropping malformed replication packet");
                None
            }
        }
    }

    fn try_route(&mut self, packet: &InboundPacket) -> Result<Option<RoutedMessage>, MessageError> {
        let endpoint = packet.from;
        let (protocol_id, body) = message::split_header(&packet.payload)?;
        let routed = match protocol_id {
            ENTITY_CREATE => Some(RoutedMessage::Create {
                endpoint,
                message: message::decode_body(body)?,
            }),
            ENTITY_PROPERTIES => {
                let message: EntityPropertiesMessage = message::decode_body(body)?;
                self.resolve(message.entity_id)
                    .map(|entity| RoutedMessage::Properties { endpoint, entity, message })
            }
            ENTITY_DESTROY => {
                let message: EntityDestroyMessage = message::decode_body(body)?;
                self.resolve(message.entity_id)
                    .map(|entity| RoutedMessage::Destroy { endpoint, entity, message })
            }
            other => return Err(MessageError::UnknownProtocol(other)),
        };
        Ok(routed)
    }

    fn resolve(&mut self, entity_id: u32) -> Option<Entity> {
        let id = NetworkId(entity_id);
        let entity = self.entity(id);
        if entity.is_none() {
            self.counters.unknown_entity += 1;
            tracing::trace!(%id, "ignoring message for unknown network id");
        }
        entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::serialize_message;
    use crate::value::Transform;

    fn packet(from: u64, msg: &SyncMessage) -> InboundPacket {
        InboundPacket {
            from: EndpointId(from),
            payload: serialize_message(msg).unwrap(),
        }
    }

    fn destroy(entity_id: u32) -> SyncMessage {
        SyncMessage::Destroy(EntityDestroyMessage {
            entity_id,
            frame_tick: 5,
        })
    }

    #[test]
    fn test_queue_drains_in_order_across_threads() {
        let queue = InboundQueue::new();
        let sender = queue.sender();
        let handle = std::thread::spawn(move || {
            for i in 0..3u8 {
                sender.push(InboundPacket {
                    from: EndpointId(1),
                    payload: vec![i],
                });
            }
        });
        handle.join().unwrap();

        assert_eq!(queue.len(), 3);
        let drained: Vec<u8> = queue.drain().into_iter().map(|p| p.payload[0]).collect();
        assert_eq!(drained, vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_create_routes_without_mapping() {
        let mut router = ReplicationRouter::new();
        let msg = SyncMessage::Create(EntityCreateMessage {
            entity_id: 4,
            entity_type: "ship".to_string(),
            initial_transform: Transform::IDENTITY.into(),
            frame_tick: 1,
        });
        let routed = router.route(&packet(9, &msg));
        assert!(matches!(
            routed,
            Some(RoutedMessage::Create { endpoint: EndpointId(9), ref message }) if message.entity_id == 4
        ));
    }

    #[test]
    fn test_known_entity_resolved() {
        let mut world = World::new();
        let entity = world.spawn_empty().id();
        let mut router = ReplicationRouter::new();
        router.register(NetworkId(3), entity);

        let routed = router.route(&packet(1, &destroy(3)));
        assert!(matches!(routed, Some(RoutedMessage::Destroy { entity: e, .. }) if e == entity));

        router.unregister(NetworkId(3));
        assert!(router.route(&packet(1, &destroy(3))).is_none());
        assert_eq!(router.counters().unknown_entity, 1);
    }

    #[test]
    fn test_unknown_entity_dropped_and_counted() {
        let mut router = ReplicationRouter::new();
        let props = SyncMessage::Properties(EntityPropertiesMessage {
            entity_id: 77,
            ..Default::default()
        });
        assert!(router.route(&packet(1, &props)).is_none());
        assert_eq!(
            router.counters(),
            RouterCounters {
                malformed: 0,
                unknown_entity: 1
            }
        );
    }

    #[test]
    fn test_malformed_packet_counted() {
        let mut router = ReplicationRouter::new();
        let garbage = InboundPacket {
            from: EndpointId(1),
            payload: vec![message::PROTOCOL_VERSION],
        };
        assert!(router.route(&garbage).is_none());

        let wrong_protocol = InboundPacket {
            from: EndpointId(1),
            payload: vec![message::PROTOCOL_VERSION, 99],
        };
        assert!(router.route(&wrong_protocol).is_none());
        assert_eq!(router.counters().malformed, 2);
    }
}
