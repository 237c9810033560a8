//! In-process transport connecting [`LoopbackLink`]s through inbound queues.
//!
//! Every send is framed with [`serialize_message`] and delivered through the
//! peer's [`InboundQueue`], so the full wire path runs without sockets.
//! Delivery is always reliable and ordered; the `reliable` flag is only
//! counted.

use bevy_ecs::entity::Entity;

use crate::engine::{InboundPacket, InboundQueue, InboundSender, NetworkEngine, ReplicationRouter, RoutedMessage};
use crate::id::{DispatcherId, EndpointId, NetworkId};
use crate::message::{SyncMessage, serialize_message};

/// Send counters of a [`LoopbackLink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackCounters {
    /// Messages sent with the reliable flag.
    pub reliable: u64,
    /// Messages sent without the reliable flag.
    pub unreliable: u64,
    /// Sends addressed to an endpoint that is not connected.
    pub undeliverable: u64,
}

#[derive(Debug)]
struct Peer {
    dispatcher: DispatcherId,
    endpoint: EndpointId,
    inbox: InboundSender,
}

/// One side of an in-process connection.
#[derive(Debug)]
pub struct LoopbackLink {
    endpoint: EndpointId,
    peers: Vec<Peer>,
    inbound: InboundQueue,
    router: ReplicationRouter,
    counters: LoopbackCounters,
}

impl LoopbackLink {
    /// Creates an unconnected link known to peers as `endpoint`.
    pub fn new(endpoint: EndpointId) -> Self {
        Self {
            endpoint,
            peers: Vec::new(),
            inbound: InboundQueue::new(),
            router: ReplicationRouter::new(),
            counters: LoopbackCounters::default(),
        }
    }

    /// Connects `a` and `b` on `dispatcher`, in both directions.
    pub fn connect(a: &mut LoopbackLink, b: &mut LoopbackLink, dispatcher: DispatcherId) {
        a.peers.push(Peer {
            dispatcher,
            endpoint: b.endpoint,
            inbox: b.inbound.sender(),
        });
        b.peers.push(Peer {
            dispatcher,
            endpoint: a.endpoint,
            inbox: a.inbound.sender(),
        });
        tracing::debug!(a = %a.endpoint, b = %b.endpoint, ?dispatcher, "loopback connected");
    }

    /// Drops `peer` from this link's endpoint directory.
    pub fn disconnect(&mut self, peer: EndpointId) {
        self.peers.retain(|p| p.endpoint != peer);
    }

    /// The id peers see this link as.
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// Producer handle for delivering raw packets to this link.
    pub fn inbox(&self) -> InboundSender {
        self.inbound.sender()
    }

    /// The link's entity router.
    pub fn router(&self) -> &ReplicationRouter {
        &self.router
    }

    /// Mutable access to the router, e.g. to map entities created from
    /// inbound [`RoutedMessage::Create`]s.
    pub fn router_mut(&mut self) -> &mut ReplicationRouter {
        &mut self.router
    }

    /// Send counters.
    pub fn counters(&self) -> LoopbackCounters {
        self.counters
    }

    /// Drains the inbound queue, routing packets one at a time in arrival
    /// order. `handle` may register entities in the router before the next
    /// packet is routed, so a create followed by its first properties in the
    /// same batch resolves. Returns the number of messages handled.
    pub fn poll(&mut self, mut handle: impl FnMut(&mut ReplicationRouter, RoutedMessage)) -> usize {
        let mut handled = 0;
        for packet in self.inbound.drain() {
            if let Some(routed) = self.router.route(&packet) {
                handle(&mut self.router, routed);
                handled += 1;
            }
        }
        handled
    }
}

impl NetworkEngine for LoopbackLink {
    fn send(&mut self, dispatcher: DispatcherId, endpoint: EndpointId, message: SyncMessage, reliable: bool) {
        let Some(peer) = self
            .peers
            .iter()
            .find(|p| p.dispatcher == dispatcher && p.endpoint == endpoint)
        else {
            self.counters.undeliverable += 1;
            tracing::debug!(%endpoint, ?dispatcher, "send to unknown loopback peer");
            return;
        };

        let payload = match serialize_message(&message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to frame replication message");
                return;
            }
        };

        if reliable {
            self.counters.reliable += 1;
        } else {
            self.counters.unreliable += 1;
        }
        if !peer.inbox.push(InboundPacket {
            from: self.endpoint,
            payload,
        }) {
            self.counters.undeliverable += 1;
        }
    }

    fn current_endpoints(&self, dispatcher: DispatcherId) -> Vec<EndpointId> {
        self.peers
            .iter()
            .filter(|p| p.dispatcher == dispatcher)
            .map(|p| p.endpoint)
            .collect()
    }

    fn register_network_id(&mut self, id: NetworkId, entity: Entity) {
        self.router.register(id, entity);
    }

    fn unregister_network_id(&mut self, id: NetworkId) {
        self.router.unregister(id);
    }
}
