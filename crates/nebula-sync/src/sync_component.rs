//! Per-entity replication orchestrator.
//!
//! A [`SyncComponent`] sits on every replicated entity. On the server it
//! allocates the entity's [`NetworkId`], announces the entity to each
//! relevant endpoint with an [`EntityCreateMessage`], and then sends every
//! known endpoint the properties the [`SyncLedger`] selects. On a client it
//! stays idle until [`SyncComponent::receive_network_id`] is called, applies
//! inbound values through a [`SyncTarget`], and sends its own values back
//! only when the server trusts it with the entity.
//!
//! Per tick, callers:
//! 1. drain inbound packets and feed them to [`SyncComponent::receive_properties`],
//! 2. declare the current value of every property,
//! 3. call [`SyncComponent::update`].

use bevy_ecs::prelude::*;
use rustc_hash::FxHashSet;

use crate::authority::{Audience, AuthorityState, ClientAuthoritativeMode, InboundVerdict, Side};
use crate::codec::{self, CodecError};
use crate::engine::NetworkEngine;
use crate::error::SyncError;
use crate::id::{DispatcherId, EndpointId, NetworkId, NetworkIdAllocator, Tick};
use crate::ledger::{EvaluationContext, PropertyDeclaration, PropertyId, SyncLedger};
use crate::message::{
    self, ENTITY_PROPERTIES, EntityCreateMessage, EntityDestroyMessage, EntityPropertiesMessage, SyncMessage,
};
use crate::settings::SyncSettings;
use crate::value::{Transform, Value, WireType};

// ---------------------------------------------------------------------------
// SyncTarget
// ---------------------------------------------------------------------------

/// Receives property values decoded from the network.
pub trait SyncTarget {
    /// Applies `value` to the local state behind property `id`.
    fn apply(&mut self, id: PropertyId, name: &str, value: &Value);
}

impl<F> SyncTarget for F
where
    F: FnMut(PropertyId, &str, &Value),
{
    fn apply(&mut self, id: PropertyId, name: &str, value: &Value) {
        self(id, name, value)
    }
}

// ---------------------------------------------------------------------------
// Stats / outcomes
// ---------------------------------------------------------------------------

/// Replication counters for one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// EntityCreate messages sent.
    pub creates_sent: u64,
    /// EntityProperties messages sent.
    pub property_messages_sent: u64,
    /// Individual property values sent.
    pub properties_sent: u64,
    /// EntityDestroy messages sent.
    pub destroys_sent: u64,
    /// Inbound property messages that were applied.
    pub messages_applied: u64,
    /// Individual property values applied.
    pub properties_applied: u64,
    /// Inbound messages rejected by authority rules.
    pub dropped_unauthorised: u64,
    /// Inbound messages for an entity that is not replicated yet, or another entity.
    pub dropped_unknown_entity: u64,
    /// Inbound values naming a property the ledger does not have.
    pub dropped_unknown_property: u64,
    /// Inbound values whose wire type contradicts the property's pinned one.
    pub dropped_wrong_wire_type: u64,
    /// Inbound messages that failed to decode.
    pub dropped_malformed: u64,
    /// Inbound messages for an authority mode with no inbound path.
    pub dropped_unsupported: u64,
}

/// Result of [`SyncComponent::receive_properties`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The message was decoded and its known properties applied.
    Applied {
        /// Values handed to the target.
        applied: usize,
        /// Values naming properties the ledger does not have, or carrying
        /// the wrong wire type.
        skipped: usize,
    },
    /// The entity has no network id yet.
    NotReplicated,
    /// The message names a different entity.
    WrongEntity,
    /// Authority rules forbid the sender.
    Unauthorised,
    /// The entity's authority mode has no inbound path.
    Unsupported,
    /// The message could not be decoded.
    Malformed,
}

// ---------------------------------------------------------------------------
// SyncComponent
// ---------------------------------------------------------------------------

/// Replication state of one entity.
#[derive(Component, Debug)]
pub struct SyncComponent {
    entity: Entity,
    entity_type: String,
    side: Side,
    dispatcher: DispatcherId,
    network_id: Option<NetworkId>,
    initial_tick: Option<Tick>,
    authority: AuthorityState,
    ledger: SyncLedger,
    known_endpoints: FxHashSet<EndpointId>,
    transform: Transform,
    settings: SyncSettings,
    stats: SyncStats,
}

impl SyncComponent {
    /// Creates the replication state for `entity`, announced to peers as
    /// `entity_type`.
    pub fn new(entity: Entity, entity_type: impl Into<String>, side: Side, settings: SyncSettings) -> Self {
        Self {
            entity,
            entity_type: entity_type.into(),
            side,
            dispatcher: DispatcherId::default(),
            network_id: None,
            initial_tick: None,
            authority: AuthorityState::new(),
            ledger: SyncLedger::new(),
            known_endpoints: FxHashSet::default(),
            transform: Transform::IDENTITY,
            settings,
            stats: SyncStats::default(),
        }
    }

    /// Replicate over `dispatcher` instead of the default one.
    pub fn with_dispatcher(mut self, dispatcher: DispatcherId) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Transform announced in EntityCreate messages.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    // -- accessors ----------------------------------------------------------

    /// The entity this component replicates.
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Entity type tag sent in EntityCreate.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Which side this component runs on.
    pub fn side(&self) -> Side {
        self.side
    }

    /// The dispatcher whose endpoints receive this entity.
    pub fn dispatcher(&self) -> DispatcherId {
        self.dispatcher
    }

    /// Assigned network id, if any.
    pub fn network_id(&self) -> Option<NetworkId> {
        self.network_id
    }

    /// Client side: authority tick at which the entity became known.
    pub fn initial_tick(&self) -> Option<Tick> {
        self.initial_tick
    }

    /// Authority state.
    pub fn authority(&self) -> &AuthorityState {
        &self.authority
    }

    /// The property ledger.
    pub fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    /// Endpoints the entity has been announced to.
    pub fn is_known_by(&self, endpoint: EndpointId) -> bool {
        self.known_endpoints.contains(&endpoint)
    }

    /// Replication counters.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Current settings.
    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    /// Updates the transform announced to endpoints that learn about the
    /// entity from now on.
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    // -- authority ----------------------------------------------------------

    /// Sets the client-authoritative mode and owning endpoint.
    ///
    /// `ReplayInputs` is rejected. On the server, `TrustClient` requires an
    /// owner.
    pub fn set_client_authority(
        &mut self,
        mode: ClientAuthoritativeMode,
        owner: Option<EndpointId>,
    ) -> Result<(), SyncError> {
        if self.side == Side::Server && mode == ClientAuthoritativeMode::TrustClient && owner.is_none() {
            return Err(SyncError::MissingOwner(mode));
        }
        self.authority.set_mode(mode)?;
        self.authority.set_owning_endpoint(owner);
        tracing::debug!(entity = ?self.entity, ?mode, ?owner, "client authority changed");
        Ok(())
    }

    /// Restricts the entity to its owner. Endpoints that lose visibility are
    /// sent an EntityDestroy on the next update.
    pub fn set_visible_only_to_owner(&mut self, visible_only_to_owner: bool) {
        self.authority.set_visible_only_to_owner(visible_only_to_owner);
    }

    /// Client side: marks this process as the entity's owner.
    pub fn set_locally_owned(&mut self, locally_owned: bool) -> Result<(), SyncError> {
        if self.side != Side::Client {
            return Err(SyncError::WrongSide {
                operation: "set_locally_owned",
                expected: Side::Client.as_str(),
            });
        }
        self.authority.set_locally_owned(locally_owned);
        Ok(())
    }

    /// Whether this process originates the entity's values.
    pub fn is_local_authoritative(&self) -> bool {
        self.authority.is_local_authoritative(self.side)
    }

    // -- synchronisation API -----------------------------------------------

    /// Declares a property from a full declaration.
    pub fn declare(&mut self, declaration: PropertyDeclaration) -> PropertyId {
        self.ledger.declare(declaration)
    }

    /// Declares a property sent to every endpoint.
    pub fn synchronise(&mut self, name: &str, refresh_interval: u32, value: impl Into<Value>) -> PropertyId {
        self.declare(PropertyDeclaration::new(name, refresh_interval, value))
    }

    /// Declares a property whose received values are smoothed through a
    /// history of the configured default depth.
    pub fn synchronise_smoothed(&mut self, name: &str, refresh_interval: u32, value: impl Into<Value>) -> PropertyId {
        let depth = self.settings.default_history_depth;
        self.declare(PropertyDeclaration::new(name, refresh_interval, value).with_history(depth))
    }

    /// Declares a property only the owning endpoint receives.
    pub fn synchronise_to_owner(&mut self, name: &str, refresh_interval: u32, value: impl Into<Value>) -> PropertyId {
        self.declare(PropertyDeclaration::new(name, refresh_interval, value).with_audience(Audience::OwnerOnly))
    }

    /// Declares a property every endpoint except the owner receives.
    pub fn synchronise_to_non_owner(
        &mut self,
        name: &str,
        refresh_interval: u32,
        value: impl Into<Value>,
    ) -> PropertyId {
        self.declare(PropertyDeclaration::new(name, refresh_interval, value).with_audience(Audience::NonOwnersOnly))
    }

    /// Refreshes an already-declared property by id.
    pub fn set_value(&mut self, id: PropertyId, value: impl Into<Value>) -> bool {
        self.ledger.set_value(id, value.into())
    }

    /// A view that prefixes every declared name with `namespace.`.
    pub fn scope<'a>(&'a mut self, namespace: &'a str) -> SyncScope<'a> {
        SyncScope {
            component: self,
            namespace,
        }
    }

    // -- per-tick update ----------------------------------------------------

    /// Runs one replication tick: announces the entity where needed and
    /// sends the properties the ledger selects.
    pub fn update(&mut self, tick: Tick, engine: &mut dyn NetworkEngine, allocator: &NetworkIdAllocator) {
        match self.side {
            Side::Server => self.update_server(tick, engine, allocator),
            Side::Client => self.update_client(tick, engine),
        }
    }

    fn update_server(&mut self, tick: Tick, engine: &mut dyn NetworkEngine, allocator: &NetworkIdAllocator) {
        let network_id = match self.network_id {
            Some(id) => id,
            None => {
                let id = allocator.allocate();
                engine.register_network_id(id, self.entity);
                self.network_id = Some(id);
                tracing::debug!(entity = ?self.entity, %id, entity_type = %self.entity_type, "assigned network id");
                id
            }
        };

        let endpoints = engine.current_endpoints(self.dispatcher);

        // Endpoints that left, or can no longer see the entity.
        let stale: Vec<EndpointId> = self
            .known_endpoints
            .iter()
            .copied()
            .filter(|ep| !endpoints.contains(ep) || !self.authority.is_relevant(*ep))
            .collect();
        for endpoint in stale {
            if endpoints.contains(&endpoint) {
                self.send_destroy(engine, endpoint, network_id, tick);
            }
            self.known_endpoints.remove(&endpoint);
            self.ledger.forget_endpoint(endpoint);
            tracing::debug!(%network_id, %endpoint, "endpoint dropped from replication");
        }

        for &endpoint in &endpoints {
            if self.authority.is_relevant(endpoint) && self.known_endpoints.insert(endpoint) {
                let create = EntityCreateMessage {
                    entity_id: network_id.0,
                    entity_type: self.entity_type.clone(),
                    initial_transform: self.transform.into(),
                    frame_tick: tick,
                };
                engine.send(self.dispatcher, endpoint, SyncMessage::Create(create), true);
                self.stats.creates_sent += 1;
                tracing::debug!(%network_id, %endpoint, tick, "entity announced");
            }
        }

        self.ledger.detect_changes();

        for &endpoint in &endpoints {
            if self.known_endpoints.contains(&endpoint) {
                self.send_properties(engine, endpoint, network_id, tick, false);
            }
        }
    }

    fn update_client(&mut self, tick: Tick, engine: &mut dyn NetworkEngine) {
        let Some(network_id) = self.network_id else {
            return;
        };

        self.ledger.detect_changes();

        if !self.is_local_authoritative() {
            return;
        }
        for endpoint in engine.current_endpoints(self.dispatcher) {
            self.send_properties(engine, endpoint, network_id, tick, true);
        }
    }

    fn send_properties(
        &mut self,
        engine: &mut dyn NetworkEngine,
        endpoint: EndpointId,
        network_id: NetworkId,
        tick: Tick,
        is_client_message: bool,
    ) {
        let ctx = EvaluationContext {
            side: self.side,
            authority: &self.authority,
        };
        let ids = self.ledger.evaluate_and_collect(endpoint, tick, &ctx);
        if ids.is_empty() {
            return;
        }

        let reliable = self.ledger.includes_bootstrap(endpoint, &ids);
        let ledger = &self.ledger;
        let entries = ids
            .iter()
            .filter_map(|id| ledger.get(*id))
            .map(|p| (p.name(), p.current_value()));
        let msg = codec::encode(network_id.0, tick, is_client_message, entries);

        tracing::trace!(%network_id, %endpoint, tick, count = ids.len(), reliable, "sending properties");
        engine.send(self.dispatcher, endpoint, SyncMessage::Properties(msg), reliable);
        self.ledger.mark_sent(endpoint, &ids, tick);
        self.stats.property_messages_sent += 1;
        self.stats.properties_sent += ids.len() as u64;
    }

    fn send_destroy(&mut self, engine: &mut dyn NetworkEngine, endpoint: EndpointId, network_id: NetworkId, tick: Tick) {
        let destroy = EntityDestroyMessage {
            entity_id: network_id.0,
            frame_tick: tick,
        };
        engine.send(self.dispatcher, endpoint, SyncMessage::Destroy(destroy), true);
        self.stats.destroys_sent += 1;
    }

    /// Server side: tells every endpoint that knows the entity that it is
    /// gone and forgets the network id mapping.
    pub fn despawn(&mut self, tick: Tick, engine: &mut dyn NetworkEngine) {
        let Some(network_id) = self.network_id else {
            return;
        };
        let mut endpoints: Vec<EndpointId> = self.known_endpoints.drain().collect();
        endpoints.sort_unstable();
        for endpoint in endpoints {
            self.send_destroy(engine, endpoint, network_id, tick);
            self.ledger.forget_endpoint(endpoint);
        }
        engine.unregister_network_id(network_id);
        tracing::debug!(%network_id, tick, "entity despawned");
    }

    // -- inbound ------------------------------------------------------------

    /// Client side: the entity was announced by the server as `id` at
    /// `initial_tick`. Receiving the same id again is a no-op.
    pub fn receive_network_id(&mut self, id: NetworkId, initial_tick: Tick) -> Result<(), SyncError> {
        if self.side != Side::Client {
            return Err(SyncError::WrongSide {
                operation: "receive_network_id",
                expected: Side::Client.as_str(),
            });
        }
        match self.network_id {
            Some(current) if current == id => Ok(()),
            Some(current) => Err(SyncError::NetworkIdAlreadyAssigned { current, received: id }),
            None => {
                self.network_id = Some(id);
                self.initial_tick = Some(initial_tick);
                tracing::debug!(entity = ?self.entity, %id, initial_tick, "network id received");
                Ok(())
            }
        }
    }

    /// Raw handler entry point: `payload` is a message body (the bytes after
    /// the frame header) carrying `protocol_id`. Returns `false` for
    /// protocols this component does not handle.
    pub fn receive(
        &mut self,
        endpoint: EndpointId,
        payload: &[u8],
        protocol_id: u8,
        local_tick: Tick,
        target: &mut dyn SyncTarget,
    ) -> bool {
        if protocol_id != ENTITY_PROPERTIES {
            return false;
        }
        match message::decode_body::<EntityPropertiesMessage>(payload) {
            Ok(msg) => {
                self.receive_properties(endpoint, &msg, local_tick, target);
            }
            Err(e) => {
                self.stats.dropped_malformed += 1;
                tracing::debug!(%endpoint, error = %e, "dropping malformed properties message");
            }
        }
        true
    }

    /// Applies an inbound properties message from `endpoint`.
    ///
    /// Messages the entity must not accept are dropped and counted, never
    /// surfaced as errors.
    pub fn receive_properties(
        &mut self,
        endpoint: EndpointId,
        msg: &EntityPropertiesMessage,
        local_tick: Tick,
        target: &mut dyn SyncTarget,
    ) -> ReceiveOutcome {
        let Some(network_id) = self.network_id else {
            self.stats.dropped_unknown_entity += 1;
            tracing::trace!(entity = ?self.entity, "properties received before network id");
            return ReceiveOutcome::NotReplicated;
        };
        if msg.entity_id != network_id.0 {
            self.stats.dropped_unknown_entity += 1;
            return ReceiveOutcome::WrongEntity;
        }

        match self.authority.inbound_verdict(self.side, endpoint, msg.is_client_message) {
            InboundVerdict::Accept => {}
            InboundVerdict::Unauthorised => {
                self.stats.dropped_unauthorised += 1;
                tracing::trace!(%network_id, %endpoint, "dropping properties from unauthorised sender");
                return ReceiveOutcome::Unauthorised;
            }
            InboundVerdict::Unsupported => {
                self.stats.dropped_unsupported += 1;
                return ReceiveOutcome::Unsupported;
            }
        }

        let decoded = match codec::decode(msg) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.dropped_malformed += 1;
                if let CodecError::UnknownWireType(tag) = e {
                    tracing::error!(%network_id, %endpoint, tag, "unknown wire type tag in properties message");
                    debug_assert!(false, "unknown wire type tag {tag}");
                } else {
                    tracing::debug!(%network_id, %endpoint, error = %e, "dropping malformed properties message");
                }
                return ReceiveOutcome::Malformed;
            }
        };

        let local_authoritative = self.is_local_authoritative();
        let display_tick = local_tick.saturating_sub(self.settings.render_delay_ticks);
        let mut applied = 0;
        let mut skipped = 0;
        let mut wrong_type = 0;

        for property in decoded {
            let Some(id) = self.ledger.lookup(&property.name) else {
                skipped += 1;
                tracing::trace!(%network_id, name = %property.name, "skipping undeclared property");
                continue;
            };
            let pinned = self.ledger.get(id).and_then(|p| p.wire_type());
            if property.wire_type != WireType::None && pinned.is_some_and(|t| t != property.wire_type) {
                wrong_type += 1;
                tracing::debug!(
                    %network_id,
                    %endpoint,
                    name = %property.name,
                    expected = ?pinned,
                    received = ?property.wire_type,
                    "skipping value of the wrong wire type"
                );
                continue;
            }
            self.ledger.mark_received(id, endpoint);
            let Some(entry) = self.ledger.get_mut(id) else {
                continue;
            };
            let value = entry.record_inbound(msg.frame_tick, property.value, local_authoritative, display_tick);
            target.apply(id, &property.name, &value);
            applied += 1;
        }

        self.stats.messages_applied += 1;
        self.stats.properties_applied += applied as u64;
        self.stats.dropped_unknown_property += skipped as u64;
        self.stats.dropped_wrong_wire_type += wrong_type as u64;
        ReceiveOutcome::Applied {
            applied,
            skipped: skipped + wrong_type,
        }
    }

    /// Re-applies the interpolated value of every smoothed property at
    /// `local_tick - render_delay`, so motion continues between packets.
    /// Returns the number of values applied.
    pub fn apply_smoothing(&mut self, local_tick: Tick, target: &mut dyn SyncTarget) -> usize {
        if self.is_local_authoritative() {
            return 0;
        }
        let display_tick = local_tick.saturating_sub(self.settings.render_delay_ticks);
        let mut applied = 0;
        for (id, property) in self.ledger.iter() {
            if let Some(value) = property.history().and_then(|h| h.get(display_tick)) {
                target.apply(id, property.name(), &value);
                applied += 1;
            }
        }
        applied
    }

    /// Reads property `id`'s received history at `tick`. `None` when the
    /// property has no history yet.
    pub fn sample(&self, id: PropertyId, tick: Tick) -> Option<Value> {
        self.ledger.get(id)?.history()?.get(tick)
    }
}

// ---------------------------------------------------------------------------
// SyncScope
// ---------------------------------------------------------------------------

/// Declares properties under a `namespace.` prefix, so several behaviours on
/// one entity can use the same short names.
#[derive(Debug)]
pub struct SyncScope<'a> {
    component: &'a mut SyncComponent,
    namespace: &'a str,
}

impl SyncScope<'_> {
    fn qualify(&self, name: &str) -> String {
        format!("{}.{}", self.namespace, name)
    }

    /// Scoped [`SyncComponent::declare`].
    pub fn declare(&mut self, mut declaration: PropertyDeclaration) -> PropertyId {
        declaration.name = self.qualify(&declaration.name);
        self.component.declare(declaration)
    }

    /// Scoped [`SyncComponent::synchronise`].
    pub fn synchronise(&mut self, name: &str, refresh_interval: u32, value: impl Into<Value>) -> PropertyId {
        self.declare(PropertyDeclaration::new(name, refresh_interval, value))
    }

    /// Scoped [`SyncComponent::synchronise_smoothed`].
    pub fn synchronise_smoothed(&mut self, name: &str, refresh_interval: u32, value: impl Into<Value>) -> PropertyId {
        let depth = self.component.settings.default_history_depth;
        self.declare(PropertyDeclaration::new(name, refresh_interval, value).with_history(depth))
    }

    /// Scoped [`SyncComponent::synchronise_to_owner`].
    pub fn synchronise_to_owner(&mut self, name: &str, refresh_interval: u32, value: impl Into<Value>) -> PropertyId {
        self.declare(PropertyDeclaration::new(name, refresh_interval, value).with_audience(Audience::OwnerOnly))
    }

    /// Scoped [`SyncComponent::synchronise_to_non_owner`].
    pub fn synchronise_to_non_owner(
        &mut self,
        name: &str,
        refresh_interval: u32,
        value: impl Into<Value>,
    ) -> PropertyId {
        self.declare(PropertyDeclaration::new(name, refresh_interval, value).with_audience(Audience::NonOwnersOnly))
    }
}

#[cfg(test)]
#[path = "sync_component_tests.rs"]
mod tests;
