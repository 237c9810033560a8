//! Per-entity synchronisation ledger.
//!
//! Collaborators declare named properties every tick. Names are interned once
//! into dense [`PropertyId`]s indexing a flat vector, so the per-tick path
//! never hashes strings after the first declaration when callers refresh
//! values through [`SyncLedger::set_value`].
//!
//! Each tick the orchestrator calls [`SyncLedger::detect_changes`] once, then
//! [`SyncLedger::evaluate_and_collect`] for every known endpoint, then
//! [`SyncLedger::mark_sent`] for what it actually handed to the transport.

use rustc_hash::FxHashMap;

use crate::authority::{Audience, AuthorityState, Side};
use crate::id::{EndpointId, Tick};
use crate::time_machine::TimeMachine;
use crate::value::{Value, WireType};

// ---------------------------------------------------------------------------
// PropertyId / declarations
// ---------------------------------------------------------------------------

/// Dense per-entity index of a declared property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(pub u32);

impl PropertyId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Everything a collaborator states about one property for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDeclaration {
    /// Unique (per entity) property name.
    pub name: String,
    /// Minimum number of ticks between two change sends to one endpoint.
    pub refresh_interval: u32,
    /// The property's value this tick.
    pub value: Value,
    /// Depth of the receive-side smoothing history, if smoothing is wanted.
    pub history_depth: Option<usize>,
    /// Which endpoints receive the property.
    pub audience: Audience,
}

impl PropertyDeclaration {
    /// A property sent to every endpoint without smoothing.
    pub fn new(name: impl Into<String>, refresh_interval: u32, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            refresh_interval,
            value: value.into(),
            history_depth: None,
            audience: Audience::All,
        }
    }

    /// Smooth received values through a history of `depth` samples.
    pub fn with_history(mut self, depth: usize) -> Self {
        self.history_depth = Some(depth);
        self
    }

    /// Restrict the property to `audience`.
    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }
}

// ---------------------------------------------------------------------------
// Per-endpoint bookkeeping
// ---------------------------------------------------------------------------

/// Send/receive state of one property towards one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointSyncState {
    /// Tick of the last send to this endpoint.
    pub last_sent_tick: Option<Tick>,
    /// The bootstrap value has been sent.
    pub has_done_initial_sync: bool,
    /// The endpoint has delivered at least one value for this property.
    pub has_received_initial_sync: bool,
    /// A change was detected that this endpoint has not been sent yet.
    pub pending_change: bool,
}

// ---------------------------------------------------------------------------
// SynchronisedProperty
// ---------------------------------------------------------------------------

/// One ledger entry.
#[derive(Debug, Clone)]
pub struct SynchronisedProperty {
    name: String,
    refresh_interval: u32,
    last_value: Value,
    current_value: Value,
    wire_type: Option<WireType>,
    audience: Audience,
    history_depth: Option<usize>,
    history: Option<TimeMachine<Value>>,
    endpoints: FxHashMap<EndpointId, EndpointSyncState>,
}

impl SynchronisedProperty {
    fn new(decl: PropertyDeclaration) -> Self {
        Self {
            name: decl.name,
            refresh_interval: decl.refresh_interval,
            last_value: decl.value.clone(),
            wire_type: (!decl.value.is_none()).then(|| decl.value.wire_type()),
            current_value: decl.value,
            audience: decl.audience,
            history_depth: decl.history_depth,
            history: None,
            endpoints: FxHashMap::default(),
        }
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimum ticks between change sends.
    pub fn refresh_interval(&self) -> u32 {
        self.refresh_interval
    }

    /// The value declared this tick.
    pub fn current_value(&self) -> &Value {
        &self.current_value
    }

    /// The value as of the previous change detection.
    pub fn last_value(&self) -> &Value {
        &self.last_value
    }

    /// Wire type pinned by the first non-`None` value. A property may go
    /// back to `None`, but never to another wire type.
    pub fn wire_type(&self) -> Option<WireType> {
        self.wire_type
    }

    /// `true` if `value` fits the pinned wire type, pinning it on the first
    /// non-`None` value.
    fn pin_wire_type(&mut self, value: &Value) -> bool {
        if value.is_none() {
            return true;
        }
        let incoming = value.wire_type();
        match self.wire_type {
            Some(pinned) => pinned == incoming,
            None => {
                self.wire_type = Some(incoming);
                true
            }
        }
    }

    /// Who receives this property.
    pub fn audience(&self) -> Audience {
        self.audience
    }

    /// Configured smoothing depth.
    pub fn history_depth(&self) -> Option<usize> {
        self.history_depth
    }

    /// The smoothing history, once created.
    pub fn history(&self) -> Option<&TimeMachine<Value>> {
        self.history.as_ref()
    }

    /// Bookkeeping towards `endpoint`, if the endpoint was ever evaluated.
    pub fn endpoint_state(&self, endpoint: EndpointId) -> Option<&EndpointSyncState> {
        self.endpoints.get(&endpoint)
    }

    /// Records an inbound value and returns the value to show at `display_tick`.
    ///
    /// With a smoothing depth and no local authority the value goes through
    /// the history (created on first use); otherwise it is returned unchanged.
    pub(crate) fn record_inbound(
        &mut self,
        tick: Tick,
        value: Value,
        local_authoritative: bool,
        display_tick: Tick,
    ) -> Value {
        let Some(depth) = self.history_depth.filter(|_| !local_authoritative) else {
            return value;
        };
        let history = self.history.get_or_insert_with(|| TimeMachine::new(depth));
        history.insert(tick, value);
        history.get(display_tick).unwrap_or_default()
    }

    fn throttle_elapsed(&self, state: &EndpointSyncState, tick: Tick) -> bool {
        match state.last_sent_tick {
            None => true,
            Some(last) => u64::from(last) + u64::from(self.refresh_interval) < u64::from(tick),
        }
    }
}

// ---------------------------------------------------------------------------
// EvaluationContext
// ---------------------------------------------------------------------------

/// Authority facts the ledger needs to decide what to send.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// Which side this process is.
    pub side: Side,
    /// The entity's authority state.
    pub authority: &'a AuthorityState,
}

// ---------------------------------------------------------------------------
// SyncLedger
// ---------------------------------------------------------------------------

/// Table of every property declared on one entity.
#[derive(Debug, Clone, Default)]
pub struct SyncLedger {
    properties: Vec<SynchronisedProperty>,
    index: FxHashMap<String, PropertyId>,
}

impl SyncLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares (or re-declares) a property. Repeated declarations of one
    /// name before evaluation overwrite each other; the last one wins.
    ///
    /// The first non-`None` value pins the property's wire type. Changing it
    /// later, even by way of `None`, is a programming error: it panics in
    /// debug builds and is ignored (logged) in release builds.
    pub fn declare(&mut self, decl: PropertyDeclaration) -> PropertyId {
        if let Some(&id) = self.index.get(decl.name.as_str()) {
            let entry = &mut self.properties[id.index()];
            if !entry.pin_wire_type(&decl.value) {
                report_wire_type_change(entry, &decl.value);
                return id;
            }
            entry.refresh_interval = decl.refresh_interval;
            entry.current_value = decl.value;
            entry.audience = decl.audience;
            if entry.history_depth != decl.history_depth {
                entry.history_depth = decl.history_depth;
                entry.history = None;
            }
            return id;
        }

        let id = PropertyId(self.properties.len() as u32);
        tracing::trace!(name = %decl.name, ?id, "declared synchronised property");
        self.index.insert(decl.name.clone(), id);
        self.properties.push(SynchronisedProperty::new(decl));
        id
    }

    /// Refreshes the current value of an already-declared property.
    /// Returns `false` for an unknown id or a rejected wire type change.
    pub fn set_value(&mut self, id: PropertyId, value: Value) -> bool {
        let Some(entry) = self.properties.get_mut(id.index()) else {
            return false;
        };
        if !entry.pin_wire_type(&value) {
            report_wire_type_change(entry, &value);
            return false;
        }
        entry.current_value = value;
        true
    }

    /// Looks up a property by name.
    pub fn lookup(&self, name: &str) -> Option<PropertyId> {
        self.index.get(name).copied()
    }

    /// Returns a declared property.
    pub fn get(&self, id: PropertyId) -> Option<&SynchronisedProperty> {
        self.properties.get(id.index())
    }

    pub(crate) fn get_mut(&mut self, id: PropertyId) -> Option<&mut SynchronisedProperty> {
        self.properties.get_mut(id.index())
    }

    /// Iterates over every property with its id.
    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &SynchronisedProperty)> {
        self.properties
            .iter()
            .enumerate()
            .map(|(i, p)| (PropertyId(i as u32), p))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (PropertyId, &mut SynchronisedProperty)> {
        self.properties
            .iter_mut()
            .enumerate()
            .map(|(i, p)| (PropertyId(i as u32), p))
    }

    /// Number of declared properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns `true` if nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Runs change detection once for this tick: every property whose value
    /// is not bit-identical to the previous tick's (see [`Value::same_as`]) gets a pending change towards every
    /// tracked endpoint, then `last_value` advances for every property
    /// regardless of what will be sent.
    pub fn detect_changes(&mut self) {
        for entry in &mut self.properties {
            if !entry.current_value.same_as(&entry.last_value) {
                for state in entry.endpoints.values_mut() {
                    state.pending_change = true;
                }
                entry.last_value.clone_from(&entry.current_value);
            }
        }
    }

    /// Returns the properties that must be sent to `endpoint` this tick.
    ///
    /// Per property, in order: the audience filter, the initial-sync
    /// override (bootstrap), the change + throttle test, and finally the
    /// trusted-owner suppression, which only applies once the owner has both
    /// been bootstrapped and delivered a value of its own.
    pub fn evaluate_and_collect(
        &mut self,
        endpoint: EndpointId,
        tick: Tick,
        ctx: &EvaluationContext<'_>,
    ) -> Vec<PropertyId> {
        let mut selected = Vec::new();
        let suppress_owner = ctx.authority.suppresses_owner_resend(ctx.side, endpoint);

        for (i, entry) in self.properties.iter_mut().enumerate() {
            if ctx.side == Side::Server && !ctx.authority.audience_allows(entry.audience, endpoint) {
                continue;
            }

            let state = *entry.endpoints.entry(endpoint).or_default();
            let bootstrap = !state.has_done_initial_sync;

            if !bootstrap && suppress_owner && state.has_received_initial_sync {
                continue;
            }

            if bootstrap || (state.pending_change && entry.throttle_elapsed(&state, tick)) {
                selected.push(PropertyId(i as u32));
            }
        }

        selected
    }

    /// `true` if any of `ids` has not been bootstrapped to `endpoint` yet.
    pub fn includes_bootstrap(&self, endpoint: EndpointId, ids: &[PropertyId]) -> bool {
        ids.iter().any(|id| {
            self.get(*id)
                .and_then(|p| p.endpoints.get(&endpoint))
                .is_none_or(|s| !s.has_done_initial_sync)
        })
    }

    /// Records that `ids` were handed to the transport for `endpoint` at `tick`.
    pub fn mark_sent(&mut self, endpoint: EndpointId, ids: &[PropertyId], tick: Tick) {
        for id in ids {
            if let Some(entry) = self.properties.get_mut(id.index()) {
                let state = entry.endpoints.entry(endpoint).or_default();
                state.last_sent_tick = Some(tick);
                state.has_done_initial_sync = true;
                state.pending_change = false;
            }
        }
    }

    /// Records that `endpoint` delivered a value for `id`.
    pub fn mark_received(&mut self, id: PropertyId, endpoint: EndpointId) {
        if let Some(entry) = self.properties.get_mut(id.index()) {
            entry.endpoints.entry(endpoint).or_default().has_received_initial_sync = true;
        }
    }

    /// Drops every piece of state kept for `endpoint`.
    pub fn forget_endpoint(&mut self, endpoint: EndpointId) {
        for entry in &mut self.properties {
            entry.endpoints.remove(&endpoint);
        }
    }
}

fn report_wire_type_change(entry: &SynchronisedProperty, new: &Value) {
    let name = entry.name.as_str();
    tracing::error!(
        property = name,
        from = ?entry.wire_type,
        to = ?new.wire_type(),
        "synchronised property changed wire type"
    );
    debug_assert!(
        false,
        "property `{name}` changed wire type from {:?} to {:?}",
        entry.wire_type,
        new.wire_type()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::ClientAuthoritativeMode;

    const X: EndpointId = EndpointId(10);
    const OWNER: EndpointId = EndpointId(20);

    fn server(auth: &AuthorityState) -> EvaluationContext<'_> {
        EvaluationContext {
            side: Side::Server,
            authority: auth,
        }
    }

    /// Runs one tick for a single endpoint the way the orchestrator does.
    fn run_tick(ledger: &mut SyncLedger, endpoint: EndpointId, tick: Tick, auth: &AuthorityState) -> Vec<PropertyId> {
        ledger.detect_changes();
        let ids = ledger.evaluate_and_collect(endpoint, tick, &server(auth));
        ledger.mark_sent(endpoint, &ids, tick);
        ids
    }

    #[test]
    fn test_bootstrap_includes_unchanged_properties() {
        let auth = AuthorityState::new();
        let mut ledger = SyncLedger::new();
        let hp = ledger.declare(PropertyDeclaration::new("hp", 10, 100i32));
        let name = ledger.declare(PropertyDeclaration::new("name", 10, "Kestrel"));

        assert_eq!(run_tick(&mut ledger, X, 1, &auth), vec![hp, name]);
        assert!(run_tick(&mut ledger, X, 2, &auth).is_empty());

        // A second endpoint gets its own bootstrap.
        assert_eq!(run_tick(&mut ledger, OWNER, 3, &auth), vec![hp, name]);
    }

    #[test]
    fn test_unchanged_value_never_resent() {
        let auth = AuthorityState::new();
        let mut ledger = SyncLedger::new();
        ledger.declare(PropertyDeclaration::new("hp", 2, 100i32));
        run_tick(&mut ledger, X, 1, &auth);
        for tick in 2..50 {
            ledger.declare(PropertyDeclaration::new("hp", 2, 100i32));
            assert!(run_tick(&mut ledger, X, tick, &auth).is_empty(), "tick {tick}");
        }
    }

    #[test]
    fn test_change_is_throttled_then_sent_once() {
        let auth = AuthorityState::new();
        let mut ledger = SyncLedger::new();
        let hp = ledger.declare(PropertyDeclaration::new("hp", 10, 100i32));

        assert_eq!(run_tick(&mut ledger, X, 1, &auth), vec![hp]);
        assert!(run_tick(&mut ledger, X, 2, &auth).is_empty());

        ledger.set_value(hp, Value::Int32(80));
        assert!(run_tick(&mut ledger, X, 3, &auth).is_empty());
        for tick in 4..12 {
            assert!(run_tick(&mut ledger, X, tick, &auth).is_empty(), "tick {tick}");
        }
        assert_eq!(run_tick(&mut ledger, X, 12, &auth), vec![hp]);
        assert!(run_tick(&mut ledger, X, 13, &auth).is_empty());
        assert_eq!(ledger.get(hp).unwrap().last_value(), &Value::Int32(80));
    }

    #[test]
    fn test_change_detection_runs_once_for_many_endpoints() {
        let auth = AuthorityState::new();
        let mut ledger = SyncLedger::new();
        let hp = ledger.declare(PropertyDeclaration::new("hp", 0, 1i32));
        let ctx = server(&auth);

        for (endpoint, tick) in [(X, 1), (OWNER, 1)] {
            let ids = ledger.evaluate_and_collect(endpoint, tick, &ctx);
            ledger.mark_sent(endpoint, &ids, tick);
        }

        ledger.set_value(hp, Value::Int32(2));
        ledger.detect_changes();
        assert_eq!(ledger.evaluate_and_collect(X, 5, &ctx), vec![hp]);
        assert_eq!(ledger.evaluate_and_collect(OWNER, 5, &ctx), vec![hp]);
    }

    #[test]
    fn test_last_declaration_wins() {
        let mut ledger = SyncLedger::new();
        let a = ledger.declare(PropertyDeclaration::new("hp", 10, 1i32));
        let b = ledger.declare(PropertyDeclaration::new("hp", 5, 2i32));
        assert_eq!(a, b);
        assert_eq!(ledger.len(), 1);
        let entry = ledger.get(a).unwrap();
        assert_eq!(entry.current_value(), &Value::Int32(2));
        assert_eq!(entry.refresh_interval(), 5);
        assert_eq!(ledger.lookup("hp"), Some(a));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "changed wire type")]
    fn test_wire_type_change_panics_in_debug() {
        let mut ledger = SyncLedger::new();
        ledger.declare(PropertyDeclaration::new("hp", 10, 1i32));
        ledger.declare(PropertyDeclaration::new("hp", 10, 1.0f32));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "changed wire type")]
    fn test_wire_type_change_through_none_panics_in_debug() {
        let mut ledger = SyncLedger::new();
        ledger.declare(PropertyDeclaration::new("hp", 10, 1i32));
        ledger.declare(PropertyDeclaration::new("hp", 10, Value::None));
        ledger.declare(PropertyDeclaration::new("hp", 10, 2.5f32));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "changed wire type")]
    fn test_set_value_checks_pinned_wire_type() {
        let mut ledger = SyncLedger::new();
        let hp = ledger.declare(PropertyDeclaration::new("hp", 10, 1i32));
        ledger.set_value(hp, Value::None);
        ledger.set_value(hp, Value::Single(2.5));
    }

    #[test]
    fn test_none_keeps_the_pinned_wire_type() {
        let mut ledger = SyncLedger::new();
        let target = ledger.declare(PropertyDeclaration::new("target", 10, Value::None));
        assert_eq!(ledger.get(target).unwrap().wire_type(), None);

        ledger.declare(PropertyDeclaration::new("target", 10, "Raider"));
        ledger.declare(PropertyDeclaration::new("target", 10, Value::None));
        assert!(ledger.set_value(target, Value::from("Kestrel")));

        let entry = ledger.get(target).unwrap();
        assert_eq!(entry.wire_type(), Some(WireType::String));
        assert_eq!(entry.current_value(), &Value::from("Kestrel"));
    }

    #[test]
    fn test_unchanged_nan_is_not_resent() {
        let auth = AuthorityState::new();
        let mut ledger = SyncLedger::new();
        ledger.declare(PropertyDeclaration::new("speed", 0, f32::NAN));

        let mut sends = 0;
        for tick in 1..=10 {
            ledger.declare(PropertyDeclaration::new("speed", 0, f32::NAN));
            sends += run_tick(&mut ledger, X, tick, &auth).len();
        }
        assert_eq!(sends, 1);
    }

    #[test]
    fn test_sign_of_zero_is_a_change() {
        let auth = AuthorityState::new();
        let mut ledger = SyncLedger::new();
        let heading = ledger.declare(PropertyDeclaration::new("heading", 0, 0.0f32));
        assert_eq!(run_tick(&mut ledger, X, 1, &auth), vec![heading]);

        ledger.set_value(heading, Value::Single(-0.0));
        assert_eq!(run_tick(&mut ledger, X, 2, &auth), vec![heading]);
        assert!(run_tick(&mut ledger, X, 3, &auth).is_empty());
    }

    #[test]
    fn test_audience_filters_endpoints() {
        let mut auth = AuthorityState::new();
        auth.set_owning_endpoint(Some(OWNER));
        let mut ledger = SyncLedger::new();
        let all = ledger.declare(PropertyDeclaration::new("all", 1, 1i32));
        let owner_only =
            ledger.declare(PropertyDeclaration::new("ammo", 1, 2i32).with_audience(Audience::OwnerOnly));
        let others =
            ledger.declare(PropertyDeclaration::new("tag", 1, 3i32).with_audience(Audience::NonOwnersOnly));

        let ctx = server(&auth);
        assert_eq!(ledger.evaluate_and_collect(OWNER, 1, &ctx), vec![all, owner_only]);
        assert_eq!(ledger.evaluate_and_collect(X, 1, &ctx), vec![all, others]);
    }

    #[test]
    fn test_trusted_owner_suppressed_after_it_delivers() {
        let mut auth = AuthorityState::new();
        auth.set_mode(ClientAuthoritativeMode::TrustClient).unwrap();
        auth.set_owning_endpoint(Some(OWNER));
        let mut ledger = SyncLedger::new();
        let pos = ledger.declare(PropertyDeclaration::new("pos", 0, 1.0f32));

        // Bootstrap reaches the owner and the bystander.
        assert_eq!(run_tick(&mut ledger, OWNER, 1, &auth), vec![pos]);
        assert_eq!(run_tick(&mut ledger, X, 1, &auth), vec![pos]);

        // Before the owner has delivered anything, changes still flow to it.
        ledger.set_value(pos, Value::Single(2.0));
        ledger.detect_changes();
        assert_eq!(ledger.evaluate_and_collect(OWNER, 3, &server(&auth)), vec![pos]);

        // Once the owner drives the value, only bystanders get changes.
        ledger.mark_received(pos, OWNER);
        ledger.set_value(pos, Value::Single(3.0));
        ledger.detect_changes();
        assert!(ledger.evaluate_and_collect(OWNER, 5, &server(&auth)).is_empty());
        assert_eq!(ledger.evaluate_and_collect(X, 5, &server(&auth)), vec![pos]);
    }

    #[test]
    fn test_bootstrap_flag_and_forget_endpoint() {
        let auth = AuthorityState::new();
        let mut ledger = SyncLedger::new();
        let hp = ledger.declare(PropertyDeclaration::new("hp", 0, 1i32));
        let ids = ledger.evaluate_and_collect(X, 1, &server(&auth));
        assert!(ledger.includes_bootstrap(X, &ids));
        ledger.mark_sent(X, &ids, 1);
        assert!(!ledger.includes_bootstrap(X, &ids));
        assert!(ledger.get(hp).unwrap().endpoint_state(X).unwrap().has_done_initial_sync);

        ledger.forget_endpoint(X);
        assert!(ledger.get(hp).unwrap().endpoint_state(X).is_none());
        assert_eq!(ledger.evaluate_and_collect(X, 2, &server(&auth)), vec![hp]);
    }

    #[test]
    fn test_smoothing_history_created_lazily() {
        let mut ledger = SyncLedger::new();
        let id = ledger.declare(PropertyDeclaration::new("speed", 0, 0.0f32).with_history(4));
        assert!(ledger.get(id).unwrap().history().is_none());

        let entry = ledger.get_mut(id).unwrap();
        assert_eq!(entry.record_inbound(10, Value::Single(0.0), false, 10), Value::Single(0.0));
        assert_eq!(entry.record_inbound(20, Value::Single(10.0), false, 15), Value::Single(5.0));
        assert_eq!(entry.history().unwrap().len(), 2);

        // With local authority the value bypasses the history.
        assert_eq!(entry.record_inbound(30, Value::Single(7.0), true, 15), Value::Single(7.0));
        assert_eq!(entry.history().unwrap().len(), 2);
    }
}
