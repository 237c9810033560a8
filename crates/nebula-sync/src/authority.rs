//! Authority and visibility rules for one replicated entity.
//!
//! The server owns the canonical state by default. An entity may instead
//! trust its owning client: the owner originates property values, the
//! server applies them and relays them to everyone else.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::id::EndpointId;

/// Which half of the connection this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The authority: allocates ids and broadcasts state.
    Server,
    /// A peer that mirrors server state.
    Client,
}

impl Side {
    /// Lower-case name, for log and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

/// How much a client is trusted to drive an entity's state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientAuthoritativeMode {
    /// The server is the only source of truth.
    #[default]
    None,
    /// The owning client's property values are applied as-is.
    TrustClient,
    /// The owning client sends inputs the server replays. Not implemented;
    /// rejected by [`AuthorityState::set_mode`].
    ReplayInputs,
}

/// Which endpoints a property is sent to, relative to the entity's owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Audience {
    /// Every known endpoint.
    #[default]
    All,
    /// Only the owning endpoint.
    OwnerOnly,
    /// Every known endpoint except the owner.
    NonOwnersOnly,
}

/// Outcome of checking an inbound properties message against authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundVerdict {
    /// Apply the values.
    Accept,
    /// The sender is not allowed to drive this entity.
    Unauthorised,
    /// The entity's mode has no inbound path; drop without applying.
    Unsupported,
}

/// Per-entity authority state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityState {
    mode: ClientAuthoritativeMode,
    owning_endpoint: Option<EndpointId>,
    visible_only_to_owner: bool,
    locally_owned: bool,
}

impl AuthorityState {
    /// Server-authoritative, unowned, visible to everyone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current client-authoritative mode.
    pub fn mode(&self) -> ClientAuthoritativeMode {
        self.mode
    }

    /// Sets the client-authoritative mode. [`ClientAuthoritativeMode::ReplayInputs`]
    /// is rejected rather than silently behaving like `TrustClient`.
    pub fn set_mode(&mut self, mode: ClientAuthoritativeMode) -> Result<(), SyncError> {
        if mode == ClientAuthoritativeMode::ReplayInputs {
            return Err(SyncError::UnsupportedAuthorityMode(mode));
        }
        self.mode = mode;
        Ok(())
    }

    /// The endpoint that owns the entity, if any.
    pub fn owning_endpoint(&self) -> Option<EndpointId> {
        self.owning_endpoint
    }

    /// Sets or clears the owning endpoint.
    pub fn set_owning_endpoint(&mut self, owner: Option<EndpointId>) {
        self.owning_endpoint = owner;
    }

    /// Whether only the owner learns about the entity at all.
    pub fn visible_only_to_owner(&self) -> bool {
        self.visible_only_to_owner
    }

    /// Restricts (or lifts the restriction on) visibility to the owner.
    pub fn set_visible_only_to_owner(&mut self, visible_only_to_owner: bool) {
        self.visible_only_to_owner = visible_only_to_owner;
    }

    /// Client side: whether this process owns the entity.
    pub fn locally_owned(&self) -> bool {
        self.locally_owned
    }

    /// Client side: marks this process as the entity's owner.
    pub fn set_locally_owned(&mut self, locally_owned: bool) {
        self.locally_owned = locally_owned;
    }

    /// `true` if `endpoint` is the owner and the owner is trusted.
    pub fn is_trusted_owner(&self, endpoint: EndpointId) -> bool {
        self.mode == ClientAuthoritativeMode::TrustClient && self.owning_endpoint == Some(endpoint)
    }

    /// Whether this process originates the entity's property values.
    pub fn is_local_authoritative(&self, side: Side) -> bool {
        let trusts_client = self.mode == ClientAuthoritativeMode::TrustClient;
        match side {
            Side::Server => !(trusts_client && self.owning_endpoint.is_some()),
            Side::Client => trusts_client && self.locally_owned,
        }
    }

    /// Whether `endpoint` should learn about the entity at all.
    pub fn is_relevant(&self, endpoint: EndpointId) -> bool {
        !self.visible_only_to_owner || self.owning_endpoint == Some(endpoint)
    }

    /// Whether a property with `audience` may be sent to `endpoint`.
    pub fn audience_allows(&self, audience: Audience, endpoint: EndpointId) -> bool {
        let is_owner = self.owning_endpoint == Some(endpoint);
        match audience {
            Audience::All => true,
            Audience::OwnerOnly => is_owner,
            Audience::NonOwnersOnly => !is_owner,
        }
    }

    /// Whether the server should stop re-sending changes to `endpoint`
    /// because it is the trusted owner and drives the values itself.
    pub fn suppresses_owner_resend(&self, side: Side, endpoint: EndpointId) -> bool {
        side == Side::Server && self.is_trusted_owner(endpoint)
    }

    /// Checks whether a properties message from `sender` may be applied.
    pub fn inbound_verdict(&self, side: Side, sender: EndpointId, is_client_message: bool) -> InboundVerdict {
        match side {
            Side::Client if is_client_message => InboundVerdict::Unauthorised,
            Side::Client => InboundVerdict::Accept,
            Side::Server if !is_client_message => InboundVerdict::Unauthorised,
            Side::Server => match self.mode {
                ClientAuthoritativeMode::None => InboundVerdict::Unauthorised,
                ClientAuthoritativeMode::ReplayInputs => InboundVerdict::Unsupported,
                ClientAuthoritativeMode::TrustClient if self.owning_endpoint == Some(sender) => {
                    InboundVerdict::Accept
                }
                ClientAuthoritativeMode::TrustClient => InboundVerdict::Unauthorised,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: EndpointId = EndpointId(1);
    const B: EndpointId = EndpointId(2);

    fn trusted_by(owner: EndpointId) -> AuthorityState {
        let mut auth = AuthorityState::new();
        auth.set_mode(ClientAuthoritativeMode::TrustClient).unwrap();
        auth.set_owning_endpoint(Some(owner));
        auth
    }

    #[test]
    fn test_replay_inputs_rejected() {
        let mut auth = AuthorityState::new();
        assert_eq!(
            auth.set_mode(ClientAuthoritativeMode::ReplayInputs),
            Err(SyncError::UnsupportedAuthorityMode(
                ClientAuthoritativeMode::ReplayInputs
            ))
        );
        assert_eq!(auth.mode(), ClientAuthoritativeMode::None);
    }

    #[test]
    fn test_server_accepts_only_trusted_owner() {
        let auth = trusted_by(A);
        assert_eq!(auth.inbound_verdict(Side::Server, A, true), InboundVerdict::Accept);
        assert_eq!(auth.inbound_verdict(Side::Server, B, true), InboundVerdict::Unauthorised);
        assert_eq!(auth.inbound_verdict(Side::Server, A, false), InboundVerdict::Unauthorised);
    }

    #[test]
    fn test_server_authoritative_rejects_clients() {
        let mut auth = AuthorityState::new();
        auth.set_owning_endpoint(Some(A));
        assert_eq!(auth.inbound_verdict(Side::Server, A, true), InboundVerdict::Unauthorised);
    }

    #[test]
    fn test_client_accepts_server_messages_only() {
        let auth = AuthorityState::new();
        assert_eq!(auth.inbound_verdict(Side::Client, A, false), InboundVerdict::Accept);
        assert_eq!(auth.inbound_verdict(Side::Client, A, true), InboundVerdict::Unauthorised);
    }

    #[test]
    fn test_local_authority() {
        let mut auth = AuthorityState::new();
        assert!(auth.is_local_authoritative(Side::Server));
        assert!(!auth.is_local_authoritative(Side::Client));

        auth = trusted_by(A);
        assert!(!auth.is_local_authoritative(Side::Server));
        assert!(!auth.is_local_authoritative(Side::Client));
        auth.set_locally_owned(true);
        assert!(auth.is_local_authoritative(Side::Client));
    }

    #[test]
    fn test_audience_relative_to_owner() {
        let mut auth = AuthorityState::new();
        auth.set_owning_endpoint(Some(A));
        assert!(auth.audience_allows(Audience::All, B));
        assert!(auth.audience_allows(Audience::OwnerOnly, A));
        assert!(!auth.audience_allows(Audience::OwnerOnly, B));
        assert!(auth.audience_allows(Audience::NonOwnersOnly, B));
        assert!(!auth.audience_allows(Audience::NonOwnersOnly, A));
    }

    #[test]
    fn test_visibility_limited_to_owner() {
        let mut auth = AuthorityState::new();
        auth.set_owning_endpoint(Some(A));
        assert!(auth.is_relevant(B));
        auth.set_visible_only_to_owner(true);
        assert!(auth.is_relevant(A));
        assert!(!auth.is_relevant(B));
    }

    #[test]
    fn test_owner_resend_suppressed_on_server_only() {
        let auth = trusted_by(A);
        assert!(auth.suppresses_owner_resend(Side::Server, A));
        assert!(!auth.suppresses_owner_resend(Side::Server, B));
        assert!(!auth.suppresses_owner_resend(Side::Client, A));
    }
}
