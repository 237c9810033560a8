//! Replication error types.

use crate::authority::ClientAuthoritativeMode;
use crate::id::NetworkId;

/// Errors returned by the synchronisation API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The requested client-authoritative mode has no implementation.
    #[error("client authoritative mode {0:?} is not supported")]
    UnsupportedAuthorityMode(ClientAuthoritativeMode),

    /// `TrustClient` was requested without naming the owning endpoint.
    #[error("client authoritative mode {0:?} requires an owning endpoint")]
    MissingOwner(ClientAuthoritativeMode),

    /// A network id arrived for an entity that already has a different one.
    #[error("entity already replicated as {current}, refusing {received}")]
    NetworkIdAlreadyAssigned {
        /// Id the entity already carries.
        current: NetworkId,
        /// Id that was received.
        received: NetworkId,
    },

    /// A client-only operation was called on the server side, or vice versa.
    #[error("{operation} is only valid on the {expected} side")]
    WrongSide {
        /// Operation that was attempted.
        operation: &'static str,
        /// Side the operation belongs to.
        expected: &'static str,
    },
}
