//! Identifiers shared by every replication component: network ids for
//! replicated entities, opaque endpoint keys, dispatcher groups and ticks.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// One discrete simulation step. Monotonically increasing per side.
pub type Tick = u32;

// ---------------------------------------------------------------------------
// NetworkId
// ---------------------------------------------------------------------------

/// Network identifier for a replicated entity. Assigned once on the authority
/// side and pushed to peers inside an entity-create message. Peers reference
/// entities exclusively by `NetworkId`.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub u32);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EndpointId / DispatcherId
// ---------------------------------------------------------------------------

/// Opaque network peer key. The transport decides what it means (an address
/// hash, a connection index, ...); replication only compares and hashes it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint:{}", self.0)
    }
}

/// A logical connection group. Entities replicate to the endpoints the
/// network engine lists for their dispatcher.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DispatcherId(pub u16);

// ---------------------------------------------------------------------------
// NetworkIdAllocator
// ---------------------------------------------------------------------------

/// Issues process-unique [`NetworkId`]s from a monotonically increasing
/// counter. Ids start at 1; 0 is never handed out.
#[derive(Resource, Debug)]
pub struct NetworkIdAllocator {
    next: AtomicU32,
}

static GLOBAL_ALLOCATOR: NetworkIdAllocator = NetworkIdAllocator::new();

impl NetworkIdAllocator {
    /// Creates an allocator whose first id is 1.
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// The allocator shared by the whole process.
    pub fn global() -> &'static NetworkIdAllocator {
        &GLOBAL_ALLOCATOR
    }

    /// Allocates the next [`NetworkId`].
    pub fn allocate(&self) -> NetworkId {
        NetworkId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NetworkIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
