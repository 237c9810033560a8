//! Entity-state replication: per-property change detection, authority and
//! audience rules per endpoint, columnar property messages, and tick-based
//! smoothing of received values.

pub mod authority;
pub mod codec;
pub mod engine;
pub mod error;
pub mod id;
pub mod ledger;
pub mod loopback;
pub mod message;
pub mod settings;
pub mod sync_component;
pub mod time_machine;
pub mod value;

pub use authority::{Audience, AuthorityState, ClientAuthoritativeMode, InboundVerdict, Side};
pub use codec::{CodecError, DecodedProperty};
pub use engine::{
    InboundPacket, InboundQueue, InboundSender, NetworkEngine, ReplicationRouter, RouterCounters,
    RoutedMessage,
};
pub use error::SyncError;
pub use id::{DispatcherId, EndpointId, NetworkId, NetworkIdAllocator, Tick};
pub use ledger::{EndpointSyncState, EvaluationContext, PropertyDeclaration, PropertyId, SyncLedger, SynchronisedProperty};
pub use loopback::{LoopbackCounters, LoopbackLink};
pub use message::{
    EntityCreateMessage, EntityDestroyMessage, EntityPropertiesMessage, MessageError, PropertyColumns,
    SyncMessage, deserialize_message, serialize_message,
};
pub use settings::SyncSettings;
pub use sync_component::{ReceiveOutcome, SyncComponent, SyncScope, SyncStats, SyncTarget};
pub use time_machine::{Interpolate, TimeMachine};
pub use value::{Transform, TransformWire, Value, WireType};
