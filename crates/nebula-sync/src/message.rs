//! Replication wire messages and their binary framing.
//!
//! Every payload is a protocol version byte, a protocol id byte naming the
//! message kind, and a [`postcard`]-encoded body:
//!
//! ```text
//! +-----------+---------------+------------------------+
//! | version   | protocol id   |  postcard body         |
//! | u8        | u8            |  (rest of the payload) |
//! +-----------+---------------+------------------------+
//! ```
//!
//! postcard writes integers as little-endian varints and floats as
//! little-endian IEEE-754, so the bytes do not depend on host byte order.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::value::TransformWire;

/// Current replication wire-protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Protocol id of [`EntityCreateMessage`].
pub const ENTITY_CREATE: u8 = 1;
/// Protocol id of [`EntityPropertiesMessage`].
pub const ENTITY_PROPERTIES: u8 = 2;
/// Protocol id of [`EntityDestroyMessage`].
pub const ENTITY_DESTROY: u8 = 3;

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// Announces a replicated entity to an endpoint. Always sent reliably.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityCreateMessage {
    /// Network id assigned by the authority.
    pub entity_id: u32,
    /// Entity type tag the receiver uses to construct the local entity.
    pub entity_type: String,
    /// Transform at creation time.
    pub initial_transform: TransformWire,
    /// Authority tick at which the entity became known to the endpoint.
    pub frame_tick: u32,
}

/// A batch of property values for one entity, grouped into per-type columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EntityPropertiesMessage {
    /// Network id of the entity.
    pub entity_id: u32,
    /// Sender tick the values were sampled at.
    pub frame_tick: u32,
    /// `true` when a client originated the message.
    pub is_client_message: bool,
    /// Property names, in encode order.
    pub names: Vec<String>,
    /// Wire type tag for each name, parallel to `names`.
    pub type_tags: Vec<u8>,
    /// Dense per-type value columns.
    pub values: PropertyColumns,
}

/// One dense array per wire type. Each column is consumed in `names` order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PropertyColumns {
    /// `String` values.
    pub strings: Vec<String>,
    /// `Int16` values.
    pub int16s: Vec<i16>,
    /// `Int32` values.
    pub int32s: Vec<i32>,
    /// `Single` values.
    pub singles: Vec<f32>,
    /// `Double` values.
    pub doubles: Vec<f64>,
    /// `Boolean` values.
    pub booleans: Vec<bool>,
    /// Flattened vector, quaternion and matrix payloads.
    pub single_arrays: Vec<f32>,
    /// `Transform` values.
    pub transforms: Vec<TransformWire>,
}

/// Tells an endpoint a replicated entity is gone. Always sent reliably.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityDestroyMessage {
    /// Network id of the entity.
    pub entity_id: u32,
    /// Authority tick of the despawn.
    pub frame_tick: u32,
}

// ---------------------------------------------------------------------------
// SyncMessage
// ---------------------------------------------------------------------------

/// Every message the replication layer hands to the network engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Entity creation.
    Create(EntityCreateMessage),
    /// Property values.
    Properties(EntityPropertiesMessage),
    /// Entity removal.
    Destroy(EntityDestroyMessage),
}

impl SyncMessage {
    /// The protocol id written in the frame header.
    pub fn protocol_id(&self) -> u8 {
        match self {
            Self::Create(_) => ENTITY_CREATE,
            Self::Properties(_) => ENTITY_PROPERTIES,
            Self::Destroy(_) => ENTITY_DESTROY,
        }
    }

    /// Network id of the entity the message is about.
    pub fn entity_id(&self) -> u32 {
        match self {
            Self::Create(m) => m.entity_id,
            Self::Properties(m) => m.entity_id,
            Self::Destroy(m) => m.entity_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while framing or unframing a message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload was shorter than the two header bytes.
    #[error("payload too short for a message header: {0} bytes")]
    Truncated(usize),

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The protocol id names no known message kind.
    #[error("unknown protocol id: {0}")]
    UnknownProtocol(u8),

    /// Postcard (de)serialization failed.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Serialize a [`SyncMessage`] into a framed payload.
pub fn serialize_message(msg: &SyncMessage) -> Result<Vec<u8>, MessageError> {
    let body = match msg {
        SyncMessage::Create(m) => postcard::to_allocvec(m)?,
        SyncMessage::Properties(m) => postcard::to_allocvec(m)?,
        SyncMessage::Destroy(m) => postcard::to_allocvec(m)?,
    };
    let mut out = Vec::with_capacity(2 + body.len());
    out.push(PROTOCOL_VERSION);
    out.push(msg.protocol_id());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Splits a framed payload into its protocol id and body, checking the version.
pub fn split_header(data: &[u8]) -> Result<(u8, &[u8]), MessageError> {
    let [version, protocol_id, body @ ..] = data else {
        return Err(MessageError::Truncated(data.len()));
    };
    if *version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(*version));
    }
    Ok((*protocol_id, body))
}

/// Decodes a message body (the bytes after the header).
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, MessageError> {
    Ok(postcard::from_bytes(body)?)
}

/// Deserialize a framed payload into a [`SyncMessage`].
pub fn deserialize_message(data: &[u8]) -> Result<SyncMessage, MessageError> {
    let (protocol_id, body) = split_header(data)?;
    match protocol_id {
        ENTITY_CREATE => Ok(SyncMessage::Create(decode_body(body)?)),
        ENTITY_PROPERTIES => Ok(SyncMessage::Properties(decode_body(body)?)),
        ENTITY_DESTROY => Ok(SyncMessage::Destroy(decode_body(body)?)),
        other => Err(MessageError::UnknownProtocol(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Transform;
    use glam::Vec3;

    fn create_message() -> SyncMessage {
        SyncMessage::Create(EntityCreateMessage {
            entity_id: 7,
            entity_type: "ship".to_string(),
            initial_transform: Transform::from_translation(Vec3::new(1.0, 2.0, 3.0)).into(),
            frame_tick: 42,
        })
    }

    #[test]
    fn test_create_roundtrip() {
        let msg = create_message();
        let bytes = serialize_message(&msg).unwrap();
        assert_eq!(deserialize_message(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_properties_roundtrip() {
        let msg = SyncMessage::Properties(EntityPropertiesMessage {
            entity_id: 3,
            frame_tick: 99,
            is_client_message: true,
            names: vec!["hp".to_string(), "name".to_string()],
            type_tags: vec![3, 1],
            values: PropertyColumns {
                int32s: vec![100],
                strings: vec!["Kestrel".to_string()],
                ..Default::default()
            },
        });
        let bytes = serialize_message(&msg).unwrap();
        assert_eq!(deserialize_message(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_header_layout() {
        let bytes = serialize_message(&SyncMessage::Destroy(EntityDestroyMessage {
            entity_id: 1,
            frame_tick: 2,
        }))
        .unwrap();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], ENTITY_DESTROY);
        let (protocol_id, body) = split_header(&bytes).unwrap();
        assert_eq!(protocol_id, ENTITY_DESTROY);
        let destroy: EntityDestroyMessage = decode_body(body).unwrap();
        assert_eq!(destroy.entity_id, 1);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = serialize_message(&create_message()).unwrap();
        bytes[0] = 200;
        assert!(matches!(
            deserialize_message(&bytes),
            Err(MessageError::UnsupportedVersion(200))
        ));
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let mut bytes = serialize_message(&create_message()).unwrap();
        bytes[1] = 77;
        assert!(matches!(
            deserialize_message(&bytes),
            Err(MessageError::UnknownProtocol(77))
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        assert!(matches!(
            deserialize_message(&[PROTOCOL_VERSION]),
            Err(MessageError::Truncated(1))
        ));
        assert!(matches!(deserialize_message(&[]), Err(MessageError::Truncated(0))));
    }

    #[test]
    fn test_corrupted_body_rejected() {
        let result = deserialize_message(&[PROTOCOL_VERSION, ENTITY_CREATE, 0xFF, 0xFF, 0xFF]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_properties_message_is_compact() {
        let bytes = serialize_message(&SyncMessage::Properties(EntityPropertiesMessage {
            entity_id: 1,
            frame_tick: 1,
            ..Default::default()
        }))
        .unwrap();
        assert!(bytes.len() < 16, "got {} bytes", bytes.len());
    }
}
