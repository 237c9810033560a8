//! Columnar property codec.
//!
//! Values are grouped by wire type into dense arrays, one per type, so no
//! per-value tag is paid inside the columns. The parallel `type_tags` array
//! tells the decoder which column cursor to advance for each name.

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use crate::message::{EntityPropertiesMessage, PropertyColumns};
use crate::value::{Transform, Value, WireType};

/// Errors produced while decoding a properties message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A type tag names no known wire type. Indicates a value kind that was
    /// never wired into the tag table on one side.
    #[error("unknown wire type tag {0}")]
    UnknownWireType(u8),

    /// `names` and `type_tags` have different lengths.
    #[error("{names} property names but {tags} type tags")]
    LengthMismatch {
        /// Number of names.
        names: usize,
        /// Number of tags.
        tags: usize,
    },

    /// A column ran out before every tag referencing it was read.
    #[error("{0:?} column exhausted")]
    ColumnExhausted(WireType),
}

/// One decoded entry: the property name, its wire type and the value.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedProperty {
    /// Property name.
    pub name: String,
    /// Wire type the value was read as.
    pub wire_type: WireType,
    /// Decoded value.
    pub value: Value,
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Packs `entries` into a fresh properties message.
pub fn encode<'a, I>(entity_id: u32, tick: u32, is_client_message: bool, entries: I) -> EntityPropertiesMessage
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut msg = EntityPropertiesMessage {
        entity_id,
        frame_tick: tick,
        is_client_message,
        ..Default::default()
    };

    for (name, value) in entries {
        msg.names.push(name.to_owned());
        msg.type_tags.push(value.wire_type() as u8);
        push_value(&mut msg.values, value);
    }

    msg
}

fn push_value(cols: &mut PropertyColumns, value: &Value) {
    match value {
        Value::None => {}
        Value::String(v) => cols.strings.push(v.clone()),
        Value::Int16(v) => cols.int16s.push(*v),
        Value::Int32(v) => cols.int32s.push(*v),
        Value::Single(v) => cols.singles.push(*v),
        Value::Double(v) => cols.doubles.push(*v),
        Value::Boolean(v) => cols.booleans.push(*v),
        Value::Vector2(v) => cols.single_arrays.extend_from_slice(&v.to_array()),
        Value::Vector3(v) => cols.single_arrays.extend_from_slice(&v.to_array()),
        Value::Vector4(v) => cols.single_arrays.extend_from_slice(&v.to_array()),
        Value::Quaternion(v) => cols.single_arrays.extend_from_slice(&v.to_array()),
        Value::Matrix4x4(v) => cols.single_arrays.extend_from_slice(&v.to_cols_array()),
        Value::Transform(v) => cols.transforms.push((*v).into()),
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Per-column read positions.
#[derive(Default)]
struct Cursors {
    strings: usize,
    int16s: usize,
    int32s: usize,
    singles: usize,
    doubles: usize,
    booleans: usize,
    single_arrays: usize,
    transforms: usize,
}

fn take<T: Clone>(column: &[T], cursor: &mut usize, wire_type: WireType) -> Result<T, CodecError> {
    let value = column
        .get(*cursor)
        .cloned()
        .ok_or(CodecError::ColumnExhausted(wire_type))?;
    *cursor += 1;
    Ok(value)
}

/// Reads the next [`WireType::float_count`] floats of the flattened column.
fn take_floats<'c>(column: &'c [f32], cursor: &mut usize, wire_type: WireType) -> Result<&'c [f32], CodecError> {
    let count = wire_type.float_count().unwrap_or_default();
    let slice = column
        .get(*cursor..*cursor + count)
        .ok_or(CodecError::ColumnExhausted(wire_type))?;
    *cursor += count;
    Ok(slice)
}

/// Unpacks every entry of `msg`, in `names` order.
pub fn decode(msg: &EntityPropertiesMessage) -> Result<Vec<DecodedProperty>, CodecError> {
    if msg.names.len() != msg.type_tags.len() {
        return Err(CodecError::LengthMismatch {
            names: msg.names.len(),
            tags: msg.type_tags.len(),
        });
    }

    let cols = &msg.values;
    let mut cur = Cursors::default();
    let mut out = Vec::with_capacity(msg.names.len());

    for (name, &tag) in msg.names.iter().zip(&msg.type_tags) {
        let wire_type = WireType::try_from(tag)?;
        let value = match wire_type {
            WireType::None => Value::None,
            WireType::String => Value::String(take(&cols.strings, &mut cur.strings, wire_type)?),
            WireType::Int16 => Value::Int16(take(&cols.int16s, &mut cur.int16s, wire_type)?),
            WireType::Int32 => Value::Int32(take(&cols.int32s, &mut cur.int32s, wire_type)?),
            WireType::Single => Value::Single(take(&cols.singles, &mut cur.singles, wire_type)?),
            WireType::Double => Value::Double(take(&cols.doubles, &mut cur.doubles, wire_type)?),
            WireType::Boolean => {
                Value::Boolean(take(&cols.booleans, &mut cur.booleans, wire_type)?)
            }
            WireType::Vector2 | WireType::Vector3 | WireType::Vector4 | WireType::Quaternion | WireType::Matrix => {
                let floats = take_floats(&cols.single_arrays, &mut cur.single_arrays, wire_type)?;
                match wire_type {
                    WireType::Vector2 => Value::Vector2(Vec2::from_slice(floats)),
                    WireType::Vector3 => Value::Vector3(Vec3::from_slice(floats)),
                    WireType::Vector4 => Value::Vector4(Vec4::from_slice(floats)),
                    WireType::Quaternion => Value::Quaternion(Quat::from_slice(floats)),
                    _ => Value::Matrix4x4(Mat4::from_cols_slice(floats)),
                }
            }
            WireType::Transform => Value::Transform(Transform::from(take(
                &cols.transforms,
                &mut cur.transforms,
                wire_type,
            )?)),
        };
        out.push(DecodedProperty {
            name: name.clone(),
            wire_type,
            value,
        });
    }

    Ok(out)
}
