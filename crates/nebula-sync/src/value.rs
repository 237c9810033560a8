//! Replicated property values and their stable wire type tags.
//!
//! [`Value`] is a closed tagged union: every variant maps to exactly one
//! [`WireType`], and the codec matches on it exhaustively, so a new variant
//! cannot be added without wiring it into encode and decode.

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Translation, rotation and scale of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// World-space translation.
    pub translation: Vec3,
    /// Orientation.
    pub rotation: Quat,
    /// Per-axis scale.
    pub scale: Vec3,
}

impl Transform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Identity rotation and scale at `translation`.
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Wire form of a [`Transform`]: translation, rotation and scale as plain
/// float arrays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformWire {
    /// Translation x, y, z.
    pub translation: [f32; 3],
    /// Rotation quaternion x, y, z, w.
    pub rotation: [f32; 4],
    /// Scale x, y, z.
    pub scale: [f32; 3],
}

impl From<Transform> for TransformWire {
    fn from(t: Transform) -> Self {
        Self {
            translation: t.translation.to_array(),
            rotation: t.rotation.to_array(),
            scale: t.scale.to_array(),
        }
    }
}

impl From<TransformWire> for Transform {
    fn from(w: TransformWire) -> Self {
        Self {
            translation: Vec3::from_array(w.translation),
            rotation: Quat::from_array(w.rotation),
            scale: Vec3::from_array(w.scale),
        }
    }
}

// ---------------------------------------------------------------------------
// WireType
// ---------------------------------------------------------------------------

/// Stable integer tag identifying a value's wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// No payload.
    None = 0,
    /// UTF-8 string.
    String = 1,
    /// 16-bit signed integer.
    Int16 = 2,
    /// 32-bit signed integer.
    Int32 = 3,
    /// 32-bit float.
    Single = 4,
    /// 64-bit float.
    Double = 5,
    /// Boolean.
    Boolean = 6,
    /// Two floats.
    Vector2 = 7,
    /// Three floats.
    Vector3 = 8,
    /// Four floats.
    Vector4 = 9,
    /// Quaternion x, y, z, w.
    Quaternion = 10,
    /// Column-major 4x4 matrix.
    Matrix = 11,
    /// Translation / rotation / scale.
    Transform = 12,
}

impl WireType {
    /// Number of entries consumed from the flattened float-array column, for
    /// the vector-like kinds.
    pub fn float_count(self) -> Option<usize> {
        match self {
            Self::Vector2 => Some(2),
            Self::Vector3 => Some(3),
            Self::Vector4 | Self::Quaternion => Some(4),
            Self::Matrix => Some(16),
            _ => None,
        }
    }
}

impl TryFrom<u8> for WireType {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => Self::None,
            1 => Self::String,
            2 => Self::Int16,
            3 => Self::Int32,
            4 => Self::Single,
            5 => Self::Double,
            6 => Self::Boolean,
            7 => Self::Vector2,
            8 => Self::Vector3,
            9 => Self::Vector4,
            10 => Self::Quaternion,
            11 => Self::Matrix,
            12 => Self::Transform,
            other => return Err(CodecError::UnknownWireType(other)),
        })
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A replicated property value. Equality is structural (tag + payload).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value.
    #[default]
    None,
    /// UTF-8 string.
    String(String),
    /// 16-bit signed integer.
    Int16(i16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit float.
    Single(f32),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Boolean(bool),
    /// 2D vector.
    Vector2(Vec2),
    /// 3D vector.
    Vector3(Vec3),
    /// 4D vector.
    Vector4(Vec4),
    /// Rotation quaternion.
    Quaternion(Quat),
    /// 4x4 matrix.
    Matrix4x4(Mat4),
    /// Translation / rotation / scale.
    Transform(Transform),
}

impl Value {
    /// The wire type tag for this value.
    pub fn wire_type(&self) -> WireType {
        match self {
            Self::None => WireType::None,
            Self::String(_) => WireType::String,
            Self::Int16(_) => WireType::Int16,
            Self::Int32(_) => WireType::Int32,
            Self::Single(_) => WireType::Single,
            Self::Double(_) => WireType::Double,
            Self::Boolean(_) => WireType::Boolean,
            Self::Vector2(_) => WireType::Vector2,
            Self::Vector3(_) => WireType::Vector3,
            Self::Vector4(_) => WireType::Vector4,
            Self::Quaternion(_) => WireType::Quaternion,
            Self::Matrix4x4(_) => WireType::Matrix,
            Self::Transform(_) => WireType::Transform,
        }
    }

    /// Returns `true` for [`Value::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns the inner `f32` of a [`Value::Single`].
    pub fn as_single(&self) -> Option<f32> {
        match self {
            Self::Single(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the inner `i32` of a [`Value::Int32`].
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the inner `bool` of a [`Value::Boolean`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the inner string of a [`Value::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the inner vector of a [`Value::Vector3`].
    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Self::Vector3(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the inner [`Transform`] of a [`Value::Transform`].
    pub fn as_transform(&self) -> Option<Transform> {
        match self {
            Self::Transform(v) => Some(*v),
            _ => None,
        }
    }

    /// Same tag and bit-identical payload. Used for change detection: unlike
    /// `==`, a NaN equals itself and `0.0` differs from `-0.0`.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Single(a), Self::Single(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Vector2(a), Self::Vector2(b)) => same_floats(&a.to_array(), &b.to_array()),
            (Self::Vector3(a), Self::Vector3(b)) => same_floats(&a.to_array(), &b.to_array()),
            (Self::Vector4(a), Self::Vector4(b)) => same_floats(&a.to_array(), &b.to_array()),
            (Self::Quaternion(a), Self::Quaternion(b)) => same_floats(&a.to_array(), &b.to_array()),
            (Self::Matrix4x4(a), Self::Matrix4x4(b)) => {
                same_floats(&a.to_cols_array(), &b.to_cols_array())
            }
            (Self::Transform(a), Self::Transform(b)) => {
                let (a, b) = (TransformWire::from(*a), TransformWire::from(*b));
                same_floats(&a.translation, &b.translation)
                    && same_floats(&a.rotation, &b.rotation)
                    && same_floats(&a.scale, &b.scale)
            }
            _ => self == other,
        }
    }
}

fn same_floats(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from_for_value! {
    String => String,
    i16 => Int16,
    i32 => Int32,
    f32 => Single,
    f64 => Double,
    bool => Boolean,
    Vec2 => Vector2,
    Vec3 => Vector3,
    Vec4 => Vector4,
    Quat => Quaternion,
    Mat4 => Matrix4x4,
    Transform => Transform,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}
