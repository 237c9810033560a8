//! Bounded per-property history keyed by tick.
//!
//! Remote state always lags the local tick by network latency. A
//! [`TimeMachine`] keeps the last few authoritative samples of one property
//! so the receiver can read a smoothed value at `local_tick - render_delay`
//! and the raw latest value at `local_tick` from the same buffer.
//!
//! ```text
//!   samples:   (10, a)          (20, b)          (30, c)
//!   get(5)  -> a   (clamped to earliest)
//!   get(15) -> interpolate(a, b, 0.5)
//!   get(40) -> c   (latest held)
//! ```

use std::collections::VecDeque;

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use crate::id::Tick;
use crate::value::{Transform, Value};

// ---------------------------------------------------------------------------
// Interpolate
// ---------------------------------------------------------------------------

/// Blends two samples of the same kind. `t` is in `[0, 1]`, `0` yielding
/// `self` and `1` yielding `to`.
pub trait Interpolate: Clone {
    /// Returns the value a fraction `t` of the way from `self` to `to`.
    fn interpolate(&self, to: &Self, t: f32) -> Self;
}

/// Discrete kinds hold whichever sample is nearest in time.
macro_rules! hold_nearest {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Interpolate for $ty {
                fn interpolate(&self, to: &Self, t: f32) -> Self {
                    if t < 0.5 { self.clone() } else { to.clone() }
                }
            }
        )*
    };
}

hold_nearest!(bool, i16, i32, String);

impl Interpolate for f32 {
    fn interpolate(&self, to: &Self, t: f32) -> Self {
        self + (to - self) * t
    }
}

impl Interpolate for f64 {
    fn interpolate(&self, to: &Self, t: f32) -> Self {
        self + (to - self) * f64::from(t)
    }
}

macro_rules! lerp_vector {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Interpolate for $ty {
                fn interpolate(&self, to: &Self, t: f32) -> Self {
                    self.lerp(*to, t)
                }
            }
        )*
    };
}

lerp_vector!(Vec2, Vec3, Vec4);

impl Interpolate for Quat {
    fn interpolate(&self, to: &Self, t: f32) -> Self {
        // q and -q are the same rotation; flip so slerp takes the short arc.
        let to = if self.dot(*to) < 0.0 { -*to } else { *to };
        self.slerp(to, t)
    }
}

impl Interpolate for Mat4 {
    fn interpolate(&self, to: &Self, t: f32) -> Self {
        let a = self.to_cols_array();
        let b = to.to_cols_array();
        Mat4::from_cols_array(&std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t))
    }
}

impl Interpolate for Transform {
    fn interpolate(&self, to: &Self, t: f32) -> Self {
        Transform {
            translation: self.translation.interpolate(&to.translation, t),
            rotation: self.rotation.interpolate(&to.rotation, t),
            scale: self.scale.interpolate(&to.scale, t),
        }
    }
}

impl Interpolate for Value {
    fn interpolate(&self, to: &Self, t: f32) -> Self {
        match (self, to) {
            (Value::String(a), Value::String(b)) => Value::String(a.interpolate(b, t)),
            (Value::Int16(a), Value::Int16(b)) => Value::Int16(a.interpolate(b, t)),
            (Value::Int32(a), Value::Int32(b)) => Value::Int32(a.interpolate(b, t)),
            (Value::Single(a), Value::Single(b)) => Value::Single(a.interpolate(b, t)),
            (Value::Double(a), Value::Double(b)) => Value::Double(a.interpolate(b, t)),
            (Value::Boolean(a), Value::Boolean(b)) => Value::Boolean(a.interpolate(b, t)),
            (Value::Vector2(a), Value::Vector2(b)) => Value::Vector2(a.interpolate(b, t)),
            (Value::Vector3(a), Value::Vector3(b)) => Value::Vector3(a.interpolate(b, t)),
            (Value::Vector4(a), Value::Vector4(b)) => Value::Vector4(a.interpolate(b, t)),
            (Value::Quaternion(a), Value::Quaternion(b)) => Value::Quaternion(a.interpolate(b, t)),
            (Value::Matrix4x4(a), Value::Matrix4x4(b)) => Value::Matrix4x4(a.interpolate(b, t)),
            (Value::Transform(a), Value::Transform(b)) => Value::Transform(a.interpolate(b, t)),
            // None, or mismatched kinds: hold the nearest sample.
            _ => {
                if t < 0.5 {
                    self.clone()
                } else {
                    to.clone()
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TimeMachine
// ---------------------------------------------------------------------------

/// A bounded ring of `(tick, value)` samples kept sorted by tick.
#[derive(Debug, Clone)]
pub struct TimeMachine<T> {
    samples: VecDeque<(Tick, T)>,
    capacity: usize,
}

/// Samples allocated up front; deeper histories grow on demand.
const PREALLOCATED_SAMPLES: usize = 64;

impl<T: Interpolate> TimeMachine<T> {
    /// Creates an empty history holding at most `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(PREALLOCATED_SAMPLES)),
            capacity,
        }
    }

    /// Records `value` at `tick`. Ticks may arrive out of order; a sample for
    /// an already-recorded tick replaces it. When full, the oldest sample is
    /// evicted.
    pub fn insert(&mut self, tick: Tick, value: T) {
        match self.samples.back() {
            Some((last, _)) if *last < tick => self.samples.push_back((tick, value)),
            None => self.samples.push_back((tick, value)),
            Some(_) => {
                let idx = self.samples.partition_point(|(t, _)| *t < tick);
                match self.samples.get_mut(idx) {
                    Some(slot) if slot.0 == tick => slot.1 = value,
                    _ => self.samples.insert(idx, (tick, value)),
                }
            }
        }

        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Reads the value at `tick`: clamped to the earliest sample before it,
    /// held at the latest sample after it, interpolated in between.
    /// Returns `None` only while the history is empty.
    pub fn get(&self, tick: Tick) -> Option<T> {
        let (first_tick, first) = self.samples.front()?;
        if tick <= *first_tick {
            return Some(first.clone());
        }
        let (last_tick, last) = self.samples.back()?;
        if tick >= *last_tick {
            return Some(last.clone());
        }

        // first_tick < tick < last_tick, so both neighbours exist.
        let next = self.samples.partition_point(|(t, _)| *t <= tick);
        let (t0, a) = &self.samples[next - 1];
        let (t1, b) = &self.samples[next];
        if *t0 == tick {
            return Some(a.clone());
        }
        let t = (tick - t0) as f32 / (t1 - t0) as f32;
        Some(a.interpolate(b, t))
    }

    /// The oldest retained sample.
    pub fn earliest(&self) -> Option<(Tick, &T)> {
        self.samples.front().map(|(t, v)| (*t, v))
    }

    /// The newest retained sample.
    pub fn latest(&self) -> Option<(Tick, &T)> {
        self.samples.back().map(|(t, v)| (*t, v))
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if no samples are retained.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of retained samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
