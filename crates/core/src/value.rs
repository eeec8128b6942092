use std::fmt;

use glam::{Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
}

impl DType {
    pub fn lanes(self) -> usize {
        match self {
            DType::Scalar => 1,
            DType::Vec2 => 2,
            DType::Vec3 => 3,
            DType::Vec4 => 4,
        }
    }

    pub fn from_lanes(lanes: usize) -> Option<Self> {
        match lanes {
            1 => Some(DType::Scalar),
            2 => Some(DType::Vec2),
            3 => Some(DType::Vec3),
            4 => Some(DType::Vec4),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Scalar => "scalar",
            DType::Vec2 => "vec2",
            DType::Vec3 => "vec3",
            DType::Vec4 => "vec4",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Scalar(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
}

impl Value {
    pub fn dtype(&self) -> DType {
        match self {
            Value::Scalar(_) => DType::Scalar,
            Value::Vec2(_) => DType::Vec2,
            Value::Vec3(_) => DType::Vec3,
            Value::Vec4(_) => DType::Vec4,
        }
    }

    /// Lane 0 of a scalar is the scalar itself.
    pub fn lane(&self, lane: usize) -> Option<f32> {
        match self {
            Value::Scalar(v) => (lane == 0).then_some(*v),
            Value::Vec2(v) => v.to_array().get(lane).copied(),
            Value::Vec3(v) => v.to_array().get(lane).copied(),
            Value::Vec4(v) => v.to_array().get(lane).copied(),
        }
    }

    pub fn from_lanes(lanes: &[f32]) -> Option<Self> {
        match *lanes {
            [x] => Some(Value::Scalar(x)),
            [x, y] => Some(Value::Vec2(Vec2::new(x, y))),
            [x, y, z] => Some(Value::Vec3(Vec3::new(x, y, z))),
            [x, y, z, w] => Some(Value::Vec4(Vec4::new(x, y, z, w))),
            _ => None,
        }
    }

    pub fn to_lanes(&self) -> Vec<f32> {
        match self {
            Value::Scalar(v) => vec![*v],
            Value::Vec2(v) => v.to_array().to_vec(),
            Value::Vec3(v) => v.to_array().to_vec(),
            Value::Vec4(v) => v.to_array().to_vec(),
        }
    }

    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Value::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn key(&self) -> ValueKey {
        let mut bits = [0u32; 4];
        for (slot, lane) in bits.iter_mut().zip(self.to_lanes()) {
            *slot = lane.to_bits();
        }
        ValueKey {
            dtype: self.dtype(),
            bits,
        }
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Scalar(value)
    }
}

impl From<Vec2> for Value {
    fn from(value: Vec2) -> Self {
        Value::Vec2(value)
    }
}

impl From<Vec3> for Value {
    fn from(value: Vec3) -> Self {
        Value::Vec3(value)
    }
}

impl From<Vec4> for Value {
    fn from(value: Vec4) -> Self {
        Value::Vec4(value)
    }
}

/// Exact bit pattern of a [`Value`]. `0.0` and `-0.0` are different keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueKey {
    dtype: DType,
    bits: [u32; 4],
}
