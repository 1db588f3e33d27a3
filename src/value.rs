//! Values stored on graph nodes.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::dimensions::Dimensions;

/// Error when a value has the wrong type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("type error: expected {expected}, got {got}")]
pub struct TypeError {
    pub expected: ValueType,
    pub got: ValueType,
}

impl TypeError {
    pub fn expected(expected: ValueType, got: ValueType) -> Self {
        Self { expected, got }
    }
}

/// Type tag for every value a node can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    F32,
    F64,
    I32,
    U32,
    Bool,
    Buffer,
    Bytes,
}

impl ValueType {
    pub const ALL: [ValueType; 7] = [
        ValueType::F32,
        ValueType::F64,
        ValueType::I32,
        ValueType::U32,
        ValueType::Bool,
        ValueType::Buffer,
        ValueType::Bytes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::I32 => "i32",
            ValueType::U32 => "u32",
            ValueType::Bool => "bool",
            ValueType::Buffer => "buffer",
            ValueType::Bytes => "bytes",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            ValueType::F32 => 0,
            ValueType::F64 => 1,
            ValueType::I32 => 2,
            ValueType::U32 => 3,
            ValueType::Bool => 4,
            ValueType::Buffer => 5,
            ValueType::Bytes => 6,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Float image data with its extent. Cloning shares the samples.
#[derive(Clone, PartialEq)]
pub struct Buffer {
    dims: Dimensions,
    data: Arc<[f32]>,
}

impl Buffer {
    /// Returns `None` when `data` does not hold exactly one sample per item.
    pub fn new(dims: Dimensions, data: Vec<f32>) -> Option<Self> {
        if dims.item_count() != data.len() {
            return None;
        }
        Some(Self {
            dims,
            data: data.into(),
        })
    }

    pub fn filled(dims: Dimensions, sample: f32) -> Self {
        Self {
            dims,
            data: vec![sample; dims.item_count()].into(),
        }
    }

    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    pub fn samples(&self) -> &[f32] {
        &self.data
    }

    /// Applies `f` to every sample, producing a buffer of the same extent.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            dims: self.dims,
            data: self.data.iter().map(|&s| f(s)).collect(),
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("dims", &self.dims)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Dynamically-typed value held by a node once it has been computed.
#[derive(Clone, PartialEq)]
pub enum Value {
    F32(f32),
    F64(f64),
    I32(i32),
    U32(u32),
    Bool(bool),
    Buffer(Buffer),
    Bytes(Arc<[u8]>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32(v) => f.debug_tuple("F32").field(v).finish(),
            Self::F64(v) => f.debug_tuple("F64").field(v).finish(),
            Self::I32(v) => f.debug_tuple("I32").field(v).finish(),
            Self::U32(v) => f.debug_tuple("U32").field(v).finish(),
            Self::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Self::Buffer(b) => f.debug_tuple("Buffer").field(b).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
        }
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
            Value::I32(_) => ValueType::I32,
            Value::U32(_) => ValueType::U32,
            Value::Bool(_) => ValueType::Bool,
            Value::Buffer(_) => ValueType::Buffer,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    /// Extent a constant node gets when this value is lifted into a graph.
    pub fn dimensions(&self) -> Dimensions {
        match self {
            Value::F32(_) | Value::I32(_) | Value::U32(_) => Dimensions::scalar(4),
            Value::F64(_) => Dimensions::scalar(8),
            Value::Bool(_) => Dimensions::scalar(1),
            Value::Buffer(b) => b.dims(),
            Value::Bytes(b) => Dimensions::grid(b.len() as u32, 1, 1),
        }
    }

    pub fn as_f32(&self) -> Result<f32, TypeError> {
        match self {
            Value::F32(v) => Ok(*v),
            other => Err(TypeError::expected(ValueType::F32, other.value_type())),
        }
    }

    pub fn as_f64(&self) -> Result<f64, TypeError> {
        match self {
            Value::F64(v) => Ok(*v),
            other => Err(TypeError::expected(ValueType::F64, other.value_type())),
        }
    }

    pub fn as_i32(&self) -> Result<i32, TypeError> {
        match self {
            Value::I32(v) => Ok(*v),
            other => Err(TypeError::expected(ValueType::I32, other.value_type())),
        }
    }

    pub fn as_u32(&self) -> Result<u32, TypeError> {
        match self {
            Value::U32(v) => Ok(*v),
            other => Err(TypeError::expected(ValueType::U32, other.value_type())),
        }
    }

    pub fn as_bool(&self) -> Result<bool, TypeError> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(TypeError::expected(ValueType::Bool, other.value_type())),
        }
    }

    pub fn as_buffer(&self) -> Result<&Buffer, TypeError> {
        match self {
            Value::Buffer(b) => Ok(b),
            other => Err(TypeError::expected(ValueType::Buffer, other.value_type())),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], TypeError> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(TypeError::expected(ValueType::Bytes, other.value_type())),
        }
    }

    /// Feeds the type tag and the raw little-endian bytes of the value to `hasher`.
    pub fn hash_bytes(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&[self.value_type().tag()]);
        match self {
            Value::F32(v) => {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            Value::F64(v) => {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            Value::I32(v) => {
                hasher.update(&v.to_le_bytes());
            }
            Value::U32(v) => {
                hasher.update(&v.to_le_bytes());
            }
            Value::Bool(v) => {
                hasher.update(&[*v as u8]);
            }
            Value::Buffer(b) => {
                hasher.update(&b.dims().to_bytes());
                for sample in b.samples() {
                    hasher.update(&sample.to_bits().to_le_bytes());
                }
            }
            Value::Bytes(b) => {
                hasher.update(&(b.len() as u64).to_le_bytes());
                hasher.update(b);
            }
        }
    }
}

/// Rust types that map onto exactly one [`ValueType`].
pub trait ValueKind: Sized {
    const TYPE: ValueType;

    fn from_value(value: Value) -> Result<Self, TypeError>;
    fn into_value(self) -> Value;
}

macro_rules! impl_value_kind {
    ($ty:ty, $variant:ident) => {
        impl ValueKind for $ty {
            const TYPE: ValueType = ValueType::$variant;

            fn from_value(value: Value) -> Result<Self, TypeError> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(TypeError::expected(Self::TYPE, other.value_type())),
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }

        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_value_kind!(f32, F32);
impl_value_kind!(f64, F64);
impl_value_kind!(i32, I32);
impl_value_kind!(u32, U32);
impl_value_kind!(bool, Bool);
impl_value_kind!(Buffer, Buffer);
impl_value_kind!(Arc<[u8]>, Bytes);
