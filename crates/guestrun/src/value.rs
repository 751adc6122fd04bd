//! # Host values
//!
//! [`HostValue`] is what a handle slot holds. [`Value`] is what crosses a
//! typed boundary: numbers travel inline, `Ref` travels as a handle and
//! `Buf` travels as a packed word into guest memory.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::marshal::Word;
use crate::schema::Kind;

/// A host-owned value living behind a handle.
#[derive(Clone, Default)]
pub enum HostValue {
    /// A freshly allocated slot nobody has written yet.
    #[default]
    Empty,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// String keys to raw words, written through `value_set`.
    Map(BTreeMap<String, Word>),
    /// Anything else the host wants the guest to carry around.
    Object(Arc<dyn Any + Send + Sync>),
}

impl HostValue {
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        HostValue::Object(Arc::new(value))
    }

    /// Short name of the variant, used in violation messages.
    pub fn kind(&self) -> &'static str {
        match self {
            HostValue::Empty => "empty",
            HostValue::Bool(_) => "bool",
            HostValue::I32(_) => "i32",
            HostValue::I64(_) => "i64",
            HostValue::F32(_) => "f32",
            HostValue::F64(_) => "f64",
            HostValue::String(_) => "string",
            HostValue::Bytes(_) => "bytes",
            HostValue::Map(_) => "map",
            HostValue::Object(_) => "object",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, HostValue::Empty)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            HostValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            HostValue::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Raw bytes of a `Bytes` or `String` slot.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            HostValue::Bytes(v) => Some(v),
            HostValue::String(v) => Some(v.as_bytes()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Word>> {
        match self {
            HostValue::Map(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Word>> {
        match self {
            HostValue::Map(v) => Some(v),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            HostValue::Object(obj) => obj.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for HostValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostValue::Empty => write!(f, "Empty"),
            HostValue::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            HostValue::I32(v) => f.debug_tuple("I32").field(v).finish(),
            HostValue::I64(v) => f.debug_tuple("I64").field(v).finish(),
            HostValue::F32(v) => f.debug_tuple("F32").field(v).finish(),
            HostValue::F64(v) => f.debug_tuple("F64").field(v).finish(),
            HostValue::String(v) => f.debug_tuple("String").field(v).finish(),
            HostValue::Bytes(v) => f.debug_tuple("Bytes").field(&v.len()).finish(),
            HostValue::Map(v) => f.debug_tuple("Map").field(v).finish(),
            HostValue::Object(_) => write!(f, "Object(..)"),
        }
    }
}

/// Floats compare by bit pattern. Objects compare by identity.
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Empty, HostValue::Empty) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::I32(a), HostValue::I32(b)) => a == b,
            (HostValue::I64(a), HostValue::I64(b)) => a == b,
            (HostValue::F32(a), HostValue::F32(b)) => a.to_bits() == b.to_bits(),
            (HostValue::F64(a), HostValue::F64(b)) => a.to_bits() == b.to_bits(),
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::Bytes(a), HostValue::Bytes(b)) => a == b,
            (HostValue::Map(a), HostValue::Map(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Bool(v)
    }
}

impl From<i32> for HostValue {
    fn from(v: i32) -> Self {
        HostValue::I32(v)
    }
}

impl From<i64> for HostValue {
    fn from(v: i64) -> Self {
        HostValue::I64(v)
    }
}

impl From<f32> for HostValue {
    fn from(v: f32) -> Self {
        HostValue::F32(v)
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        HostValue::F64(v)
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::String(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(v: Vec<u8>) -> Self {
        HostValue::Bytes(v)
    }
}

/// A value on a typed boundary, tagged with how it crosses.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    /// Crosses as a handle.
    Ref(HostValue),
    /// Crosses as bytes copied into guest memory.
    Buf(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::I32(_) => Kind::I32,
            Value::I64(_) => Kind::I64,
            Value::F32(_) => Kind::F32,
            Value::F64(_) => Kind::F64,
            Value::Bool(_) => Kind::Bool,
            Value::Ref(_) => Kind::Ref,
            Value::Buf(_) => Kind::Buf,
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::Ref(HostValue::String(s.into()))
    }
}
