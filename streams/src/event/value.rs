//! Dynamic event payloads and stream chunks.
//!
//! Events carry a slice of [`Value`]s. There is no schema per event name: emitters and
//! observers agree on payload shapes by convention and validate at the edges with the
//! `as_*` accessors.

use std::fmt;
use std::rc::Rc;

use crate::error::StreamError;

/// An immutable unit of data moved between stream stages.
///
/// Cloning is cheap: the contents are reference counted.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Raw bytes.
    Bytes(Rc<[u8]>),
    /// A structured value, used by object mode streams.
    Object(Rc<Value>),
}

impl Chunk {
    /// Creates a byte chunk.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Chunk::Bytes(Rc::from(data.into()))
    }

    /// Creates an object chunk.
    pub fn object(value: impl Into<Value>) -> Self {
        Chunk::Object(Rc::new(value.into()))
    }

    /// Size of the chunk in bytes. Object chunks count as one.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Chunk::Bytes(bytes) => bytes.len(),
            Chunk::Object(_) => 1,
        }
    }

    /// Returns `true` for a zero-length byte chunk.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bytes, if this is a byte chunk.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Chunk::Bytes(bytes) => Some(&bytes[..]),
            Chunk::Object(_) => None,
        }
    }

    /// The value, if this is an object chunk.
    pub fn as_object(&self) -> Option<&Value> {
        match self {
            Chunk::Bytes(_) => None,
            Chunk::Object(value) => Some(value.as_ref()),
        }
    }

    /// Lossy UTF-8 view of a byte chunk, mostly useful in tests and logs.
    pub fn to_text(&self) -> String {
        match self {
            Chunk::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Chunk::Object(value) => value.to_string(),
        }
    }
}

impl From<&str> for Chunk {
    fn from(text: &str) -> Self {
        Chunk::bytes(text.as_bytes())
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Chunk::bytes(text.into_bytes())
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk::bytes(bytes)
    }
}

impl From<&[u8]> for Chunk {
    fn from(bytes: &[u8]) -> Self {
        Chunk::Bytes(Rc::from(bytes))
    }
}

/// A dynamically typed event argument.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(Rc<str>),
    Chunk(Chunk),
    Error(StreamError),
    List(Vec<Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value.as_ref()),
            _ => None,
        }
    }

    pub fn as_chunk(&self) -> Option<&Chunk> {
        match self {
            Value::Chunk(chunk) => Some(chunk),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&StreamError> {
        match self {
            Value::Error(error) => Some(error),
            _ => None,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Text(value) => write!(f, "{value}"),
            Value::Chunk(Chunk::Bytes(bytes)) => write!(f, "<{} bytes>", bytes.len()),
            Value::Chunk(Chunk::Object(value)) => write!(f, "{value}"),
            Value::Error(error) => write!(f, "{error}"),
            Value::List(values) => {
                write!(f, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(Rc::from(value))
    }
}

impl From<Chunk> for Value {
    fn from(chunk: Chunk) -> Self {
        Value::Chunk(chunk)
    }
}

impl From<StreamError> for Value {
    fn from(error: StreamError) -> Self {
        Value::Error(error)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::List(values)
    }
}
