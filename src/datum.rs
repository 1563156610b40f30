//! Database data types and values.
//!
//! This module defines the type system and value representation shared by
//! the plan, executor, and exchange layers. [`Type`] identifies a column's
//! data type and [`Value`] holds a single typed column value with a compact
//! little-endian serialization used by the row wire codec.

use std::fmt;

/// Errors from value serialization/deserialization.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// Buffer too small for the operation.
    #[error("buffer too small: need {required} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        required: usize,
        /// Bytes available.
        available: usize,
    },
    /// Invalid data format.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

/// Returns `SerializationError::BufferTooSmall` if the buffer is too small.
macro_rules! ensure_buf_len {
    ($buf:expr, $required:expr) => {
        if $buf.len() < $required {
            return Err(SerializationError::BufferTooSmall {
                required: $required,
                available: $buf.len(),
            });
        }
    };
}

/// Database data type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// Boolean type.
    Bool,
    /// 2-byte integer.
    Int2,
    /// 4-byte integer.
    Int4,
    /// 8-byte integer.
    Int8,
    /// Single-precision floating-point.
    Float4,
    /// Double-precision floating-point.
    Float8,
    /// Variable-length string.
    Text,
    /// Variable-length binary string.
    Bytea,
}

impl Type {
    /// Returns the fixed byte size for fixed-length types, or `None` for
    /// variable-length types.
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Type::Bool => Some(1),
            Type::Int2 => Some(2),
            Type::Int4 => Some(4),
            Type::Int8 => Some(8),
            Type::Float4 => Some(4),
            Type::Float8 => Some(8),
            Type::Text | Type::Bytea => None,
        }
    }

    /// Returns true for integer types, the only types the partition
    /// function accepts as a partitioning attribute.
    pub const fn is_integer(self) -> bool {
        matches!(self, Type::Int2 | Type::Int4 | Type::Int8)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Bool => "boolean",
            Type::Int2 => "smallint",
            Type::Int4 => "integer",
            Type::Int8 => "bigint",
            Type::Float4 => "real",
            Type::Float8 => "double precision",
            Type::Text => "text",
            Type::Bytea => "bytea",
        };
        write!(f, "{}", name)
    }
}

/// A typed database value.
///
/// Variable-length types (Text, Bytea) are heap-allocated.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum Value {
    /// SQL NULL (type is unknown/any).
    Null,
    /// Boolean (true/false).
    Boolean(bool),
    /// 16-bit signed integer (SMALLINT).
    Int16(i16),
    /// 32-bit signed integer (INTEGER).
    Int32(i32),
    /// 64-bit signed integer (BIGINT).
    Int64(i64),
    /// 32-bit floating point (REAL).
    Float32(f32),
    /// 64-bit floating point (DOUBLE PRECISION).
    Float64(f64),
    /// Variable-length text (TEXT).
    Text(String),
    /// Variable-length binary (BYTEA).
    Bytea(Vec<u8>),
}

impl Value {
    /// Returns the data type for this value, or `None` for Null.
    pub fn data_type(&self) -> Option<Type> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(Type::Bool),
            Value::Int16(_) => Some(Type::Int2),
            Value::Int32(_) => Some(Type::Int4),
            Value::Int64(_) => Some(Type::Int8),
            Value::Float32(_) => Some(Type::Float4),
            Value::Float64(_) => Some(Type::Float8),
            Value::Text(_) => Some(Type::Text),
            Value::Bytea(_) => Some(Type::Bytea),
        }
    }

    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Interprets this value as an unsigned 64-bit integer, the form the
    /// partition function reduces modulo the node count.
    ///
    /// Negative integers reinterpret their two's-complement bits, so the
    /// mapping stays deterministic across nodes. Returns `None` for
    /// non-integer values.
    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            Value::Int16(n) => Some(*n as u16 as u64),
            Value::Int32(n) => Some(*n as u32 as u64),
            Value::Int64(n) => Some(*n as u64),
            _ => None,
        }
    }

    /// Returns the serialized size in bytes.
    ///
    /// For NULL, this returns 0 (NULL values are indicated by the null
    /// bitmap). For variable-length types, this includes the 4-byte length
    /// prefix.
    pub fn serialized_size(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int16(_) => 2,
            Value::Int32(_) => 4,
            Value::Int64(_) => 8,
            Value::Float32(_) => 4,
            Value::Float64(_) => 8,
            Value::Text(s) => 4 + s.len(),
            Value::Bytea(b) => 4 + b.len(),
        }
    }

    /// Serializes this value to a buffer.
    ///
    /// Returns the number of bytes written. NULL writes 0 bytes.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize, SerializationError> {
        match self {
            Value::Null => Ok(0),
            Value::Boolean(b) => {
                ensure_buf_len!(buf, 1);
                buf[0] = if *b { 1 } else { 0 };
                Ok(1)
            }
            Value::Int16(n) => {
                ensure_buf_len!(buf, 2);
                buf[0..2].copy_from_slice(&n.to_le_bytes());
                Ok(2)
            }
            Value::Int32(n) => {
                ensure_buf_len!(buf, 4);
                buf[0..4].copy_from_slice(&n.to_le_bytes());
                Ok(4)
            }
            Value::Int64(n) => {
                ensure_buf_len!(buf, 8);
                buf[0..8].copy_from_slice(&n.to_le_bytes());
                Ok(8)
            }
            Value::Float32(n) => {
                ensure_buf_len!(buf, 4);
                buf[0..4].copy_from_slice(&n.to_le_bytes());
                Ok(4)
            }
            Value::Float64(n) => {
                ensure_buf_len!(buf, 8);
                buf[0..8].copy_from_slice(&n.to_le_bytes());
                Ok(8)
            }
            Value::Text(s) => {
                let data = s.as_bytes();
                let required = 4 + data.len();
                ensure_buf_len!(buf, required);
                buf[0..4].copy_from_slice(&(data.len() as u32).to_le_bytes());
                buf[4..4 + data.len()].copy_from_slice(data);
                Ok(required)
            }
            Value::Bytea(data) => {
                let required = 4 + data.len();
                ensure_buf_len!(buf, required);
                buf[0..4].copy_from_slice(&(data.len() as u32).to_le_bytes());
                buf[4..4 + data.len()].copy_from_slice(data);
                Ok(required)
            }
        }
    }

    /// Deserializes a value from a buffer given its data type.
    ///
    /// Returns the value and the number of bytes consumed.
    pub fn deserialize(buf: &[u8], ty: Type) -> Result<(Self, usize), SerializationError> {
        match ty {
            Type::Bool => {
                ensure_buf_len!(buf, 1);
                Ok((Value::Boolean(buf[0] != 0), 1))
            }
            Type::Int2 => {
                ensure_buf_len!(buf, 2);
                let n = i16::from_le_bytes([buf[0], buf[1]]);
                Ok((Value::Int16(n), 2))
            }
            Type::Int4 => {
                ensure_buf_len!(buf, 4);
                let n = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                Ok((Value::Int32(n), 4))
            }
            Type::Int8 => {
                ensure_buf_len!(buf, 8);
                let n = i64::from_le_bytes(buf[0..8].try_into().unwrap());
                Ok((Value::Int64(n), 8))
            }
            Type::Float4 => {
                ensure_buf_len!(buf, 4);
                let n = f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                Ok((Value::Float32(n), 4))
            }
            Type::Float8 => {
                ensure_buf_len!(buf, 8);
                let n = f64::from_le_bytes(buf[0..8].try_into().unwrap());
                Ok((Value::Float64(n), 8))
            }
            Type::Text => {
                ensure_buf_len!(buf, 4);
                let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                let required = 4 + len;
                ensure_buf_len!(buf, required);
                let s = String::from_utf8(buf[4..4 + len].to_vec())
                    .map_err(|e| SerializationError::InvalidFormat(e.to_string()))?;
                Ok((Value::Text(s), required))
            }
            Type::Bytea => {
                ensure_buf_len!(buf, 4);
                let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                let required = 4 + len;
                ensure_buf_len!(buf, required);
                Ok((Value::Bytea(buf[4..4 + len].to_vec()), required))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "t" } else { "f" }),
            Value::Int16(n) => write!(f, "{}", n),
            Value::Int32(n) => write!(f, "{}", n),
            Value::Int64(n) => write!(f, "{}", n),
            Value::Float32(n) => write!(f, "{}", n),
            Value::Float64(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytea(b) => {
                write!(f, "\\x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}
