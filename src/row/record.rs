//! Record (tuple) representation and null-bitmap serialization.

use crate::datum::{SerializationError, Type, Value};

/// A record (tuple/row) consisting of multiple values.
///
/// This is the logical representation of a row in memory. The serialized
/// form is a null bitmap (bit=1 means NOT NULL) followed by the non-null
/// values in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Column values in order.
    pub values: Vec<Value>,
}

impl Record {
    /// Creates a new record with the given values.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the serialized size of this record in bytes.
    ///
    /// This includes the null bitmap and all non-null values.
    pub fn serialized_size(&self) -> usize {
        let null_bitmap_bytes = self.values.len().div_ceil(8);
        let values_size: usize = self
            .values
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| v.serialized_size())
            .sum();
        null_bitmap_bytes + values_size
    }

    /// Serializes this record to a buffer.
    ///
    /// Returns the number of bytes written.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize, SerializationError> {
        let required = self.serialized_size();
        if buf.len() < required {
            return Err(SerializationError::BufferTooSmall {
                required,
                available: buf.len(),
            });
        }

        let num_cols = self.values.len();
        let null_bitmap_bytes = num_cols.div_ceil(8);

        // Write null bitmap (bit=1 means NOT NULL)
        for (i, byte) in buf.iter_mut().take(null_bitmap_bytes).enumerate() {
            let mut b = 0u8;
            for bit in 0..8 {
                let col_idx = i * 8 + bit;
                if col_idx < num_cols && !self.values[col_idx].is_null() {
                    b |= 1 << bit;
                }
            }
            *byte = b;
        }

        // Write non-null values
        let mut offset = null_bitmap_bytes;
        for value in &self.values {
            if !value.is_null() {
                offset += value.serialize(&mut buf[offset..])?;
            }
        }

        Ok(offset)
    }

    /// Deserializes a record from a buffer.
    ///
    /// `schema` supplies the column types needed to parse each value.
    /// Returns the record and the number of bytes consumed.
    pub fn deserialize(buf: &[u8], schema: &[Type]) -> Result<(Self, usize), SerializationError> {
        let num_cols = schema.len();
        let null_bitmap_bytes = num_cols.div_ceil(8);

        if buf.len() < null_bitmap_bytes {
            return Err(SerializationError::BufferTooSmall {
                required: null_bitmap_bytes,
                available: buf.len(),
            });
        }

        let mut offset = null_bitmap_bytes;
        let mut values = Vec::with_capacity(num_cols);

        for (i, &ty) in schema.iter().enumerate() {
            // bit=1 means NOT NULL, so the value is NULL when the bit is 0
            let is_null = (buf[i / 8] & (1 << (i % 8))) == 0;
            if is_null {
                values.push(Value::Null);
            } else {
                let (value, consumed) = Value::deserialize(&buf[offset..], ty)?;
                values.push(value);
                offset += consumed;
            }
        }

        Ok((Record { values }, offset))
    }
}
