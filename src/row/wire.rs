//! Wire codec for shipping rows between partitions.
//!
//! The packed layout is self-delimiting and byte-exact:
//!
//! ```text
//! +--------------------------+
//! | column count (u16 LE)    |  always >= 1
//! +--------------------------+
//! | mark tag (1 B)           |  + page (u32 LE) + slot (u16 LE) if located
//! +--------------------------+
//! | record (bitmap + values) |
//! +--------------------------+
//! ```
//!
//! The two-byte all-zero payload [`EOS_PAYLOAD`] is reserved as the
//! end-of-stream marker. A packed row always starts with a non-zero
//! column count, so the two encodings can never collide; packing a
//! zero-column row is rejected.

use crate::datum::{SerializationError, Type};

use super::{Record, Row, RowId, RowMark};

/// The end-of-stream wire marker: a fixed two-byte all-zero payload.
pub const EOS_PAYLOAD: [u8; 2] = [0, 0];

const MARK_COMPUTED: u8 = 0;
const MARK_STORED: u8 = 1;
const MARK_INSERT_ELSEWHERE: u8 = 2;
const MARK_DELETE_ME: u8 = 3;

/// Errors from the row wire codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A zero-column row cannot be packed (its encoding would collide
    /// with the end-of-stream marker).
    #[error("cannot pack a row with no columns")]
    EmptyRow,
    /// The payload's column count does not match the expected schema.
    #[error("column count mismatch: payload has {found}, schema has {expected}")]
    ColumnCountMismatch {
        /// Columns found in the payload.
        found: usize,
        /// Columns in the schema.
        expected: usize,
    },
    /// Unknown location marker tag.
    #[error("unknown row mark tag {0}")]
    UnknownMark(u8),
    /// Truncated or malformed payload.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// Value-level serialization failure.
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

impl Row {
    /// Packs this row into its wire representation.
    pub fn pack(&self) -> Result<Vec<u8>, CodecError> {
        let num_cols = self.record.len();
        if num_cols == 0 {
            return Err(CodecError::EmptyRow);
        }
        let num_cols =
            u16::try_from(num_cols).map_err(|_| CodecError::Malformed("too many columns".into()))?;

        let mut buf = Vec::with_capacity(2 + 8 + self.record.serialized_size());
        buf.extend_from_slice(&num_cols.to_le_bytes());
        match self.mark {
            RowMark::Computed => buf.push(MARK_COMPUTED),
            RowMark::Stored(id) => {
                buf.push(MARK_STORED);
                buf.extend_from_slice(&id.page.to_le_bytes());
                buf.extend_from_slice(&id.slot.to_le_bytes());
            }
            RowMark::InsertElsewhere => buf.push(MARK_INSERT_ELSEWHERE),
            RowMark::DeleteMe(id) => {
                buf.push(MARK_DELETE_ME);
                buf.extend_from_slice(&id.page.to_le_bytes());
                buf.extend_from_slice(&id.slot.to_le_bytes());
            }
        }

        let offset = buf.len();
        buf.resize(offset + self.record.serialized_size(), 0);
        self.record.serialize(&mut buf[offset..])?;
        Ok(buf)
    }

    /// Unpacks a row from its wire representation.
    ///
    /// `schema` supplies the column types; its length must match the
    /// packed column count.
    pub fn unpack(buf: &[u8], schema: &[Type]) -> Result<Self, CodecError> {
        if buf.len() < 3 {
            return Err(CodecError::Malformed(format!(
                "payload of {} bytes is too short",
                buf.len()
            )));
        }
        let num_cols = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        if num_cols == 0 {
            return Err(CodecError::EmptyRow);
        }
        if num_cols != schema.len() {
            return Err(CodecError::ColumnCountMismatch {
                found: num_cols,
                expected: schema.len(),
            });
        }

        let (mark, offset) = match buf[2] {
            MARK_COMPUTED => (RowMark::Computed, 3),
            MARK_INSERT_ELSEWHERE => (RowMark::InsertElsewhere, 3),
            tag @ (MARK_STORED | MARK_DELETE_ME) => {
                if buf.len() < 3 + 6 {
                    return Err(CodecError::Malformed("truncated row id".into()));
                }
                let page = u32::from_le_bytes([buf[3], buf[4], buf[5], buf[6]]);
                let slot = u16::from_le_bytes([buf[7], buf[8]]);
                let id = RowId::new(page, slot);
                let mark = if tag == MARK_STORED {
                    RowMark::Stored(id)
                } else {
                    RowMark::DeleteMe(id)
                };
                (mark, 9)
            }
            tag => return Err(CodecError::UnknownMark(tag)),
        };

        let (record, _) = Record::deserialize(&buf[offset..], schema)?;
        Ok(Row { mark, record })
    }
}

/// Returns true if a received payload is the end-of-stream marker.
pub(crate) fn is_eos(payload: &[u8]) -> bool {
    payload == EOS_PAYLOAD
}
