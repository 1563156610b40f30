//! Rows, records, and the wire codec used between partitions.
//!
//! This module provides:
//! - [`Record`]: a tuple of [`Value`](crate::datum::Value)s with compact
//!   null-bitmap serialization
//! - [`Row`]: a record plus a [`RowMark`] describing its physical location
//! - [`Row::pack`] / [`Row::unpack`]: the byte-exact codec used to ship
//!   rows between partitions, and the reserved end-of-stream marker
//!
//! # Record Serialization
//!
//! ```text
//! +---------------------------+
//! | Null Bitmap (ceil(n/8) B) |  bit=1: NOT NULL, bit=0: NULL
//! +---------------------------+
//! | Value[0] (if not null)    |
//! | Value[1] (if not null)    |
//! | ...                       |
//! +---------------------------+
//! ```

mod record;
mod wire;

pub use record::Record;
pub use wire::{CodecError, EOS_PAYLOAD};

pub(crate) use wire::is_eos;

/// Physical location of a row within its table fragment.
///
/// Combines a page number with a slot position on that page, uniquely
/// identifying a stored row for DML operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId {
    /// Page containing the row.
    pub page: u32,
    /// Slot within the page.
    pub slot: u16,
}

impl RowId {
    /// Creates a row id from a page number and slot.
    pub const fn new(page: u32, slot: u16) -> Self {
        Self { page, slot }
    }
}

/// The mutable location marker carried by every [`Row`].
///
/// A row scanned from storage starts as `Stored`. The Split operator's
/// relocation path re-tags the marker when an update moves a row to a
/// different partition: the copy shipped to the new owner is tagged
/// `InsertElsewhere` ("my old location is gone, insert me"), and the copy
/// kept locally becomes `DeleteMe` ("remove this stored version").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowMark {
    /// Computed row with no physical location (projections, received rows).
    Computed,
    /// Row stored at the given location on this partition.
    Stored(RowId),
    /// Relocated row: insert at the receiving partition.
    InsertElsewhere,
    /// Stored row superseded by a relocation: delete the local copy.
    DeleteMe(RowId),
}

/// A single row flowing through the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Location marker.
    pub mark: RowMark,
    /// The column values.
    pub record: Record,
}

impl Row {
    /// Creates a row scanned from storage at the given location.
    pub fn stored(id: RowId, record: Record) -> Self {
        Self {
            mark: RowMark::Stored(id),
            record,
        }
    }

    /// Creates a computed row without a physical location.
    pub fn computed(record: Record) -> Self {
        Self {
            mark: RowMark::Computed,
            record,
        }
    }
}
