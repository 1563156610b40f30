//! Shared-memory block pool: the lower half of the messaging substrate.
//!
//! This module provides:
//! - [`Semaphore`]: a counting semaphore, the only blocking primitive in
//!   the crate
//! - [`Block`] / [`BlockId`]: fixed-capacity message slots addressed by
//!   index (no pointer aliasing, so the layout stays portable across
//!   processes that do not share an address-space view)
//! - [`SharedRegion`]: the block arena plus a free-list stack and a
//!   pending-work FIFO, both guarded by a mutex and signalled by a
//!   counting semaphore
//!
//! A region is created once by a coordinator under a name and opened by
//! every worker before any messaging call. The free-list and pending
//! queue are the designed backpressure mechanism: a producer that finds
//! no free block simply waits for one.

mod block;
mod region;
mod semaphore;

pub use block::{Block, BlockBody, BlockId, MessageKind, NodeId, PortId};
pub use region::{RegionConfig, RegionError, SharedRegion};
pub use semaphore::Semaphore;
