//! Non-blocking messaging between worker partitions.
//!
//! This is the upper half of the messaging substrate. It provides:
//! - [`Communicator`]: the immutable per-worker context (own node id,
//!   node count, shared region) through which every messaging call goes
//! - [`Request`]: a caller-held handle for one in-flight send or receive
//! - [`Router`]: the delivery loop that drains a region's pending FIFO
//!   and pairs outgoing messages with incoming requests
//!
//! All send/receive calls return immediately; completion is observed by
//! polling [`Communicator::test`]. The only blocking operations are
//! [`Communicator::probe`] and the substrate's internal semaphore waits,
//! which act as backpressure when the block pool is exhausted.

mod endpoint;
mod request;
mod router;

pub use endpoint::Communicator;
pub use request::Request;
pub use router::Router;

pub use crate::shmem::{NodeId, PortId};

/// Errors from the messaging layer.
///
/// Every variant is fatal for the query on this node: oversized payloads
/// cannot shrink on retry, and protocol violations indicate a channel-id
/// or delivery bug, not a recoverable runtime condition.
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    /// Payload exceeds the region's per-message size ceiling.
    #[error("payload of {size} bytes exceeds the {max}-byte message ceiling")]
    PayloadTooLarge {
        /// Attempted payload size.
        size: usize,
        /// The region's ceiling.
        max: usize,
    },
    /// The request handle already has an outstanding operation.
    #[error("request handle already has an outstanding operation")]
    RequestBusy,
    /// Worker id out of range for the region.
    #[error("node {node} out of range for a {nodes}-node region")]
    NodeOutOfRange {
        /// Offending node id.
        node: NodeId,
        /// Region's worker count.
        nodes: usize,
    },
    /// Malformed or unexpected message observed by the delivery layer.
    #[error("messaging protocol violation: {0}")]
    Protocol(String),
}
