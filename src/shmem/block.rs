//! Message blocks: the fixed-capacity slots owned by a shared region.

use bytes::Bytes;
use parking_lot::Mutex;

use super::Semaphore;

/// Identity of one worker partition, in `[0, nodes)`.
pub type NodeId = usize;

/// Channel identifier scoping messages to one logical Exchange instance.
///
/// Assigned monotonically by the parallelizer per query so concurrently
/// active Exchanges do not cross-deliver.
pub type PortId = u32;

/// Index of a block within its region's slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

/// What a block is asking the delivery loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A message to be delivered to `dst`.
    Outgoing,
    /// A request for a message from `src`.
    Incoming,
    /// A query for the size of an undelivered message, answered without
    /// consuming it.
    Probe,
    /// The issuing worker has finished all messaging.
    Close,
}

/// The mutable payload area of a message block.
///
/// A body is written by the borrowing request and by the delivery loop;
/// the block's state semaphore decides which side owns it.
#[derive(Debug)]
pub struct BlockBody {
    /// Originating partition.
    pub src: NodeId,
    /// Destination partition.
    pub dst: NodeId,
    /// Exchange channel.
    pub port: PortId,
    /// Request kind.
    pub kind: MessageKind,
    /// Message bytes (Outgoing: the payload to deliver; Incoming: the
    /// delivered payload once processed).
    pub payload: Bytes,
    /// Acceptance ceiling for Incoming requests.
    pub capacity: usize,
    /// Size answer for Probe requests (`None`: no message waiting).
    pub probe_size: Option<usize>,
}

impl BlockBody {
    fn empty() -> Self {
        Self {
            src: 0,
            dst: 0,
            port: 0,
            kind: MessageKind::Close,
            payload: Bytes::new(),
            capacity: 0,
            probe_size: None,
        }
    }

    /// Clears the body before the block returns to the free list.
    pub fn reset(&mut self) {
        *self = Self::empty();
    }
}

/// A fixed-capacity shared-memory message slot.
///
/// The state semaphore holds 0 while the block is unprocessed and 1 once
/// the delivery loop has processed it; `test` reads the value without
/// blocking and resets it by waiting exactly once.
pub struct Block {
    /// Completion state: 0 = unprocessed, 1 = processed.
    pub state: Semaphore,
    /// Request data, serialized by the mutex.
    pub body: Mutex<BlockBody>,
}

impl Block {
    pub(super) fn new() -> Self {
        Self {
            state: Semaphore::new(0),
            body: Mutex::new(BlockBody::empty()),
        }
    }

    /// Returns true once the delivery loop has processed this block.
    pub fn is_processed(&self) -> bool {
        self.state.value() > 0
    }

    /// Marks this block processed, completing the borrowing request.
    pub fn mark_processed(&self) {
        self.state.post();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_state_cycle() {
        let block = Block::new();
        assert!(!block.is_processed());
        block.mark_processed();
        assert!(block.is_processed());
        // Reset consumes the single completion token.
        block.state.wait();
        assert!(!block.is_processed());
    }

    #[test]
    fn test_body_reset() {
        let block = Block::new();
        {
            let mut body = block.body.lock();
            body.src = 3;
            body.dst = 1;
            body.port = 9;
            body.kind = MessageKind::Outgoing;
            body.payload = Bytes::from_static(b"xyz");
            body.reset();
            assert_eq!(body.src, 0);
            assert!(body.payload.is_empty());
            assert_eq!(body.probe_size, None);
        }
    }
}
