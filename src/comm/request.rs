//! Request handles for in-flight messaging operations.

use bytes::Bytes;

use crate::shmem::BlockId;

/// A caller-held token for one in-flight send or receive.
///
/// A handle references at most one message block at a time and cycles
/// unissued → pending → completed → unissued. For receives, the delivered
/// payload is parked in the handle by [`Communicator::test`]
/// (crate::comm::Communicator::test) until the caller takes it.
#[derive(Debug, Default)]
pub struct Request {
    block: Option<BlockId>,
    delivered: Option<Bytes>,
}

impl Request {
    /// Creates an unissued handle.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Returns true while an operation is outstanding.
    pub fn is_pending(&self) -> bool {
        self.block.is_some()
    }

    /// Takes the payload delivered by a completed receive, if any.
    pub fn take_payload(&mut self) -> Option<Bytes> {
        self.delivered.take()
    }

    pub(super) fn block(&self) -> Option<BlockId> {
        self.block
    }

    pub(super) fn issue(&mut self, block: BlockId) {
        debug_assert!(self.block.is_none());
        self.block = Some(block);
        self.delivered = None;
    }

    pub(super) fn complete(&mut self, delivered: Option<Bytes>) {
        self.block = None;
        self.delivered = delivered;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_lifecycle() {
        let mut req = Request::idle();
        assert!(!req.is_pending());
        assert_eq!(req.take_payload(), None);

        req.issue(BlockId(7));
        assert!(req.is_pending());

        req.complete(Some(Bytes::from_static(b"row")));
        assert!(!req.is_pending());
        assert_eq!(req.take_payload(), Some(Bytes::from_static(b"row")));
        // take_payload drains the handle
        assert_eq!(req.take_payload(), None);
    }
}
