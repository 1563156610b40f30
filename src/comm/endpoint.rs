//! The per-worker messaging endpoint.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::shmem::{MessageKind, NodeId, PortId, SharedRegion};

use super::request::Request;
use super::CommError;

/// The immutable per-worker messaging context.
///
/// Carries the worker's own partition id, the total partition count, and
/// the shared region — populated once at process start and passed into
/// every Exchange and messaging call. Cloning is cheap (`Arc` inside).
#[derive(Clone)]
pub struct Communicator {
    region: Arc<SharedRegion>,
    node: NodeId,
}

impl Communicator {
    /// Attaches a worker to an open region under its own partition id.
    pub fn attach(region: Arc<SharedRegion>, node: NodeId) -> Result<Self, CommError> {
        let nodes = region.nodes();
        if node >= nodes {
            return Err(CommError::NodeOutOfRange { node, nodes });
        }
        Ok(Self { region, node })
    }

    /// This worker's partition id.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Total partition count, fixed for the region's lifetime.
    pub fn nodes(&self) -> usize {
        self.region.nodes()
    }

    /// The region's per-message payload ceiling.
    pub fn max_message(&self) -> usize {
        self.region.config().max_message
    }

    fn ensure_size(&self, size: usize) -> Result<(), CommError> {
        let max = self.max_message();
        if size > max {
            return Err(CommError::PayloadTooLarge { size, max });
        }
        Ok(())
    }

    /// Issues a non-blocking send of `payload` to `dst` on `port`.
    ///
    /// On return the message is durably recorded in the shared region,
    /// not necessarily delivered. Completion is observed via
    /// [`test`](Self::test) on the same handle.
    pub fn send(
        &self,
        dst: NodeId,
        port: PortId,
        payload: &[u8],
        request: &mut Request,
    ) -> Result<(), CommError> {
        self.ensure_size(payload.len())?;
        if request.is_pending() {
            return Err(CommError::RequestBusy);
        }

        let id = self.region.acquire_free_block();
        {
            let mut body = self.region.block(id).body.lock();
            body.src = self.node;
            body.dst = dst;
            body.port = port;
            body.kind = MessageKind::Outgoing;
            body.payload = Bytes::copy_from_slice(payload);
            body.capacity = 0;
        }
        self.region.enqueue_pending(id);
        request.issue(id);
        trace!(src = self.node, dst, port, size = payload.len(), "send issued");
        Ok(())
    }

    /// Issues a non-blocking receive for a message from `src` on `port`.
    ///
    /// `capacity` is the acceptance ceiling for the incoming payload; a
    /// delivered payload larger than this is a protocol error. The
    /// delivered bytes are parked in the handle when [`test`](Self::test)
    /// reports completion.
    pub fn recv(
        &self,
        src: NodeId,
        port: PortId,
        capacity: usize,
        request: &mut Request,
    ) -> Result<(), CommError> {
        self.ensure_size(capacity)?;
        if request.is_pending() {
            return Err(CommError::RequestBusy);
        }

        let id = self.region.acquire_free_block();
        {
            let mut body = self.region.block(id).body.lock();
            body.src = src;
            body.dst = self.node;
            body.port = port;
            body.kind = MessageKind::Incoming;
            body.payload = Bytes::new();
            body.capacity = capacity;
        }
        self.region.enqueue_pending(id);
        request.issue(id);
        trace!(src, dst = self.node, port, capacity, "recv issued");
        Ok(())
    }

    /// Tests a request for completion without blocking.
    ///
    /// Returns true once the operation has completed; for a receive the
    /// delivered payload is moved into the handle first. The block is
    /// cleared and returned to the free list exactly once per request:
    /// testing an idle handle reports completion and has no side effects.
    pub fn test(&self, request: &mut Request) -> Result<bool, CommError> {
        let Some(id) = request.block() else {
            return Ok(true);
        };

        let block = self.region.block(id);
        if !block.is_processed() {
            return Ok(false);
        }

        let delivered = {
            let mut body = block.body.lock();
            let delivered = match body.kind {
                MessageKind::Outgoing => None,
                MessageKind::Incoming => Some(std::mem::take(&mut body.payload)),
                kind => {
                    return Err(CommError::Protocol(format!(
                        "request handle resolved to a {kind:?} block"
                    )))
                }
            };
            body.reset();
            delivered
        };

        // Consume the single completion token, then recycle the slot.
        block.state.wait();
        self.region.release_block(id);
        request.complete(delivered);
        Ok(true)
    }

    /// Asks whether a message from `src` on `port` is waiting, returning
    /// its size without consuming it.
    ///
    /// This is the substrate's one blocking query: it waits for the
    /// delivery loop to answer.
    pub fn probe(&self, src: NodeId, port: PortId) -> Result<Option<usize>, CommError> {
        let id = self.region.acquire_free_block();
        {
            let mut body = self.region.block(id).body.lock();
            body.src = src;
            body.dst = self.node;
            body.port = port;
            body.kind = MessageKind::Probe;
        }
        self.region.enqueue_pending(id);

        let block = self.region.block(id);
        block.state.wait();
        let size = {
            let mut body = block.body.lock();
            let size = body.probe_size;
            body.reset();
            size
        };
        self.region.release_block(id);
        trace!(src, dst = self.node, port, ?size, "probe answered");
        Ok(size)
    }

    /// Signals that this worker has finished all messaging.
    ///
    /// Only valid once every one of this worker's outstanding sends and
    /// receives has completed. The delivery loop exits after all workers
    /// have closed.
    pub fn close(&self) {
        let id = self.region.acquire_free_block();
        {
            let mut body = self.region.block(id).body.lock();
            body.src = self.node;
            body.dst = self.node;
            body.kind = MessageKind::Close;
        }
        self.region.enqueue_pending(id);
        debug!(node = self.node, "close issued");
    }
}
