//! The delivery loop pairing outgoing messages with incoming requests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use tracing::{debug, error, trace};

use crate::shmem::{BlockId, MessageKind, NodeId, PortId, SharedRegion};

use super::CommError;

/// Key identifying one directed message flow.
type FlowKey = (NodeId, NodeId, PortId);

/// The delivery loop for one shared region.
///
/// Drains the region's pending FIFO in order. An Outgoing block's payload
/// is moved out and the block marked processed immediately — a send
/// completes when it is durably recorded, not when delivered. The payload
/// then either completes a parked Incoming directly or waits in a
/// per-flow stash. Incoming blocks complete from the stash or park until
/// a matching Outgoing arrives. Probes answer with the head-of-stash size
/// without consuming it. The loop exits once every worker has issued a
/// Close.
pub struct Router {
    region: Arc<SharedRegion>,
    /// Undelivered payloads per flow, in arrival order.
    stash: HashMap<FlowKey, VecDeque<Bytes>>,
    /// Incoming blocks waiting for a matching payload, in arrival order.
    parked: HashMap<FlowKey, VecDeque<BlockId>>,
    closed: usize,
}

impl Router {
    /// Spawns the delivery thread for `region`.
    ///
    /// The thread runs until all `region.nodes()` workers have closed, or
    /// until a protocol violation aborts delivery.
    pub fn spawn(region: Arc<SharedRegion>) -> JoinHandle<Result<(), CommError>> {
        std::thread::spawn(move || {
            let router = Router {
                region,
                stash: HashMap::new(),
                parked: HashMap::new(),
                closed: 0,
            };
            router.run().inspect_err(|e| error!("router aborted: {e}"))
        })
    }

    fn run(mut self) -> Result<(), CommError> {
        debug!(nodes = self.region.nodes(), "router started");
        loop {
            let id = self.region.dequeue_pending();
            let kind = self.region.block(id).body.lock().kind;
            match kind {
                MessageKind::Outgoing => self.route_outgoing(id)?,
                MessageKind::Incoming => self.route_incoming(id)?,
                MessageKind::Probe => self.answer_probe(id),
                MessageKind::Close => {
                    {
                        let mut body = self.region.block(id).body.lock();
                        body.reset();
                    }
                    self.region.release_block(id);
                    self.closed += 1;
                    debug!(closed = self.closed, "worker closed");
                    if self.closed == self.region.nodes() {
                        break;
                    }
                }
            }
        }
        debug!("router finished");
        Ok(())
    }

    fn route_outgoing(&mut self, id: BlockId) -> Result<(), CommError> {
        let block = self.region.block(id);
        let (key, payload) = {
            let mut body = block.body.lock();
            let key = (body.src, body.dst, body.port);
            (key, std::mem::take(&mut body.payload))
        };
        trace!(src = key.0, dst = key.1, port = key.2, size = payload.len(), "routing send");

        // The send is recorded; complete it before delivery so the
        // sender's block returns to the pool promptly.
        block.mark_processed();

        if let Some(waiter) = self.pop_parked(key) {
            self.complete_incoming(waiter, payload)
        } else {
            self.stash.entry(key).or_default().push_back(payload);
            Ok(())
        }
    }

    fn route_incoming(&mut self, id: BlockId) -> Result<(), CommError> {
        let key = {
            let body = self.region.block(id).body.lock();
            (body.src, body.dst, body.port)
        };
        let stashed = self
            .stash
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());
        match stashed {
            Some(payload) => self.complete_incoming(id, payload),
            None => {
                trace!(src = key.0, dst = key.1, port = key.2, "recv parked");
                self.parked.entry(key).or_default().push_back(id);
                Ok(())
            }
        }
    }

    /// Writes a payload into a waiting Incoming block and completes it.
    fn complete_incoming(&self, id: BlockId, payload: Bytes) -> Result<(), CommError> {
        let block = self.region.block(id);
        {
            let mut body = block.body.lock();
            if body.kind != MessageKind::Incoming {
                return Err(CommError::Protocol(format!(
                    "payload delivered to a {:?} block",
                    body.kind
                )));
            }
            if payload.len() > body.capacity {
                return Err(CommError::Protocol(format!(
                    "{}-byte payload exceeds the receive capacity of {}",
                    payload.len(),
                    body.capacity
                )));
            }
            trace!(
                src = body.src,
                dst = body.dst,
                port = body.port,
                size = payload.len(),
                "recv completed"
            );
            body.payload = payload;
        }
        block.mark_processed();
        Ok(())
    }

    fn answer_probe(&mut self, id: BlockId) {
        let block = self.region.block(id);
        {
            let mut body = block.body.lock();
            let key = (body.src, body.dst, body.port);
            body.probe_size = self
                .stash
                .get(&key)
                .and_then(|queue| queue.front())
                .map(Bytes::len);
        }
        block.mark_processed();
    }

    fn pop_parked(&mut self, key: FlowKey) -> Option<BlockId> {
        self.parked.get_mut(&key).and_then(|queue| queue.pop_front())
    }
}
