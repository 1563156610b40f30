use std::thread;

use tracing::{debug, trace};

use crate::comm::{Communicator, PortId, Request};
use crate::exec::ExecError;
use crate::exchange::partition;
use crate::row::{Row, EOS_PAYLOAD};

/// The sending half of an Exchange.
///
/// Scatter ships foreign rows to the partition that owns them and, once
/// the upstream is exhausted, broadcasts one end-of-stream marker to
/// every peer. It keeps at most one row send in flight; the per-peer
/// end-of-stream sends are retained and completed in [`drain`].
///
/// [`drain`]: Scatter::drain
pub struct Scatter {
    comm: Communicator,
    port: PortId,
    attr: usize,
    outgoing: Request,
    eos: Vec<Request>,
}

impl Scatter {
    pub fn new(comm: Communicator, port: PortId, attr: usize) -> Self {
        Self {
            comm,
            port,
            attr,
            outgoing: Request::idle(),
            eos: Vec::new(),
        }
    }

    pub(super) fn comm(&self) -> &Communicator {
        &self.comm
    }

    /// Advances the in-flight row send, if any.
    ///
    /// Returns true when the send slot is free and another row can be
    /// shipped. Never blocks.
    pub fn drive(&mut self) -> Result<bool, ExecError> {
        Ok(self.comm.test(&mut self.outgoing)?)
    }

    /// Ships `row` to the partition owning its key.
    ///
    /// The caller must have observed an idle send slot via
    /// [`drive`](Self::drive); a busy slot is an error.
    pub fn send_row(&mut self, row: &Row) -> Result<(), ExecError> {
        let dst = partition(&row.record, self.attr, self.comm.nodes())?;
        let payload = row.pack()?;
        self.comm.send(dst, self.port, &payload, &mut self.outgoing)?;
        trace!(port = self.port, dst, "row scattered");
        Ok(())
    }

    /// Broadcasts the end-of-stream marker to every peer.
    ///
    /// The sends are issued eagerly and their handles retained; they
    /// complete during [`drain`](Self::drain).
    pub fn send_eos(&mut self) -> Result<(), ExecError> {
        let me = self.comm.node();
        for peer in 0..self.comm.nodes() {
            if peer == me {
                continue;
            }
            let mut request = Request::idle();
            self.comm.send(peer, self.port, &EOS_PAYLOAD, &mut request)?;
            self.eos.push(request);
        }
        debug!(port = self.port, "end of stream broadcast");
        Ok(())
    }

    /// Spins until every outstanding send has completed.
    ///
    /// Called at operator shutdown so the retained end-of-stream handles
    /// (and any last row send) release their blocks back to the region.
    pub fn drain(&mut self) -> Result<(), ExecError> {
        loop {
            let mut all_done = self.comm.test(&mut self.outgoing)?;
            for request in &mut self.eos {
                all_done &= self.comm.test(request)?;
            }
            if all_done {
                self.eos.clear();
                return Ok(());
            }
            thread::yield_now();
        }
    }
}
