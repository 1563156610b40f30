use tracing::{debug, trace};

use crate::comm::{Communicator, PortId, Request};
use crate::datum::Type;
use crate::exec::{ExecError, Poll, RowSource};
use crate::row::{is_eos, Row};

/// The receiving half of an Exchange.
///
/// Gather keeps one receive outstanding per peer and yields rows as they
/// arrive, in whatever order the peers produce them. A peer's slot is
/// retired when its end-of-stream marker arrives; the stream is done once
/// every peer has been retired. On a single-node cluster there are no
/// peers and Gather is done immediately.
pub struct Gather {
    comm: Communicator,
    port: PortId,
    schema: Vec<Type>,
    capacity: usize,
    requests: Vec<Option<Request>>,
    peers: usize,
    eos_seen: usize,
}

impl Gather {
    pub fn new(comm: Communicator, port: PortId, schema: Vec<Type>) -> Result<Self, ExecError> {
        let capacity = comm.max_message();
        let me = comm.node();
        let mut requests = Vec::with_capacity(comm.nodes());
        for src in 0..comm.nodes() {
            if src == me {
                requests.push(None);
                continue;
            }
            let mut request = Request::idle();
            comm.recv(src, port, capacity, &mut request)?;
            requests.push(Some(request));
        }
        let peers = comm.nodes() - 1;
        Ok(Self {
            comm,
            port,
            schema,
            capacity,
            requests,
            peers,
            eos_seen: 0,
        })
    }
}

impl RowSource for Gather {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        if self.eos_seen == self.peers {
            return Ok(Poll::Done);
        }
        for src in 0..self.requests.len() {
            let Some(request) = self.requests[src].as_mut() else {
                continue;
            };
            if !self.comm.test(request)? {
                continue;
            }
            let payload = request.take_payload().ok_or_else(|| ExecError::ExchangeProtocol {
                port: self.port,
                reason: format!("receive from {src} completed without a payload"),
            })?;
            if is_eos(&payload) {
                self.requests[src] = None;
                self.eos_seen += 1;
                if self.eos_seen > self.peers {
                    return Err(ExecError::ExchangeProtocol {
                        port: self.port,
                        reason: "more end-of-stream markers than peers".into(),
                    });
                }
                debug!(port = self.port, src, "peer stream ended");
                continue;
            }
            let row = Row::unpack(&payload, &self.schema)?;
            self.comm.recv(src, self.port, self.capacity, request)?;
            trace!(port = self.port, src, "row gathered");
            return Ok(Poll::Row(row));
        }
        if self.eos_seen == self.peers {
            Ok(Poll::Done)
        } else {
            Ok(Poll::Waiting)
        }
    }

    fn shutdown(&mut self) -> Result<(), ExecError> {
        let outstanding = self.requests.iter().filter(|r| r.is_some()).count();
        if outstanding > 0 {
            debug!(
                port = self.port,
                outstanding, "gather shut down with peers still open"
            );
        }
        Ok(())
    }
}
