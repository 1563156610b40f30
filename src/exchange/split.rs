use crate::comm::NodeId;
use crate::exec::{ExecError, Poll, RowSource};
use crate::exchange::{partition, Scatter};
use crate::row::RowMark;

/// The classifying half of an Exchange.
///
/// Split pulls rows from its child and routes each by ownership: native
/// rows (owned by this partition) flow through to the caller, foreign
/// rows are handed to the Scatter. With `relocate` enabled, a stored row
/// that now belongs elsewhere is shipped as `InsertElsewhere` while a
/// `DeleteMe` copy is yielded locally, so an update that changes the
/// partitioning key moves the row between fragments.
pub struct Split {
    child: Box<dyn RowSource>,
    scatter: Scatter,
    attr: usize,
    relocate: bool,
    node: NodeId,
    nodes: usize,
    sent_eos: bool,
}

impl Split {
    pub fn new(child: Box<dyn RowSource>, scatter: Scatter, attr: usize, relocate: bool) -> Self {
        let node = scatter.comm().node();
        let nodes = scatter.comm().nodes();
        Self {
            child,
            scatter,
            attr,
            relocate,
            node,
            nodes,
            sent_eos: false,
        }
    }
}

impl RowSource for Split {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        if self.sent_eos {
            return Ok(Poll::Done);
        }
        // The send slot must be free before another row is pulled, or a
        // foreign row would have nowhere to go.
        if !self.scatter.drive()? {
            return Ok(Poll::Waiting);
        }
        match self.child.poll()? {
            Poll::Waiting => Ok(Poll::Waiting),
            Poll::Done => {
                self.scatter.send_eos()?;
                self.sent_eos = true;
                Ok(Poll::Done)
            }
            Poll::Row(mut row) => {
                let owner = partition(&row.record, self.attr, self.nodes)?;
                if owner == self.node {
                    return Ok(Poll::Row(row));
                }
                match row.mark {
                    RowMark::Stored(id) if self.relocate => {
                        let mut shipped = row.clone();
                        shipped.mark = RowMark::InsertElsewhere;
                        self.scatter.send_row(&shipped)?;
                        row.mark = RowMark::DeleteMe(id);
                        Ok(Poll::Row(row))
                    }
                    _ => {
                        self.scatter.send_row(&row)?;
                        Ok(Poll::Waiting)
                    }
                }
            }
        }
    }

    fn shutdown(&mut self) -> Result<(), ExecError> {
        self.child.shutdown()?;
        self.scatter.drain()
    }
}
