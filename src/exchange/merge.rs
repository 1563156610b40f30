use crate::exec::{ExecError, Poll, RowSource};
use crate::exchange::{Gather, Split};

/// The output half of an Exchange.
///
/// Merge unions the native stream from its Split with the remote stream
/// from its Gather, favoring the local side, and is done only once both
/// are. The union is unordered; any required ordering is re-established
/// above the Exchange.
pub struct Merge {
    split: Split,
    gather: Gather,
    split_done: bool,
    gather_done: bool,
}

impl Merge {
    pub fn new(split: Split, gather: Gather) -> Self {
        Self {
            split,
            gather,
            split_done: false,
            gather_done: false,
        }
    }
}

impl RowSource for Merge {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        if !self.split_done {
            match self.split.poll()? {
                Poll::Row(row) => return Ok(Poll::Row(row)),
                Poll::Done => self.split_done = true,
                Poll::Waiting => {}
            }
        }
        if !self.gather_done {
            match self.gather.poll()? {
                Poll::Row(row) => return Ok(Poll::Row(row)),
                Poll::Done => self.gather_done = true,
                Poll::Waiting => {}
            }
        }
        if self.split_done && self.gather_done {
            Ok(Poll::Done)
        } else {
            Ok(Poll::Waiting)
        }
    }

    fn shutdown(&mut self) -> Result<(), ExecError> {
        self.split.shutdown()?;
        self.gather.shutdown()
    }
}
