//! The cooperative pull protocol shared by every row-producing operator.
//!
//! All operators are non-blocking: a [`poll`](RowSource::poll) call either
//! produces a row, signals end-of-stream, or asks the caller to retry
//! later. Callers own the retry loop and never sleep inside an operator.

use crate::comm::CommError;
use crate::datum::SerializationError;
use crate::row::{CodecError, Row};

/// Outcome of one poll.
#[derive(Debug)]
pub enum Poll {
    /// A row is available.
    Row(Row),
    /// No row yet; poll again later.
    Waiting,
    /// The stream is exhausted.
    Done,
}

/// A pull-driven row producer.
///
/// Split, Gather, Merge, and every executor node implement this, so the
/// host engine composes operators without caring which concrete variant
/// it holds.
pub trait RowSource: Send {
    /// Advances the operator by one step.
    fn poll(&mut self) -> Result<Poll, ExecError>;

    /// Drains any outstanding messaging requests so teardown is safe.
    ///
    /// Called after the plan has reported [`Poll::Done`]; an operator
    /// with no messaging state does nothing.
    fn shutdown(&mut self) -> Result<(), ExecError> {
        Ok(())
    }
}

/// Errors during plan execution.
///
/// All variants abort the whole query on this node; there is no
/// partial-result degradation.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Messaging substrate failure.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// Row wire-codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Value-level serialization failure.
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    /// Partitioning attribute unusable at execution time. Plan-time
    /// validation makes this a defensive check against plan bugs.
    #[error("partition attribute {attr} unusable: {reason}")]
    BadPartitionAttr {
        /// 1-based attribute number.
        attr: usize,
        /// What went wrong.
        reason: String,
    },
    /// A peer misbehaved on an exchange channel.
    #[error("exchange protocol violation on port {port}: {reason}")]
    ExchangeProtocol {
        /// The exchange channel.
        port: u32,
        /// What went wrong.
        reason: String,
    },
    /// Expression evaluation failure.
    #[error("expression evaluation failed: {0}")]
    Eval(String),
}
