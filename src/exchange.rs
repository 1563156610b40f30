//! The Exchange operator: Split, Scatter, Gather, Merge.
//!
//! An Exchange redistributes a row stream across partitions. It executes
//! as four cooperating sub-operators sharing one channel id:
//!
//! ```text
//!            Merge  ── output row stream
//!           /     \
//!      Gather     Split ── native rows
//!      (peers)      |  \
//!                 child  Scatter ── foreign rows, to peers
//! ```
//!
//! - [`Split`] classifies each upstream row as native (kept) or foreign
//!   (handed to its Scatter), and drives the row-relocation path for
//!   updates that change a row's partition key.
//! - [`Scatter`] ships foreign rows to the partition chosen by
//!   [`partition`], and broadcasts the end-of-stream marker to every peer.
//! - [`Gather`] polls one outstanding receive per peer and yields rows as
//!   they arrive, counting one end-of-stream sentinel per peer.
//! - [`Merge`] unions the native and gathered streams into one source.
//!
//! The sub-operators communicate only through the messaging substrate via
//! their shared port; none of them ever blocks the calling thread.

mod gather;
mod merge;
mod partition;
mod scatter;
mod split;

pub use gather::Gather;
pub use merge::Merge;
pub use partition::partition;
pub use scatter::Scatter;
pub use split::Split;

use crate::comm::{Communicator, PortId};
use crate::datum::Type;
use crate::exec::{ExecError, RowSource};

/// Builds the full Exchange quadruple over `child`.
///
/// `attr` is the 1-based partitioning attribute (0 collapses every row
/// onto partition 0); `relocate` enables Split's row-relocation path for
/// updates that may change the partition key; `schema` is the child's
/// output schema, needed to unpack gathered rows.
pub fn make_exchange(
    child: Box<dyn RowSource>,
    comm: &Communicator,
    port: PortId,
    attr: usize,
    relocate: bool,
    schema: Vec<Type>,
) -> Result<Merge, ExecError> {
    let scatter = Scatter::new(comm.clone(), port, attr);
    let split = Split::new(child, scatter, attr, relocate);
    let gather = Gather::new(comm.clone(), port, schema)?;
    Ok(Merge::new(split, gather))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::comm::Router;
    use crate::datum::Value;
    use crate::exec::Poll;
    use crate::row::{Record, Row, RowId, RowMark};
    use crate::shmem::{RegionConfig, SharedRegion};

    /// One region + router per test; names must be unique because the
    /// registry is process-global.
    fn start(name: &str, nodes: usize) -> (Vec<Communicator>, thread::JoinHandle<Result<(), crate::comm::CommError>>) {
        let config = RegionConfig {
            blocks: 64,
            max_message: 256,
        };
        let region = SharedRegion::create(name, nodes, config).unwrap();
        SharedRegion::remove(name).unwrap();
        let handle = Router::spawn(Arc::clone(&region));
        let comms = (0..nodes)
            .map(|n| Communicator::attach(Arc::clone(&region), n).unwrap())
            .collect();
        (comms, handle)
    }

    /// Fixed row source for driving an exchange in tests.
    struct Rows(std::vec::IntoIter<Row>);

    impl Rows {
        fn new(rows: Vec<Row>) -> Box<dyn RowSource> {
            Box::new(Rows(rows.into_iter()))
        }
    }

    impl RowSource for Rows {
        fn poll(&mut self) -> Result<Poll, ExecError> {
            Ok(match self.0.next() {
                Some(row) => Poll::Row(row),
                None => Poll::Done,
            })
        }
    }

    fn row(v: i32, tag: &str) -> Row {
        Row::computed(Record::new(vec![
            Value::Int32(v),
            Value::Text(tag.to_string()),
        ]))
    }

    fn schema() -> Vec<Type> {
        vec![Type::Int4, Type::Text]
    }

    /// Runs one worker's exchange to completion and returns its output.
    fn run_node(
        comm: Communicator,
        input: Vec<Row>,
        attr: usize,
        relocate: bool,
    ) -> Vec<Row> {
        let mut op = make_exchange(Rows::new(input), &comm, 7, attr, relocate, schema()).unwrap();
        let mut out = Vec::new();
        loop {
            match op.poll().unwrap() {
                Poll::Row(r) => out.push(r),
                Poll::Waiting => thread::yield_now(),
                Poll::Done => break,
            }
        }
        op.shutdown().unwrap();
        comm.close();
        out
    }

    fn run_cluster(
        name: &str,
        inputs: Vec<Vec<Row>>,
        attr: usize,
        relocate: bool,
    ) -> Vec<Vec<Row>> {
        let nodes = inputs.len();
        let (comms, router) = start(name, nodes);
        let workers: Vec<_> = comms
            .into_iter()
            .zip(inputs)
            .map(|(comm, input)| thread::spawn(move || run_node(comm, input, attr, relocate)))
            .collect();
        let outputs = workers.into_iter().map(|w| w.join().unwrap()).collect();
        router.join().unwrap().unwrap();
        outputs
    }

    fn values(rows: &[Row]) -> Vec<i32> {
        let mut vs: Vec<i32> = rows
            .iter()
            .map(|r| match r.record.values[0] {
                Value::Int32(v) => v,
                _ => panic!("unexpected value"),
            })
            .collect();
        vs.sort_unstable();
        vs
    }

    #[test]
    fn test_exchange_redistributes_by_key() {
        let inputs = vec![
            vec![row(1, "a"), row(2, "b")],
            vec![row(3, "c")],
            vec![row(4, "d")],
        ];
        let out = run_cluster("xchg-redistribute", inputs, 1, false);
        assert_eq!(values(&out[0]), vec![3]);
        assert_eq!(values(&out[1]), vec![1, 4]);
        assert_eq!(values(&out[2]), vec![2]);
        // Received rows carry no physical location.
        for r in out.iter().flatten() {
            assert!(matches!(r.mark, RowMark::Computed));
        }
    }

    #[test]
    fn test_exchange_preserves_all_rows() {
        let inputs: Vec<Vec<Row>> = (0..3)
            .map(|n| (0..20).map(|i| row(n * 100 + i, "r")).collect())
            .collect();
        let out = run_cluster("xchg-no-loss", inputs, 1, false);
        let mut all: Vec<i32> = out.iter().flat_map(|o| values(o)).collect();
        all.sort_unstable();
        let mut expected: Vec<i32> = (0..3).flat_map(|n| (0..20).map(move |i| n * 100 + i)).collect();
        expected.sort_unstable();
        assert_eq!(all, expected);
        for (node, rows) in out.iter().enumerate() {
            for v in values(rows) {
                assert_eq!(v as usize % 3, node);
            }
        }
    }

    #[test]
    fn test_exchange_relocates_updated_row() {
        // An updated row stored on node 1 now keys to node 2. The old
        // location must be reported for deletion while the new owner
        // receives an insertable copy.
        let moved = Row {
            mark: RowMark::Stored(RowId::new(3, 9)),
            record: Record::new(vec![Value::Int32(5), Value::Text("u".to_string())]),
        };
        let inputs = vec![vec![], vec![moved], vec![]];
        let out = run_cluster("xchg-relocate", inputs, 1, true);
        assert!(out[0].is_empty());
        assert_eq!(out[1].len(), 1);
        assert_eq!(out[1][0].mark, RowMark::DeleteMe(RowId::new(3, 9)));
        assert_eq!(out[2].len(), 1);
        assert_eq!(out[2][0].mark, RowMark::InsertElsewhere);
        assert_eq!(out[2][0].record, Record::new(vec![
            Value::Int32(5),
            Value::Text("u".to_string()),
        ]));
    }

    #[test]
    fn test_exchange_attr_zero_collapses() {
        let inputs = vec![
            vec![row(10, "a")],
            vec![row(11, "b")],
            vec![row(12, "c")],
        ];
        let out = run_cluster("xchg-collapse", inputs, 0, false);
        assert_eq!(values(&out[0]), vec![10, 11, 12]);
        assert!(out[1].is_empty());
        assert!(out[2].is_empty());
    }

    #[test]
    fn test_exchange_single_node_passthrough() {
        let inputs = vec![vec![row(1, "a"), row(2, "b"), row(3, "c")]];
        let out = run_cluster("xchg-single", inputs, 1, false);
        assert_eq!(values(&out[0]), vec![1, 2, 3]);
    }
}
