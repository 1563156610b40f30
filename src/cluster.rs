//! Worker harness and in-process cluster driver.
//!
//! A [`Worker`] owns one partition's [`Communicator`] and runs complete
//! statements: parallelize, prepare, poll to completion, apply DML
//! effects to the local fragment, shut the operator tree down.
//!
//! [`run_cluster`] is the session driver used by tests and demos: it
//! creates the named shared region, spawns the delivery [`Router`] and
//! one worker thread per partition, joins everything, and removes the
//! region. Workers open the region by name, the same way separate
//! processes would.

use std::sync::Arc;
use std::thread;

use tracing::{debug, info};

use crate::comm::{CommError, Communicator, Router};
use crate::exec::{ExecError, Poll, RowSource};
use crate::executor::prepare;
use crate::parallelize::{parallelize, ParallelPlan};
use crate::plan::{Effect, PlanError, PlanNode, Statement};
use crate::row::{Row, RowMark};
use crate::shmem::{RegionConfig, RegionError, SharedRegion};

/// Errors from running a statement on a worker or cluster.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Shared region lifecycle failure.
    #[error(transparent)]
    Region(#[from] RegionError),
    /// Messaging failure outside an operator.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// Plan-time validation failure.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// Execution failure.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// A worker or router thread panicked.
    #[error("worker thread panicked")]
    WorkerPanicked,
}

/// One partition's statement runner.
pub struct Worker {
    comm: Communicator,
}

impl Worker {
    pub fn new(comm: Communicator) -> Self {
        Self { comm }
    }

    /// The worker's messaging context.
    pub fn communicator(&self) -> &Communicator {
        &self.comm
    }

    /// Runs `statement` to completion on this partition.
    ///
    /// For a read query the returned rows are the result fragment on
    /// this node (the full result on partition 0, nothing elsewhere).
    /// For DML the returned rows are the effects this worker applied to
    /// its fragment.
    pub fn run(&self, statement: Statement) -> Result<Vec<Row>, QueryError> {
        match parallelize(statement, &self.comm)? {
            ParallelPlan::Select(plan) => self.drain(plan),
            ParallelPlan::Insert { table, plan } => {
                let rows = self.drain(plan)?;
                for row in &rows {
                    table.insert(row.record.clone());
                }
                debug!(node = self.comm.node(), count = rows.len(), "rows inserted");
                Ok(rows)
            }
            ParallelPlan::Update { table, plan } => {
                let rows = self.drain(plan)?;
                for row in &rows {
                    match Effect::from_row(row) {
                        Some(Effect::Update(id, record)) => table.update(id, record),
                        Some(Effect::Insert(record)) => {
                            table.insert(record);
                        }
                        Some(Effect::Delete(id)) => table.delete(id),
                        None => {}
                    }
                }
                debug!(node = self.comm.node(), count = rows.len(), "update effects applied");
                Ok(rows)
            }
            ParallelPlan::Delete { table, plan } => {
                let rows = self.drain(plan)?;
                for row in &rows {
                    if let RowMark::Stored(id) = row.mark {
                        table.delete(id);
                    }
                }
                debug!(node = self.comm.node(), count = rows.len(), "rows deleted");
                Ok(rows)
            }
        }
    }

    /// Signals that this worker has finished its session.
    pub fn close(self) {
        self.comm.close();
    }

    fn drain(&self, plan: PlanNode) -> Result<Vec<Row>, QueryError> {
        let mut node = prepare(plan, &self.comm)?;
        let mut rows = Vec::new();
        loop {
            match node.poll()? {
                Poll::Row(row) => rows.push(row),
                Poll::Waiting => thread::yield_now(),
                Poll::Done => break,
            }
        }
        node.shutdown()?;
        Ok(rows)
    }
}

/// Runs one statement per worker across an in-process cluster.
///
/// `statement` is invoked on each worker's thread with its communicator
/// and must build that partition's view of the same logical statement —
/// typically the same plan over per-partition table fragments.
pub fn run_cluster<F>(
    name: &str,
    nodes: usize,
    config: RegionConfig,
    statement: F,
) -> Result<Vec<Vec<Row>>, QueryError>
where
    F: Fn(&Communicator) -> Statement + Sync,
{
    let region = SharedRegion::create(name, nodes, config)?;
    let router = Router::spawn(Arc::clone(&region));
    info!(name, nodes, "cluster session started");

    let outputs = thread::scope(|scope| {
        let handles: Vec<_> = (0..nodes)
            .map(|node| {
                let statement = &statement;
                scope.spawn(move || -> Result<Vec<Row>, QueryError> {
                    let region = SharedRegion::open(name)?;
                    let worker = Worker::new(Communicator::attach(region, node)?);
                    let rows = worker.run(statement(worker.communicator()))?;
                    worker.close();
                    Ok(rows)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().map_err(|_| QueryError::WorkerPanicked)?)
            .collect::<Result<Vec<_>, QueryError>>()
    })?;

    router.join().map_err(|_| QueryError::WorkerPanicked)??;
    SharedRegion::remove(name)?;
    info!(name, "cluster session finished");
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::{Type, Value};
    use crate::plan::Table;
    use crate::row::Record;

    fn fragment(values: &[i32]) -> Arc<Table> {
        let table = Table::new("t", vec![Type::Int4], 1);
        for &v in values {
            table.insert(Record::new(vec![Value::Int32(v)]));
        }
        table
    }

    fn collect_ints(rows: &[Row]) -> Vec<i32> {
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
    fn test_select_collapses_results_onto_node_zero() {
        // Properly partitioned fragments: node n holds values ≡ n mod 3.
        let fragments = [fragment(&[3, 6]), fragment(&[1, 4]), fragment(&[2])];
        let out = run_cluster("cluster-select", 3, RegionConfig::default(), |comm| {
            Statement::Select(PlanNode::TableScan {
                table: Arc::clone(&fragments[comm.node()]),
            })
        })
        .unwrap();
        assert_eq!(collect_ints(&out[0]), vec![1, 2, 3, 4, 6]);
        assert!(out[1].is_empty());
        assert!(out[2].is_empty());
    }

    #[test]
    fn test_insert_lands_on_owning_fragment() {
        let fragments = [fragment(&[]), fragment(&[]), fragment(&[])];
        let rows: Vec<Record> = (0..9).map(|v| Record::new(vec![Value::Int32(v)])).collect();
        run_cluster("cluster-insert", 3, RegionConfig::default(), |comm| {
            Statement::Insert {
                table: Arc::clone(&fragments[comm.node()]),
                source: PlanNode::Values {
                    schema: vec![Type::Int4],
                    rows: rows.clone(),
                },
            }
        })
        .unwrap();
        for (node, fragment) in fragments.iter().enumerate() {
            let stored: Vec<i32> = fragment
                .snapshot()
                .into_iter()
                .map(|(_, r)| match r.values[0] {
                    Value::Int32(v) => v,
                    _ => panic!("unexpected value"),
                })
                .collect();
            assert_eq!(stored.len(), 3);
            assert!(stored.iter().all(|&v| v as usize % 3 == node));
        }
    }

    #[test]
    fn test_worker_error_surfaces_from_plan_validation() {
        let region = SharedRegion::create("cluster-err", 1, RegionConfig::default()).unwrap();
        SharedRegion::remove("cluster-err").unwrap();
        let worker = Worker::new(Communicator::attach(region, 0).unwrap());
        let table = Table::new("t", vec![Type::Text], 1);
        // Joining on a text attribute must fail before execution starts.
        let join = PlanNode::NestLoopJoin {
            left: Box::new(PlanNode::TableScan {
                table: Arc::clone(&table),
            }),
            right: Box::new(PlanNode::TableScan { table }),
            on: Some((1, 1)),
        };
        let result = worker.run(Statement::Select(join));
        assert!(matches!(result, Err(QueryError::Plan(_))));
    }
}
