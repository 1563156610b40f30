//! Physical query execution.
//!
//! This module turns a [`PlanNode`] tree into a tree of executable
//! operators:
//!
//! - [`QueryNode`] — Volcano-style iterator nodes with a non-blocking
//!   [`poll`](RowSource::poll)
//! - [`prepare`] — plan-to-executor conversion; the only operator that
//!   touches the messaging substrate is Exchange, which is built here
//!   from the [`Communicator`]
//!
//! Blocking operators (sort, aggregation, the join's build side)
//! accumulate across polls and report [`Poll::Waiting`] while their
//! input does, so a worker thread is never parked inside an operator.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::comm::Communicator;
use crate::datum::Value;
use crate::exec::{ExecError, Poll, RowSource};
use crate::exchange::{make_exchange, Merge};
use crate::plan::{AggExpr, Expr, PlanNode};
use crate::row::{Record, Row, RowId};

/// A physical executor node.
pub enum QueryNode {
    /// Snapshot scan over a table fragment.
    Scan(Scan),
    /// Literal row source.
    Values(Values),
    /// Predicate filter.
    Filter(Filter),
    /// SET-style assignments.
    Assign(Assign),
    /// Nested-loop join, right side buffered.
    NestLoopJoin(NestLoopJoin),
    /// Full in-memory sort.
    Sort(Sort),
    /// Input buffer.
    Materialize(Materialize),
    /// Hash aggregation.
    Aggregate(Aggregate),
    /// Row redistribution across partitions.
    Exchange(Merge),
}

/// Converts a plan into its executable operator tree.
///
/// `comm` is consulted only by Exchange nodes; every other operator is
/// purely local.
pub fn prepare(plan: PlanNode, comm: &Communicator) -> Result<QueryNode, ExecError> {
    Ok(match plan {
        PlanNode::TableScan { table } => QueryNode::Scan(Scan {
            rows: table.snapshot().into_iter(),
        }),
        PlanNode::Values { rows, .. } => QueryNode::Values(Values {
            rows: rows.into_iter(),
        }),
        PlanNode::Filter { input, predicate } => QueryNode::Filter(Filter {
            child: Box::new(prepare(*input, comm)?),
            predicate,
        }),
        PlanNode::Assign { input, assignments } => QueryNode::Assign(Assign {
            child: Box::new(prepare(*input, comm)?),
            assignments,
        }),
        PlanNode::NestLoopJoin { left, right, on } => QueryNode::NestLoopJoin(NestLoopJoin {
            left: Box::new(prepare(*left, comm)?),
            right: Box::new(prepare(*right, comm)?),
            on,
            buffer: Vec::new(),
            built: false,
            outer: None,
        }),
        PlanNode::Sort { input, key } => QueryNode::Sort(Sort {
            child: Box::new(prepare(*input, comm)?),
            key,
            buffer: Vec::new(),
            sorted: None,
        }),
        PlanNode::Materialize { input } => QueryNode::Materialize(Materialize {
            child: Box::new(prepare(*input, comm)?),
            buffer: Vec::new(),
            emit: None,
        }),
        PlanNode::Aggregate {
            input,
            group_by,
            aggregates,
        } => QueryNode::Aggregate(Aggregate {
            child: Box::new(prepare(*input, comm)?),
            group_by,
            aggregates,
            groups: Vec::new(),
            index: HashMap::new(),
            emit: None,
        }),
        PlanNode::Exchange {
            input,
            port,
            attr,
            relocate,
        } => {
            let schema = input.schema();
            let child = Box::new(prepare(*input, comm)?);
            QueryNode::Exchange(make_exchange(child, comm, port, attr, relocate, schema)?)
        }
    })
}

impl RowSource for QueryNode {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        match self {
            QueryNode::Scan(n) => n.poll(),
            QueryNode::Values(n) => n.poll(),
            QueryNode::Filter(n) => n.poll(),
            QueryNode::Assign(n) => n.poll(),
            QueryNode::NestLoopJoin(n) => n.poll(),
            QueryNode::Sort(n) => n.poll(),
            QueryNode::Materialize(n) => n.poll(),
            QueryNode::Aggregate(n) => n.poll(),
            QueryNode::Exchange(n) => n.poll(),
        }
    }

    fn shutdown(&mut self) -> Result<(), ExecError> {
        match self {
            QueryNode::Scan(_) | QueryNode::Values(_) => Ok(()),
            QueryNode::Filter(n) => n.child.shutdown(),
            QueryNode::Assign(n) => n.child.shutdown(),
            QueryNode::NestLoopJoin(n) => {
                n.left.shutdown()?;
                n.right.shutdown()
            }
            QueryNode::Sort(n) => n.child.shutdown(),
            QueryNode::Materialize(n) => n.child.shutdown(),
            QueryNode::Aggregate(n) => n.child.shutdown(),
            QueryNode::Exchange(n) => n.shutdown(),
        }
    }
}

/// Snapshot scan yielding stored rows.
pub struct Scan {
    rows: std::vec::IntoIter<(RowId, Record)>,
}

impl Scan {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        Ok(match self.rows.next() {
            Some((id, record)) => Poll::Row(Row::stored(id, record)),
            None => Poll::Done,
        })
    }
}

/// Literal rows, yielded as computed.
pub struct Values {
    rows: std::vec::IntoIter<Record>,
}

impl Values {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        Ok(match self.rows.next() {
            Some(record) => Poll::Row(Row::computed(record)),
            None => Poll::Done,
        })
    }
}

/// Keeps rows whose predicate evaluates to true.
pub struct Filter {
    child: Box<QueryNode>,
    predicate: Expr,
}

impl Filter {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        loop {
            match self.child.poll()? {
                Poll::Row(row) => {
                    if self.predicate.matches(&row.record)? {
                        return Ok(Poll::Row(row));
                    }
                }
                other => return Ok(other),
            }
        }
    }
}

/// Applies assignments to each row, keeping its location marker.
pub struct Assign {
    child: Box<QueryNode>,
    assignments: Vec<(usize, Expr)>,
}

impl Assign {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        match self.child.poll()? {
            Poll::Row(mut row) => {
                for (attr, expr) in &self.assignments {
                    let value = expr.eval(&row.record)?;
                    let slot = row.record.values.get_mut(attr.wrapping_sub(1)).ok_or_else(
                        || ExecError::Eval(format!("assignment target {attr} out of range")),
                    )?;
                    *slot = value;
                }
                Ok(Poll::Row(row))
            }
            other => Ok(other),
        }
    }
}

/// Nested-loop join. The right side is buffered in full before the left
/// side streams; join output rows are computed (no location).
pub struct NestLoopJoin {
    left: Box<QueryNode>,
    right: Box<QueryNode>,
    on: Option<(usize, usize)>,
    buffer: Vec<Row>,
    built: bool,
    outer: Option<(Row, usize)>,
}

impl NestLoopJoin {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        while !self.built {
            match self.right.poll()? {
                Poll::Row(row) => self.buffer.push(row),
                Poll::Waiting => return Ok(Poll::Waiting),
                Poll::Done => self.built = true,
            }
        }
        loop {
            if let Some((outer, next)) = &mut self.outer {
                while *next < self.buffer.len() {
                    let inner = &self.buffer[*next];
                    *next += 1;
                    if Self::qualifies(self.on, outer, inner)? {
                        let mut values = outer.record.values.clone();
                        values.extend(inner.record.values.iter().cloned());
                        return Ok(Poll::Row(Row::computed(Record::new(values))));
                    }
                }
                self.outer = None;
            }
            match self.left.poll()? {
                Poll::Row(row) => self.outer = Some((row, 0)),
                Poll::Waiting => return Ok(Poll::Waiting),
                Poll::Done => return Ok(Poll::Done),
            }
        }
    }

    fn qualifies(on: Option<(usize, usize)>, outer: &Row, inner: &Row) -> Result<bool, ExecError> {
        let Some((l_attr, r_attr)) = on else {
            return Ok(true);
        };
        let l = outer
            .record
            .values
            .get(l_attr - 1)
            .ok_or_else(|| ExecError::Eval(format!("join attribute {l_attr} out of range")))?;
        let r = inner
            .record
            .values
            .get(r_attr - 1)
            .ok_or_else(|| ExecError::Eval(format!("join attribute {r_attr} out of range")))?;
        Ok(!l.is_null() && !r.is_null() && l == r)
    }
}

/// Accumulates the full input, then emits it ordered by one ascending
/// key. Nulls sort first; incomparable values keep their buffer order.
pub struct Sort {
    child: Box<QueryNode>,
    key: usize,
    buffer: Vec<Row>,
    sorted: Option<std::vec::IntoIter<Row>>,
}

impl Sort {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        if let Some(rows) = &mut self.sorted {
            return Ok(match rows.next() {
                Some(row) => Poll::Row(row),
                None => Poll::Done,
            });
        }
        loop {
            match self.child.poll()? {
                Poll::Row(row) => self.buffer.push(row),
                Poll::Waiting => return Ok(Poll::Waiting),
                Poll::Done => break,
            }
        }
        let key = self.key;
        let mut rows = std::mem::take(&mut self.buffer);
        rows.sort_by(|a, b| {
            let a = a.record.values.get(key - 1);
            let b = b.record.values.get(key - 1);
            match (a, b) {
                (Some(Value::Null), Some(Value::Null)) => std::cmp::Ordering::Equal,
                (Some(Value::Null), Some(_)) => std::cmp::Ordering::Less,
                (Some(_), Some(Value::Null)) => std::cmp::Ordering::Greater,
                (Some(a), Some(b)) => a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal),
                _ => std::cmp::Ordering::Equal,
            }
        });
        self.sorted = Some(rows.into_iter());
        self.poll()
    }
}

/// Accumulates the full input, then replays it.
pub struct Materialize {
    child: Box<QueryNode>,
    buffer: Vec<Row>,
    emit: Option<std::vec::IntoIter<Row>>,
}

impl Materialize {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        if let Some(rows) = &mut self.emit {
            return Ok(match rows.next() {
                Some(row) => Poll::Row(row),
                None => Poll::Done,
            });
        }
        loop {
            match self.child.poll()? {
                Poll::Row(row) => self.buffer.push(row),
                Poll::Waiting => return Ok(Poll::Waiting),
                Poll::Done => break,
            }
        }
        self.emit = Some(std::mem::take(&mut self.buffer).into_iter());
        self.poll()
    }
}

/// Hash aggregation over the grouping attributes.
///
/// A whole-input aggregate (no grouping) emits its single row only when
/// at least one input row was seen; on a distributed run the collapse
/// Exchange below it leaves every fragment but one empty, and those
/// workers must not contribute spurious zero rows.
pub struct Aggregate {
    child: Box<QueryNode>,
    group_by: Vec<usize>,
    aggregates: Vec<AggExpr>,
    groups: Vec<(Vec<Value>, Vec<Value>)>,
    index: HashMap<GroupKey, usize>,
    emit: Option<std::vec::IntoIter<Row>>,
}

impl Aggregate {
    fn poll(&mut self) -> Result<Poll, ExecError> {
        if let Some(rows) = &mut self.emit {
            return Ok(match rows.next() {
                Some(row) => Poll::Row(row),
                None => Poll::Done,
            });
        }
        loop {
            match self.child.poll()? {
                Poll::Row(row) => self.fold(&row)?,
                Poll::Waiting => return Ok(Poll::Waiting),
                Poll::Done => break,
            }
        }
        let rows: Vec<Row> = std::mem::take(&mut self.groups)
            .into_iter()
            .map(|(mut key, accs)| {
                key.extend(accs);
                Row::computed(Record::new(key))
            })
            .collect();
        self.emit = Some(rows.into_iter());
        self.poll()
    }

    fn fold(&mut self, row: &Row) -> Result<(), ExecError> {
        let mut key = Vec::with_capacity(self.group_by.len());
        for &attr in &self.group_by {
            let value = row
                .record
                .values
                .get(attr - 1)
                .ok_or_else(|| ExecError::Eval(format!("grouping attribute {attr} out of range")))?;
            key.push(value.clone());
        }
        let slot = match self.index.get(&GroupKey(key.clone())) {
            Some(&slot) => slot,
            None => {
                let accs = self.aggregates.iter().map(|agg| agg.init()).collect();
                self.groups.push((key.clone(), accs));
                let slot = self.groups.len() - 1;
                self.index.insert(GroupKey(key), slot);
                slot
            }
        };
        let accs = &mut self.groups[slot].1;
        for (agg, acc) in self.aggregates.iter().zip(accs.iter_mut()) {
            agg.fold(acc, &row.record)?;
        }
        Ok(())
    }
}

/// HashMap key with grouping equality semantics: NULL groups with NULL
/// and floats group by their bit pattern.
struct GroupKey(Vec<Value>);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| group_eq(a, b))
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            std::mem::discriminant(value).hash(state);
            match value {
                Value::Null => {}
                Value::Boolean(b) => b.hash(state),
                Value::Int16(n) => n.hash(state),
                Value::Int32(n) => n.hash(state),
                Value::Int64(n) => n.hash(state),
                Value::Float32(f) => f.to_bits().hash(state),
                Value::Float64(f) => f.to_bits().hash(state),
                Value::Text(s) => s.hash(state),
                Value::Bytea(b) => b.hash(state),
            }
        }
    }
}

fn group_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
        (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::Type;
    use crate::plan::{AggFunc, Table};
    use crate::row::RowMark;
    use crate::shmem::{RegionConfig, SharedRegion};
    use std::sync::Arc;

    fn communicator(name: &str) -> Communicator {
        let region = SharedRegion::create(name, 1, RegionConfig::default()).unwrap();
        SharedRegion::remove(name).unwrap();
        Communicator::attach(region, 0).unwrap()
    }

    fn int_table(name: &str, values: &[i32]) -> Arc<Table> {
        let table = Table::new(name, vec![Type::Int4], 1);
        for &v in values {
            table.insert(Record::new(vec![Value::Int32(v)]));
        }
        table
    }

    fn run(plan: PlanNode, comm: &Communicator) -> Vec<Row> {
        let mut node = prepare(plan, comm).unwrap();
        let mut out = Vec::new();
        loop {
            match node.poll().unwrap() {
                Poll::Row(row) => out.push(row),
                Poll::Waiting => std::thread::yield_now(),
                Poll::Done => break,
            }
        }
        node.shutdown().unwrap();
        out
    }

    fn ints(rows: &[Row], attr: usize) -> Vec<i64> {
        rows.iter()
            .map(|r| match r.record.values[attr - 1] {
                Value::Int32(v) => v as i64,
                Value::Int64(v) => v,
                ref other => panic!("unexpected value {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_scan_yields_stored_rows() {
        let comm = communicator("exec-scan");
        let table = int_table("t", &[1, 2, 3]);
        let out = run(PlanNode::TableScan { table }, &comm);
        assert_eq!(ints(&out, 1), vec![1, 2, 3]);
        assert!(out.iter().all(|r| matches!(r.mark, RowMark::Stored(_))));
    }

    #[test]
    fn test_filter_pipeline() {
        let comm = communicator("exec-filter");
        let table = int_table("t", &[1, 2, 3, 4, 5, 6]);
        let plan = PlanNode::Filter {
            input: Box::new(PlanNode::TableScan { table }),
            predicate: Expr::owned_here(1, 3, 0),
        };
        assert_eq!(ints(&run(plan, &comm), 1), vec![3, 6]);
    }

    #[test]
    fn test_assign_keeps_location() {
        let comm = communicator("exec-assign");
        let table = int_table("t", &[4]);
        let plan = PlanNode::Assign {
            input: Box::new(PlanNode::TableScan { table }),
            assignments: vec![(1, Expr::literal(Value::Int32(5)))],
        };
        let out = run(plan, &comm);
        assert_eq!(ints(&out, 1), vec![5]);
        assert!(matches!(out[0].mark, RowMark::Stored(_)));
    }

    #[test]
    fn test_sort_orders_ascending() {
        let comm = communicator("exec-sort");
        let table = int_table("t", &[3, 1, 2]);
        let plan = PlanNode::Sort {
            input: Box::new(PlanNode::TableScan { table }),
            key: 1,
        };
        assert_eq!(ints(&run(plan, &comm), 1), vec![1, 2, 3]);
    }

    #[test]
    fn test_materialize_replays_input() {
        let comm = communicator("exec-mat");
        let table = int_table("t", &[7, 8]);
        let plan = PlanNode::Materialize {
            input: Box::new(PlanNode::TableScan { table }),
        };
        assert_eq!(ints(&run(plan, &comm), 1), vec![7, 8]);
    }

    #[test]
    fn test_join_on_equality() {
        let comm = communicator("exec-join");
        let left = int_table("l", &[1, 2, 3]);
        let right = Table::new("r", vec![Type::Int4, Type::Text], 1);
        right.insert(Record::new(vec![Value::Int32(2), Value::Text("b".into())]));
        right.insert(Record::new(vec![Value::Int32(3), Value::Text("c".into())]));
        right.insert(Record::new(vec![Value::Int32(3), Value::Text("d".into())]));
        let plan = PlanNode::NestLoopJoin {
            left: Box::new(PlanNode::TableScan { table: left }),
            right: Box::new(PlanNode::TableScan { table: right }),
            on: Some((1, 1)),
        };
        let out = run(plan, &comm);
        let mut pairs: Vec<(i64, String)> = out
            .iter()
            .map(|r| {
                let v = match r.record.values[0] {
                    Value::Int32(v) => v as i64,
                    _ => panic!("unexpected value"),
                };
                let s = match &r.record.values[2] {
                    Value::Text(s) => s.clone(),
                    _ => panic!("unexpected value"),
                };
                (v, s)
            })
            .collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![(2, "b".into()), (3, "c".into()), (3, "d".into())]
        );
        assert!(out.iter().all(|r| r.mark == RowMark::Computed));
    }

    #[test]
    fn test_join_skips_nulls() {
        let comm = communicator("exec-join-null");
        let left = Table::new("l", vec![Type::Int4], 1);
        left.insert(Record::new(vec![Value::Null]));
        left.insert(Record::new(vec![Value::Int32(1)]));
        let right = Table::new("r", vec![Type::Int4], 1);
        right.insert(Record::new(vec![Value::Null]));
        right.insert(Record::new(vec![Value::Int32(1)]));
        let plan = PlanNode::NestLoopJoin {
            left: Box::new(PlanNode::TableScan { table: left }),
            right: Box::new(PlanNode::TableScan { table: right }),
            on: Some((1, 1)),
        };
        assert_eq!(run(plan, &comm).len(), 1);
    }

    #[test]
    fn test_grouped_aggregate() {
        let comm = communicator("exec-agg");
        let table = int_table("t", &[1, 2, 1, 1, 2]);
        let plan = PlanNode::Aggregate {
            input: Box::new(PlanNode::TableScan { table }),
            group_by: vec![1],
            aggregates: vec![AggExpr::new(AggFunc::Count, 0)],
        };
        let mut out: Vec<(i64, i64)> = run(plan, &comm)
            .iter()
            .map(|r| match (&r.record.values[0], &r.record.values[1]) {
                (Value::Int32(k), Value::Int64(c)) => (*k as i64, *c),
                _ => panic!("unexpected values"),
            })
            .collect();
        out.sort();
        assert_eq!(out, vec![(1, 3), (2, 2)]);
    }

    #[test]
    fn test_ungrouped_aggregate() {
        let comm = communicator("exec-agg-plain");
        let table = int_table("t", &[4, 1, 9]);
        let plan = PlanNode::Aggregate {
            input: Box::new(PlanNode::TableScan { table }),
            group_by: vec![],
            aggregates: vec![
                AggExpr::new(AggFunc::Count, 0),
                AggExpr::new(AggFunc::Sum, 1),
                AggExpr::new(AggFunc::Max, 1),
            ],
        };
        let out = run(plan, &comm);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].record.values,
            vec![Value::Int64(3), Value::Int64(14), Value::Int32(9)]
        );
    }

    #[test]
    fn test_ungrouped_aggregate_of_empty_input_emits_nothing() {
        let comm = communicator("exec-agg-empty");
        let table = int_table("t", &[]);
        let plan = PlanNode::Aggregate {
            input: Box::new(PlanNode::TableScan { table }),
            group_by: vec![],
            aggregates: vec![AggExpr::new(AggFunc::Count, 0)],
        };
        assert!(run(plan, &comm).is_empty());
    }

    #[test]
    fn test_exchange_on_single_node_is_passthrough() {
        let comm = communicator("exec-xchg");
        let table = int_table("t", &[1, 2]);
        let plan = PlanNode::Exchange {
            input: Box::new(PlanNode::TableScan { table }),
            port: 0,
            attr: 1,
            relocate: false,
        };
        assert_eq!(ints(&run(plan, &comm), 1), vec![1, 2]);
    }
}
