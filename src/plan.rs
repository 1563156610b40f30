//! Physical query plans over partitioned tables.
//!
//! Plans describe *what* to execute on one worker without loading any
//! data:
//!
//! - [`PlanNode`] — row-producing plan operators, converted into
//!   executable nodes by [`prepare`](crate::executor::prepare)
//! - [`Statement`] — a full query or DML statement with its target table
//! - [`Table`] — an in-memory table fragment, one per worker, holding the
//!   rows whose partitioning key maps to that worker
//!
//! The [Parallelizer](crate::parallelize) rewrites a `Statement`'s plan
//! for distributed execution by inserting [`PlanNode::Exchange`] nodes.

mod expr;

pub use expr::{AggExpr, AggFunc, Expr};

use std::sync::Arc;

use parking_lot::RwLock;

use crate::comm::PortId;
use crate::datum::Type;
use crate::row::{Record, Row, RowId};

/// Plan construction and validation errors.
///
/// All fatal: a plan that fails validation is never executed.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// A partitioning or join attribute is out of range for its schema.
    #[error("attribute {attr} out of range for a {columns}-column schema")]
    AttrOutOfRange {
        /// 1-based attribute number.
        attr: usize,
        /// Columns in the schema it was checked against.
        columns: usize,
    },
    /// A partitioning attribute refers to a non-integer column.
    #[error("attribute {attr} has non-integer type {ty}")]
    AttrNotInteger {
        /// 1-based attribute number.
        attr: usize,
        /// The offending column type.
        ty: Type,
    },
}

/// One worker's fragment of a horizontally partitioned table.
///
/// Each worker holds only the rows whose partitioning attribute maps to
/// its own partition id. The fragment is the storage stand-in behind
/// [`PlanNode::TableScan`]; scans snapshot the row vector at prepare
/// time, so DML effects applied during a query become visible to the
/// next statement.
pub struct Table {
    /// Table name.
    pub name: String,
    /// Column types in attribute order.
    pub schema: Vec<Type>,
    /// 1-based partitioning attribute.
    pub part_attr: usize,
    rows: RwLock<Vec<(RowId, Record)>>,
    next_page: RwLock<u32>,
}

impl Table {
    /// Creates an empty fragment.
    pub fn new(name: impl Into<String>, schema: Vec<Type>, part_attr: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            schema,
            part_attr,
            rows: RwLock::new(Vec::new()),
            next_page: RwLock::new(0),
        })
    }

    /// Appends `record` to the fragment, assigning it a fresh location.
    pub fn insert(&self, record: Record) -> RowId {
        let mut next = self.next_page.write();
        let id = RowId::new(*next, 0);
        *next += 1;
        self.rows.write().push((id, record));
        id
    }

    /// Replaces the record stored at `id`. Unknown ids are ignored.
    pub fn update(&self, id: RowId, record: Record) {
        let mut rows = self.rows.write();
        if let Some(slot) = rows.iter_mut().find(|(rid, _)| *rid == id) {
            slot.1 = record;
        }
    }

    /// Removes the record stored at `id`. Unknown ids are ignored.
    pub fn delete(&self, id: RowId) {
        self.rows.write().retain(|(rid, _)| *rid != id);
    }

    /// Snapshots the fragment's rows for a scan.
    pub fn snapshot(&self) -> Vec<(RowId, Record)> {
        self.rows.read().clone()
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the fragment is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

/// A row-producing physical plan operator.
///
/// Attribute references (`key`, `on`, `attr`, `group_by`) are 1-based
/// throughout, matching the partitioning convention where attribute 0
/// means "no attribute" (collapse).
pub enum PlanNode {
    /// Sequential scan over this worker's table fragment.
    TableScan {
        /// The fragment to scan.
        table: Arc<Table>,
    },
    /// Literal row source (INSERT source lists, tests).
    Values {
        /// Column types of the produced rows.
        schema: Vec<Type>,
        /// The rows, one record each.
        rows: Vec<Record>,
    },
    /// Predicate filter.
    Filter {
        /// Child to pull rows from.
        input: Box<PlanNode>,
        /// Rows are kept when this evaluates to true.
        predicate: Expr,
    },
    /// SET-style assignments applied to each row, keeping its stored
    /// location so the modified row can be written back.
    Assign {
        /// Child to pull rows from.
        input: Box<PlanNode>,
        /// New value per 1-based attribute.
        assignments: Vec<(usize, Expr)>,
    },
    /// Nested-loop join with the right side buffered.
    NestLoopJoin {
        /// Outer (streamed) side.
        left: Box<PlanNode>,
        /// Inner (buffered) side.
        right: Box<PlanNode>,
        /// Equi-join attributes (1-based, left and right), if any.
        /// `None` yields the cross product.
        on: Option<(usize, usize)>,
    },
    /// Full in-memory sort by one ascending key.
    Sort {
        /// Child to pull rows from.
        input: Box<PlanNode>,
        /// 1-based sort attribute.
        key: usize,
    },
    /// Buffers the child's rows for repeated reads.
    Materialize {
        /// Child to pull rows from.
        input: Box<PlanNode>,
    },
    /// Hash aggregation.
    Aggregate {
        /// Child to pull rows from.
        input: Box<PlanNode>,
        /// 1-based grouping attributes; empty for a whole-input aggregate.
        group_by: Vec<usize>,
        /// Aggregate expressions computed per group.
        aggregates: Vec<AggExpr>,
    },
    /// Row redistribution across partitions.
    ///
    /// Inserted only by the [Parallelizer](crate::parallelize); executes
    /// as the Split/Scatter/Gather/Merge quadruple sharing `port`.
    Exchange {
        /// Child to pull rows from.
        input: Box<PlanNode>,
        /// Channel id coupling the four sub-operators.
        port: PortId,
        /// 1-based partitioning attribute; 0 collapses onto partition 0.
        attr: usize,
        /// Enables the row-relocation path for key-changing updates.
        relocate: bool,
    },
}

impl PlanNode {
    /// Returns the structural output schema of this operator.
    pub fn schema(&self) -> Vec<Type> {
        match self {
            PlanNode::TableScan { table } => table.schema.clone(),
            PlanNode::Values { schema, .. } => schema.clone(),
            PlanNode::Filter { input, .. }
            | PlanNode::Assign { input, .. }
            | PlanNode::Sort { input, .. }
            | PlanNode::Materialize { input }
            | PlanNode::Exchange { input, .. } => input.schema(),
            PlanNode::NestLoopJoin { left, right, .. } => {
                let mut schema = left.schema();
                schema.extend(right.schema());
                schema
            }
            PlanNode::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let child = input.schema();
                let mut schema: Vec<Type> = group_by
                    .iter()
                    .filter_map(|&attr| child.get(attr - 1).copied())
                    .collect();
                schema.extend(aggregates.iter().map(|agg| agg.output_type(&child)));
                schema
            }
        }
    }

    /// Whether this operator buffers its input before producing output.
    ///
    /// Redistribution must be inserted below a buffering operator, not
    /// above it, so buffered rows are already on their owning partition.
    pub fn is_buffering(&self) -> bool {
        matches!(self, PlanNode::Sort { .. } | PlanNode::Materialize { .. })
    }
}

/// A complete statement to run on every worker.
pub enum Statement {
    /// Read query; the full result is collected on partition 0.
    Select(PlanNode),
    /// Row insertion from a source plan into the target table.
    Insert {
        /// Target table fragment on this worker.
        table: Arc<Table>,
        /// Source of rows to insert, typically [`PlanNode::Values`].
        source: PlanNode,
    },
    /// In-place update of rows matching `filter`.
    Update {
        /// Target table fragment on this worker.
        table: Arc<Table>,
        /// New value per 1-based attribute; unlisted attributes keep
        /// their stored value.
        assignments: Vec<(usize, Expr)>,
        /// Row selection; `None` updates every row.
        filter: Option<Expr>,
    },
    /// Deletion of rows matching `filter`.
    Delete {
        /// Target table fragment on this worker.
        table: Arc<Table>,
        /// Row selection; `None` deletes every row.
        filter: Option<Expr>,
    },
}

/// DML effects produced by running a statement, applied by the worker to
/// its local fragment after the plan drains.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Insert the record into the local fragment.
    Insert(Record),
    /// Replace the record stored at the id.
    Update(RowId, Record),
    /// Remove the record stored at the id.
    Delete(RowId),
}

impl Effect {
    /// Classifies a row produced by a DML plan into the local effect it
    /// requires, if any.
    pub fn from_row(row: &Row) -> Option<Effect> {
        use crate::row::RowMark;
        match row.mark {
            RowMark::Stored(id) => Some(Effect::Update(id, row.record.clone())),
            RowMark::InsertElsewhere => Some(Effect::Insert(row.record.clone())),
            RowMark::DeleteMe(id) => Some(Effect::Delete(id)),
            RowMark::Computed => None,
        }
    }
}
