//! The plan parallelizer.
//!
//! Rewrites a single-node [`Statement`] into the plan each worker runs,
//! inserting [`PlanNode::Exchange`] nodes wherever rows must change
//! partitions:
//!
//! - equality joins redistribute both children by their join attribute
//! - grouped aggregates redistribute by the first grouping attribute;
//!   whole-input aggregates collapse onto partition 0
//! - a read query's root collapses so the full result lands on
//!   partition 0
//! - updates get a root Exchange on the table's partitioning attribute
//!   with the relocation path enabled; inserts get an ownership filter
//!   instead of an Exchange; deletes need no rewrite at all, since each
//!   fragment only holds its own rows
//!
//! Channel ids are drawn from a monotonic counter, and the traversal is
//! deterministic, so every worker assigns identical ids to the same
//! Exchange. Partitioning attributes are validated here, at plan time,
//! rather than during execution.

use std::sync::Arc;

use tracing::debug;

use crate::comm::{Communicator, NodeId, PortId};
use crate::plan::{Expr, PlanError, PlanNode, Statement, Table};

/// A statement rewritten for distributed execution on one worker.
pub enum ParallelPlan {
    /// Read query; partition 0 receives the full result.
    Select(PlanNode),
    /// Insertion: the plan yields the rows this worker stores.
    Insert {
        /// Target fragment.
        table: Arc<Table>,
        /// Source rows filtered down to this worker's portion.
        plan: PlanNode,
    },
    /// Update: the plan yields update/relocation effects for this worker.
    Update {
        /// Target fragment.
        table: Arc<Table>,
        /// Scan + assignments under a relocating Exchange.
        plan: PlanNode,
    },
    /// Deletion: the plan yields the stored rows to remove.
    Delete {
        /// Target fragment.
        table: Arc<Table>,
        /// Local scan of the rows to delete.
        plan: PlanNode,
    },
}

impl ParallelPlan {
    /// The plan this worker executes.
    pub fn plan(&self) -> &PlanNode {
        match self {
            ParallelPlan::Select(plan) => plan,
            ParallelPlan::Insert { plan, .. }
            | ParallelPlan::Update { plan, .. }
            | ParallelPlan::Delete { plan, .. } => plan,
        }
    }
}

/// Rewrites `statement` for distributed execution on `comm`'s worker.
pub fn parallelize(statement: Statement, comm: &Communicator) -> Result<ParallelPlan, PlanError> {
    let mut pass = Pass {
        node: comm.node(),
        nodes: comm.nodes(),
        next_port: 0,
    };
    match statement {
        Statement::Select(plan) => {
            let plan = pass.rewrite(plan)?;
            // One more collapse so the full result lands on partition 0.
            let plan = pass.insert_exchange(plan, 0, false)?;
            debug!(ports = pass.next_port, "read query parallelized");
            Ok(ParallelPlan::Select(plan))
        }
        Statement::Insert { table, source } => {
            check_attr(&source.schema(), table.part_attr)?;
            let predicate = Expr::owned_here(table.part_attr, pass.nodes, pass.node);
            let plan = PlanNode::Filter {
                input: Box::new(source),
                predicate,
            };
            debug!(table = %table.name, attr = table.part_attr, "insert filtered to owned rows");
            Ok(ParallelPlan::Insert { table, plan })
        }
        Statement::Update {
            table,
            assignments,
            filter,
        } => {
            let mut plan = PlanNode::TableScan {
                table: Arc::clone(&table),
            };
            if let Some(predicate) = filter {
                plan = PlanNode::Filter {
                    input: Box::new(plan),
                    predicate,
                };
            }
            plan = PlanNode::Assign {
                input: Box::new(plan),
                assignments,
            };
            let plan = pass.rewrite(plan)?;
            // A key-changing update moves rows between fragments, so the
            // root Exchange runs with the relocation path enabled.
            let plan = pass.insert_exchange(plan, table.part_attr, true)?;
            debug!(table = %table.name, attr = table.part_attr, "update parallelized");
            Ok(ParallelPlan::Update { table, plan })
        }
        Statement::Delete { table, filter } => {
            let mut plan = PlanNode::TableScan {
                table: Arc::clone(&table),
            };
            if let Some(predicate) = filter {
                plan = PlanNode::Filter {
                    input: Box::new(plan),
                    predicate,
                };
            }
            debug!(table = %table.name, "delete needs no rewrite");
            Ok(ParallelPlan::Delete { table, plan })
        }
    }
}

struct Pass {
    node: NodeId,
    nodes: usize,
    next_port: PortId,
}

impl Pass {
    fn fresh_port(&mut self) -> PortId {
        let port = self.next_port;
        self.next_port += 1;
        port
    }

    /// Post-order pass: children first, then this operator's rewrite.
    fn rewrite(&mut self, plan: PlanNode) -> Result<PlanNode, PlanError> {
        Ok(match plan {
            PlanNode::TableScan { .. } | PlanNode::Values { .. } => plan,
            PlanNode::Filter { input, predicate } => PlanNode::Filter {
                input: Box::new(self.rewrite(*input)?),
                predicate,
            },
            PlanNode::Assign { input, assignments } => PlanNode::Assign {
                input: Box::new(self.rewrite(*input)?),
                assignments,
            },
            PlanNode::Sort { input, key } => PlanNode::Sort {
                input: Box::new(self.rewrite(*input)?),
                key,
            },
            PlanNode::Materialize { input } => PlanNode::Materialize {
                input: Box::new(self.rewrite(*input)?),
            },
            PlanNode::Exchange {
                input,
                port,
                attr,
                relocate,
            } => PlanNode::Exchange {
                input: Box::new(self.rewrite(*input)?),
                port,
                attr,
                relocate,
            },
            PlanNode::NestLoopJoin { left, right, on } => {
                let mut left = self.rewrite(*left)?;
                let mut right = self.rewrite(*right)?;
                if let Some((l_attr, r_attr)) = on {
                    left = self.insert_exchange(left, l_attr, false)?;
                    right = self.insert_exchange(right, r_attr, false)?;
                }
                PlanNode::NestLoopJoin {
                    left: Box::new(left),
                    right: Box::new(right),
                    on,
                }
            }
            PlanNode::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let input = self.rewrite(*input)?;
                // Grouped: co-locate each group on the first grouping
                // attribute's owner. Ungrouped: collapse everything onto
                // partition 0 and aggregate there in a single phase.
                let attr = group_by.first().copied().unwrap_or(0);
                let input = self.insert_exchange(input, attr, false)?;
                PlanNode::Aggregate {
                    input: Box::new(input),
                    group_by,
                    aggregates,
                }
            }
        })
    }

    /// Inserts an Exchange above `plan`, or below it when `plan` buffers
    /// its input. The descent recurses, so a Materialize over a Sort
    /// still gets its Exchange underneath both.
    fn insert_exchange(
        &mut self,
        plan: PlanNode,
        attr: usize,
        relocate: bool,
    ) -> Result<PlanNode, PlanError> {
        Ok(match plan {
            PlanNode::Sort { input, key } => PlanNode::Sort {
                input: Box::new(self.insert_exchange(*input, attr, relocate)?),
                key,
            },
            PlanNode::Materialize { input } => PlanNode::Materialize {
                input: Box::new(self.insert_exchange(*input, attr, relocate)?),
            },
            _ => {
                check_attr(&plan.schema(), attr)?;
                PlanNode::Exchange {
                    input: Box::new(plan),
                    port: self.fresh_port(),
                    attr,
                    relocate,
                }
            }
        })
    }
}

/// Validates a 1-based partitioning attribute against `schema`.
///
/// Attribute 0 (collapse) is always valid; any other attribute must be
/// in range and of integer type, since partitioning reduces it modulo
/// the node count.
fn check_attr(schema: &[crate::datum::Type], attr: usize) -> Result<(), PlanError> {
    if attr == 0 {
        return Ok(());
    }
    let ty = *schema.get(attr - 1).ok_or(PlanError::AttrOutOfRange {
        attr,
        columns: schema.len(),
    })?;
    if !ty.is_integer() {
        return Err(PlanError::AttrNotInteger { attr, ty });
    }
    Ok(())
}
