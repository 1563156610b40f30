use std::fmt;

use crate::datum::{Type, Value};
use crate::exec::ExecError;
use crate::row::Record;

/// A bound scalar expression over a record.
///
/// Column references are positional and 1-based, matching the attribute
/// numbering used everywhere else in the planner. The surface is the
/// minimum the Parallelizer and DML paths need: column access, literals,
/// equality, and the modulo form of the partition-ownership filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// 1-based column reference.
    Column(usize),
    /// Constant value.
    Literal(Value),
    /// Unsigned modulo, with the same two's-complement reinterpretation
    /// as the partition function.
    Mod(Box<Expr>, Box<Expr>),
    /// Equality test, yielding a boolean.
    Eq(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Column reference helper.
    pub fn column(attr: usize) -> Expr {
        Expr::Column(attr)
    }

    /// Literal helper.
    pub fn literal(value: Value) -> Expr {
        Expr::Literal(value)
    }

    /// Builds the partition-ownership predicate
    /// `attr mod nodes == node`, attached to DML plan roots so each
    /// worker applies only its own portion of the statement.
    pub fn owned_here(attr: usize, nodes: usize, node: usize) -> Expr {
        Expr::Eq(
            Box::new(Expr::Mod(
                Box::new(Expr::Column(attr)),
                Box::new(Expr::Literal(Value::Int64(nodes as i64))),
            )),
            Box::new(Expr::Literal(Value::Int64(node as i64))),
        )
    }

    /// Evaluates the expression against `record`.
    pub fn eval(&self, record: &Record) -> Result<Value, ExecError> {
        match self {
            Expr::Column(attr) => record
                .values
                .get(attr.wrapping_sub(1))
                .cloned()
                .ok_or_else(|| ExecError::Eval(format!("column {attr} out of range"))),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Mod(lhs, rhs) => {
                let lhs = lhs.eval(record)?;
                let rhs = rhs.eval(record)?;
                if lhs.is_null() || rhs.is_null() {
                    return Ok(Value::Null);
                }
                let l = lhs
                    .as_unsigned()
                    .ok_or_else(|| ExecError::Eval(format!("{lhs} is not an integer")))?;
                let r = rhs
                    .as_unsigned()
                    .ok_or_else(|| ExecError::Eval(format!("{rhs} is not an integer")))?;
                if r == 0 {
                    return Err(ExecError::Eval("modulo by zero".into()));
                }
                Ok(Value::Int64((l % r) as i64))
            }
            Expr::Eq(lhs, rhs) => {
                let lhs = lhs.eval(record)?;
                let rhs = rhs.eval(record)?;
                if lhs.is_null() || rhs.is_null() {
                    return Ok(Value::Boolean(false));
                }
                Ok(Value::Boolean(lhs == rhs))
            }
        }
    }

    /// Evaluates the expression as a filter predicate.
    pub fn matches(&self, record: &Record) -> Result<bool, ExecError> {
        Ok(self.eval(record)? == Value::Boolean(true))
    }
}

/// Supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    /// COUNT of rows (attribute 0) or non-NULL values.
    Count,
    /// SUM of numeric values.
    Sum,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggFunc::Count => write!(f, "COUNT"),
            AggFunc::Sum => write!(f, "SUM"),
            AggFunc::Min => write!(f, "MIN"),
            AggFunc::Max => write!(f, "MAX"),
        }
    }
}

/// One aggregate computation: a function applied to a 1-based attribute.
///
/// Attribute 0 is only meaningful for `Count`, where it counts rows
/// regardless of nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggExpr {
    /// The aggregate function.
    pub func: AggFunc,
    /// 1-based argument attribute; 0 for COUNT of rows.
    pub attr: usize,
}

impl AggExpr {
    pub fn new(func: AggFunc, attr: usize) -> Self {
        Self { func, attr }
    }

    /// Output column type given the input schema.
    pub fn output_type(&self, schema: &[Type]) -> Type {
        let arg = || schema.get(self.attr.wrapping_sub(1)).copied();
        match self.func {
            AggFunc::Count => Type::Int8,
            AggFunc::Sum => match arg() {
                Some(Type::Float4 | Type::Float8) => Type::Float8,
                _ => Type::Int8,
            },
            AggFunc::Min | AggFunc::Max => arg().unwrap_or(Type::Int8),
        }
    }

    /// Initial accumulator state.
    pub fn init(&self) -> Value {
        match self.func {
            AggFunc::Count => Value::Int64(0),
            AggFunc::Sum | AggFunc::Min | AggFunc::Max => Value::Null,
        }
    }

    /// Folds one input record into the accumulator.
    pub fn fold(&self, acc: &mut Value, record: &Record) -> Result<(), ExecError> {
        let arg = if self.attr == 0 {
            None
        } else {
            Some(record.values.get(self.attr - 1).ok_or_else(|| {
                ExecError::Eval(format!("aggregate argument {} out of range", self.attr))
            })?)
        };
        match self.func {
            AggFunc::Count => {
                if arg.map_or(true, |v| !v.is_null()) {
                    if let Value::Int64(n) = acc {
                        *n += 1;
                    }
                }
            }
            AggFunc::Sum => {
                let Some(value) = arg.filter(|v| !v.is_null()) else {
                    return Ok(());
                };
                *acc = match (&*acc, value) {
                    (Value::Null, v) => sum_seed(v)?,
                    (Value::Int64(a), v) => Value::Int64(a + int_arg(v)?),
                    (Value::Float64(a), v) => Value::Float64(a + float_arg(v)?),
                    _ => return Err(ExecError::Eval("sum over mixed types".into())),
                };
            }
            AggFunc::Min | AggFunc::Max => {
                let Some(value) = arg.filter(|v| !v.is_null()) else {
                    return Ok(());
                };
                let replace = match &*acc {
                    Value::Null => true,
                    current => {
                        let ord = value.partial_cmp(current).ok_or_else(|| {
                            ExecError::Eval("incomparable aggregate values".into())
                        })?;
                        if self.func == AggFunc::Min {
                            ord.is_lt()
                        } else {
                            ord.is_gt()
                        }
                    }
                };
                if replace {
                    *acc = value.clone();
                }
            }
        }
        Ok(())
    }
}

fn sum_seed(value: &Value) -> Result<Value, ExecError> {
    match value {
        Value::Float32(_) | Value::Float64(_) => Ok(Value::Float64(float_arg(value)?)),
        _ => Ok(Value::Int64(int_arg(value)?)),
    }
}

fn int_arg(value: &Value) -> Result<i64, ExecError> {
    match value {
        Value::Int16(n) => Ok(*n as i64),
        Value::Int32(n) => Ok(*n as i64),
        Value::Int64(n) => Ok(*n),
        other => Err(ExecError::Eval(format!("{other} is not an integer"))),
    }
}

fn float_arg(value: &Value) -> Result<f64, ExecError> {
    match value {
        Value::Float32(f) => Ok(*f as f64),
        Value::Float64(f) => Ok(*f),
        Value::Int16(n) => Ok(*n as f64),
        Value::Int32(n) => Ok(*n as f64),
        Value::Int64(n) => Ok(*n as f64),
        other => Err(ExecError::Eval(format!("{other} is not numeric"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(values: Vec<Value>) -> Record {
        Record::new(values)
    }

    #[test]
    fn test_column_and_literal() {
        let r = record(vec![Value::Int32(7), Value::Text("x".into())]);
        assert_eq!(Expr::column(1).eval(&r).unwrap(), Value::Int32(7));
        assert_eq!(Expr::column(2).eval(&r).unwrap(), Value::Text("x".into()));
        assert!(Expr::column(3).eval(&r).is_err());
        assert_eq!(
            Expr::literal(Value::Boolean(true)).eval(&r).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_ownership_filter_matches_partition_function() {
        use crate::exchange::partition;

        for v in [-5i32, 0, 1, 2, 3, 17, 1000] {
            let r = record(vec![Value::Int32(v)]);
            let owner = partition(&r, 1, 3).unwrap();
            for node in 0..3 {
                let keep = Expr::owned_here(1, 3, node).matches(&r).unwrap();
                assert_eq!(keep, node == owner, "value {v} node {node}");
            }
        }
    }

    #[test]
    fn test_eq_with_null_is_false() {
        let r = record(vec![Value::Null]);
        let e = Expr::Eq(
            Box::new(Expr::column(1)),
            Box::new(Expr::literal(Value::Int32(1))),
        );
        assert_eq!(e.eval(&r).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_modulo_by_zero_fails() {
        let r = record(vec![Value::Int32(1)]);
        let e = Expr::Mod(
            Box::new(Expr::column(1)),
            Box::new(Expr::literal(Value::Int64(0))),
        );
        assert!(e.eval(&r).is_err());
    }

    #[test]
    fn test_count_skips_nulls_only_with_argument() {
        let agg_rows = AggExpr::new(AggFunc::Count, 0);
        let agg_col = AggExpr::new(AggFunc::Count, 1);
        let mut rows_acc = agg_rows.init();
        let mut col_acc = agg_col.init();
        for v in [Value::Int32(1), Value::Null, Value::Int32(3)] {
            let r = record(vec![v]);
            agg_rows.fold(&mut rows_acc, &r).unwrap();
            agg_col.fold(&mut col_acc, &r).unwrap();
        }
        assert_eq!(rows_acc, Value::Int64(3));
        assert_eq!(col_acc, Value::Int64(2));
    }

    #[test]
    fn test_sum_and_min_max() {
        let sum = AggExpr::new(AggFunc::Sum, 1);
        let min = AggExpr::new(AggFunc::Min, 1);
        let max = AggExpr::new(AggFunc::Max, 1);
        let mut s = sum.init();
        let mut lo = min.init();
        let mut hi = max.init();
        for v in [4, 1, 9, 2] {
            let r = record(vec![Value::Int32(v)]);
            sum.fold(&mut s, &r).unwrap();
            min.fold(&mut lo, &r).unwrap();
            max.fold(&mut hi, &r).unwrap();
        }
        assert_eq!(s, Value::Int64(16));
        assert_eq!(lo, Value::Int32(1));
        assert_eq!(hi, Value::Int32(9));
    }

    #[test]
    fn test_sum_of_no_rows_is_null() {
        let sum = AggExpr::new(AggFunc::Sum, 1);
        assert_eq!(sum.init(), Value::Null);
    }
}
