use crate::comm::NodeId;
use crate::exec::ExecError;
use crate::row::Record;

/// Computes the owning partition of `record` under the given partitioning
/// attribute.
///
/// `attr` is 1-based; `attr == 0` maps every record to partition 0, which
/// collapses a stream onto a single node. Otherwise the value at that
/// column is reinterpreted as an unsigned integer and reduced modulo the
/// partition count, so the result is deterministic across every node that
/// computes it.
pub fn partition(record: &Record, attr: usize, nodes: usize) -> Result<NodeId, ExecError> {
    if attr == 0 {
        return Ok(0);
    }
    let value = record
        .values
        .get(attr - 1)
        .ok_or_else(|| ExecError::BadPartitionAttr {
            attr,
            reason: "attribute out of range".into(),
        })?;
    let key = value.as_unsigned().ok_or_else(|| ExecError::BadPartitionAttr {
        attr,
        reason: "attribute is not an integer".into(),
    })?;
    Ok((key % nodes as u64) as NodeId)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::Value;

    fn record(values: Vec<Value>) -> Record {
        Record { values }
    }

    #[test]
    fn test_partition_zero_attr_collapses() {
        let r = record(vec![Value::Int32(42), Value::Text("x".into())]);
        for nodes in 1..=5 {
            assert_eq!(partition(&r, 0, nodes).unwrap(), 0);
        }
    }

    #[test]
    fn test_partition_modulo() {
        for v in 0..20 {
            let r = record(vec![Value::Int32(v)]);
            assert_eq!(partition(&r, 1, 3).unwrap(), (v as u64 % 3) as usize);
        }
    }

    #[test]
    fn test_partition_negative_uses_unsigned_reinterpretation() {
        let r = record(vec![Value::Int32(-1)]);
        let expected = (u64::from(-1i32 as u32) % 3) as usize;
        assert_eq!(partition(&r, 1, 3).unwrap(), expected);
    }

    #[test]
    fn test_partition_deterministic() {
        let r = record(vec![Value::Int64(123_456_789)]);
        let first = partition(&r, 1, 7).unwrap();
        for _ in 0..10 {
            assert_eq!(partition(&r, 1, 7).unwrap(), first);
        }
    }

    #[test]
    fn test_partition_in_range() {
        for v in [0i64, 1, 17, 999, i64::MAX, i64::MIN] {
            let r = record(vec![Value::Int64(v)]);
            let p = partition(&r, 1, 4).unwrap();
            assert!(p < 4);
        }
    }

    #[test]
    fn test_partition_rejects_out_of_range_attr() {
        let r = record(vec![Value::Int32(1)]);
        assert!(matches!(
            partition(&r, 2, 3),
            Err(ExecError::BadPartitionAttr { attr: 2, .. })
        ));
    }

    #[test]
    fn test_partition_rejects_non_integer_attr() {
        let r = record(vec![Value::Text("abc".into())]);
        assert!(matches!(
            partition(&r, 1, 3),
            Err(ExecError::BadPartitionAttr { attr: 1, .. })
        ));
    }
}
