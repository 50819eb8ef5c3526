//! Combining the values contributed to a link
//!
//! `local` is this node's own value, `remotes` the values received from
//! other nodes, most recent first. ANY takes the local value, otherwise the
//! newest remote. MIN, MAX, SUM and AVG work element-wise and do not depend
//! on the order of `remotes`:
//! - The result shape (data type and length) is the local value's. Without
//!   one it is the shape shared by the most remotes, ties going to the lower
//!   type code and then the shorter array.
//! - Contributors of any other shape are skipped.
//! - Integers aggregate in i128 (`Uint64` as unsigned, AVG truncates toward
//!   zero) and saturate to the range of the result type. Floats aggregate
//!   in f64.

use std::collections::BTreeMap;

use catbus_wire::{Aggregation, DataItem, DataType, Value};
use tracing::debug;

type Shape = (u8, usize);

fn shape(item: &DataItem) -> Shape {
    (item.data_type.to_byte(), item.len())
}

pub fn aggregate(
    aggregation: Aggregation,
    local: Option<&DataItem>,
    remotes: &[&DataItem],
) -> Option<DataItem> {
    if aggregation == Aggregation::Any {
        return local.or_else(|| remotes.first().copied()).cloned();
    }

    let reference = match local {
        Some(item) => item,
        None => majority(remotes)?,
    };
    let wanted = shape(reference);

    let items: Vec<&DataItem> = local
        .into_iter()
        .chain(remotes.iter().copied())
        .filter(|item| {
            let keep = shape(item) == wanted;
            if !keep {
                debug!(
                    expected = ?reference.data_type,
                    actual = ?item.data_type,
                    expected_len = reference.len(),
                    actual_len = item.len(),
                    "skipping mismatched contributor"
                );
            }
            keep
        })
        .collect();

    let data_type = reference.data_type;
    let values = (0..reference.len())
        .map(|i| {
            let column = items.iter().map(|item| item.values[i]);
            if data_type.is_float() {
                Value::Float(fold_float(aggregation, column))
            } else {
                narrow(data_type, fold_int(aggregation, column.map(|v| widen(data_type, v))))
            }
        })
        .collect();

    Some(DataItem::new(data_type, values))
}

/// The remote whose shape most remotes share
fn majority<'a>(remotes: &[&'a DataItem]) -> Option<&'a DataItem> {
    let mut counts: BTreeMap<Shape, usize> = BTreeMap::new();
    for item in remotes {
        *counts.entry(shape(item)).or_default() += 1;
    }
    let (best, _) = counts
        .into_iter()
        .max_by(|(a, x), (b, y)| x.cmp(y).then(b.cmp(a)))?;
    remotes.iter().copied().find(|item| shape(item) == best)
}

fn widen(data_type: DataType, value: Value) -> i128 {
    match data_type {
        DataType::Uint64 => value.as_u64() as i128,
        _ => value.as_i64() as i128,
    }
}

fn narrow(data_type: DataType, value: i128) -> Value {
    let value = saturate(data_type, value);
    match data_type {
        DataType::Uint64 => Value::Int(value as u64 as i64),
        _ => Value::Int(value as i64),
    }
}

fn fold_int(aggregation: Aggregation, column: impl Iterator<Item = i128>) -> i128 {
    let values: Vec<i128> = column.collect();
    match aggregation {
        Aggregation::Any => values.first().copied().unwrap_or(0),
        Aggregation::Min => values.iter().copied().min().unwrap_or(0),
        Aggregation::Max => values.iter().copied().max().unwrap_or(0),
        Aggregation::Sum => values.iter().fold(0i128, |acc, v| acc.saturating_add(*v)),
        Aggregation::Avg => {
            if values.is_empty() {
                return 0;
            }
            let sum = values.iter().fold(0i128, |acc, v| acc.saturating_add(*v));
            sum / values.len() as i128
        }
    }
}

fn fold_float(aggregation: Aggregation, column: impl Iterator<Item = Value>) -> f64 {
    let values: Vec<f64> = column.map(Value::as_f64).collect();
    match aggregation {
        Aggregation::Any => values.first().copied().unwrap_or(0.0),
        Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Sum => values.iter().sum(),
        Aggregation::Avg => values.iter().sum::<f64>() / values.len().max(1) as f64,
    }
}

/// Clamp into the range the data type can encode
fn saturate(data_type: DataType, value: i128) -> i128 {
    let (min, max): (i128, i128) = match data_type {
        DataType::Bool => (0, 1),
        DataType::Uint8 => (0, u8::MAX as i128),
        DataType::Int8 => (i8::MIN as i128, i8::MAX as i128),
        DataType::Uint16 => (0, u16::MAX as i128),
        DataType::Int16 => (i16::MIN as i128, i16::MAX as i128),
        DataType::Uint32 => (0, u32::MAX as i128),
        DataType::Int32 => (i32::MIN as i128, i32::MAX as i128),
        DataType::Uint64 => (0, u64::MAX as i128),
        DataType::Int64 | DataType::Float => (i64::MIN as i128, i64::MAX as i128),
    };
    value.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ints(values: &[i64]) -> Vec<DataItem> {
        values.iter().map(|v| DataItem::int32(*v as i32)).collect()
    }

    fn run(aggregation: Aggregation, local: Option<&DataItem>, items: &[DataItem]) -> Option<DataItem> {
        let refs: Vec<&DataItem> = items.iter().collect();
        aggregate(aggregation, local, &refs)
    }

    fn u64_of(item: &DataItem) -> u64 {
        item.values[0].as_u64()
    }

    #[test]
    fn test_empty_has_no_result() {
        assert_eq!(aggregate(Aggregation::Sum, None, &[]), None);
        assert_eq!(aggregate(Aggregation::Any, None, &[]), None);
    }

    #[test]
    fn test_any_prefers_local_then_newest() {
        let remotes = ints(&[3, 4]);
        let local = DataItem::int32(2);
        assert_eq!(run(Aggregation::Any, Some(&local), &remotes), Some(DataItem::int32(2)));
        assert_eq!(run(Aggregation::Any, None, &remotes), Some(DataItem::int32(3)));
    }

    #[test]
    fn test_integer_modes() {
        let local = DataItem::int32(2);
        let remotes = ints(&[3, 4, 5]);
        assert_eq!(run(Aggregation::Min, Some(&local), &remotes), Some(DataItem::int32(2)));
        assert_eq!(run(Aggregation::Max, Some(&local), &remotes), Some(DataItem::int32(5)));
        assert_eq!(run(Aggregation::Sum, Some(&local), &remotes), Some(DataItem::int32(14)));
        // 14 / 4 truncates
        assert_eq!(run(Aggregation::Avg, Some(&local), &remotes), Some(DataItem::int32(3)));
    }

    #[test]
    fn test_uint64_above_signed_range() {
        let big = vec![DataItem::uint64(u64::MAX), DataItem::uint64(5), DataItem::uint64(1 << 63)];

        let max = run(Aggregation::Max, None, &big).unwrap();
        assert_eq!(max.data_type, DataType::Uint64);
        assert_eq!(u64_of(&max), u64::MAX);

        let min = run(Aggregation::Min, None, &big).unwrap();
        assert_eq!(u64_of(&min), 5);

        // saturates at the top of the unsigned range
        let sum = run(Aggregation::Sum, None, &big).unwrap();
        assert_eq!(u64_of(&sum), u64::MAX);

        let pair = vec![DataItem::uint64(1 << 63), DataItem::uint64(7)];
        assert_eq!(u64_of(&run(Aggregation::Sum, None, &pair).unwrap()), (1 << 63) + 7);
        assert_eq!(u64_of(&run(Aggregation::Avg, None, &pair).unwrap()), ((1u64 << 63) + 7) / 2);
    }

    #[test]
    fn test_float_average() {
        let items = vec![DataItem::float(1.0), DataItem::float(2.0)];
        let result = run(Aggregation::Avg, None, &items).unwrap();
        assert_eq!(result.values, vec![Value::Float(1.5)]);
    }

    #[test]
    fn test_element_wise_arrays() {
        let a = DataItem::new(DataType::Int16, vec![Value::Int(1), Value::Int(10)]);
        let b = DataItem::new(DataType::Int16, vec![Value::Int(5), Value::Int(-10)]);
        let result = run(Aggregation::Max, None, &[a, b]).unwrap();
        assert_eq!(result.values, vec![Value::Int(5), Value::Int(10)]);
    }

    #[test]
    fn test_result_saturates_to_type() {
        let local = DataItem::scalar(DataType::Uint8, Value::Int(200));
        let remotes = vec![DataItem::scalar(DataType::Uint8, Value::Int(100))];
        let result = run(Aggregation::Sum, Some(&local), &remotes).unwrap();
        assert_eq!(result.values, vec![Value::Int(255)]);
    }

    #[test]
    fn test_local_shape_wins() {
        let local = DataItem::scalar(DataType::Uint8, Value::Int(20));
        let remotes = vec![DataItem::int32(100), DataItem::int32(5), DataItem::scalar(DataType::Uint8, Value::Int(3))];
        let result = run(Aggregation::Sum, Some(&local), &remotes).unwrap();
        assert_eq!(result, DataItem::scalar(DataType::Uint8, Value::Int(23)));
    }

    #[test]
    fn test_mismatched_shapes_skipped() {
        let pair = DataItem::new(DataType::Int32, vec![Value::Int(5), Value::Int(6)]);
        let remotes = vec![DataItem::int32(1), pair, DataItem::int32(2)];
        assert_eq!(run(Aggregation::Sum, None, &remotes), Some(DataItem::int32(3)));
    }

    #[test]
    fn test_mixed_shapes_ignore_refresh_order() {
        let small = DataItem::scalar(DataType::Uint8, Value::Int(9));
        let wide = DataItem::int32(40);
        // one of each: the lower type code wins whichever arrived last
        let a = run(Aggregation::Sum, None, &[small.clone(), wide.clone()]);
        let b = run(Aggregation::Sum, None, &[wide, small.clone()]);
        assert_eq!(a, b);
        assert_eq!(a, Some(small));
    }

    fn item_strategy() -> impl Strategy<Value = DataItem> {
        prop_oneof![
            (-1000i32..1000).prop_map(DataItem::int32),
            (0u8..=255).prop_map(|v| DataItem::scalar(DataType::Uint8, Value::Int(v as i64))),
            (-1000i32..1000, -1000i32..1000).prop_map(|(a, b)| {
                DataItem::new(DataType::Int32, vec![Value::Int(a as i64), Value::Int(b as i64)])
            }),
            any::<u64>().prop_map(DataItem::uint64),
        ]
    }

    proptest! {
        #[test]
        fn prop_order_independent(
            local in proptest::option::of(item_strategy()),
            remotes in prop::collection::vec(item_strategy(), 0..8),
            seed in any::<u64>(),
        ) {
            let mut shuffled = remotes.clone();
            if !shuffled.is_empty() {
                let len = shuffled.len();
                shuffled.rotate_left((seed as usize) % len);
                shuffled.reverse();
            }

            for aggregation in [Aggregation::Min, Aggregation::Max, Aggregation::Sum, Aggregation::Avg] {
                prop_assert_eq!(
                    run(aggregation, local.as_ref(), &remotes),
                    run(aggregation, local.as_ref(), &shuffled)
                );
            }
        }
    }
}
