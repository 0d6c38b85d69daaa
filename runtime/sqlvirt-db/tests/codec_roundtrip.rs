use proptest::prelude::*;
use rust_decimal::Decimal;
use sqlvirt_db::{RowSet, RowSetCodec, Value};

fn column_name() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z_][A-Za-z0-9_]{0,6}",
        Just("val".to_string()),
        Just("COUNT(*)".to_string()),
        Just(String::new()),
    ]
}

fn text_cell() -> impl Strategy<Value = Value> + Clone {
    prop_oneof![
        Just(Value::Null),
        "[ a-zA-Z0-9<>&'\"\r\n\t]{0,8}".prop_map(Value::Text),
    ]
}

fn typed_cell() -> impl Strategy<Value = Value> + Clone {
    prop_oneof![
        Just(Value::Null),
        "[a-z0-9 ]{0,8}".prop_map(Value::Text),
        any::<i32>().prop_map(Value::Integer),
        any::<i64>().prop_map(Value::Long),
        (any::<i64>(), 0u32..6).prop_map(|(mantissa, scale)| Value::Decimal(Decimal::new(mantissa, scale))),
    ]
}

fn row_set(cell: impl Strategy<Value = Value> + Clone) -> impl Strategy<Value = RowSet> {
    prop::collection::vec(column_name(), 1..5).prop_flat_map(move |columns| {
        let width = columns.len();
        prop::collection::vec(prop::collection::vec(cell.clone(), width), 0..4)
            .prop_map(move |rows| RowSet::with_rows(columns.clone(), rows))
    })
}

proptest! {
    #[test]
    fn untyped_round_trip_preserves_text_and_nulls(mut rows in row_set(text_cell())) {
        let codec = RowSetCodec::default();
        let xml = codec.encode(&mut rows).expect("encode");
        let decoded = codec.decode(&xml).expect("decode");
        prop_assert_eq!(decoded.columns(), rows.columns());
        prop_assert_eq!(decoded.rows(), rows.rows());
    }

    #[test]
    fn typed_round_trip_preserves_native_kinds(mut rows in row_set(typed_cell())) {
        let codec = RowSetCodec::default().typed(true);
        let xml = codec.encode(&mut rows).expect("encode");
        let decoded = codec.decode(&xml).expect("decode");
        prop_assert_eq!(decoded.columns(), rows.columns());
        prop_assert_eq!(decoded.rows(), rows.rows());
    }
}
