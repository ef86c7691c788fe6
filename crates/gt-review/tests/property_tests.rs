//! Property-based tests for edit application and batch atomicity.
//!
//! Run with `ProptestConfig::with_cases(128)`; each case is in-memory.

use gt_review::{
    apply, commit_batch, CommitOptions, EditBatch, EditValue, FailurePolicy, MemoryRecordStore,
    RecordStore, StructuralValidator,
};
use gt_review_path::{get, parse};
use proptest::prelude::*;
use serde_json::{Map, Value};

// ============================================================================
// Strategies
// ============================================================================

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,6}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,3}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// Object-rooted record, the shape the store holds.
fn arb_record() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,3}", arb_json(), 0..5)
        .prop_map(|m| Value::Object(m.into_iter().collect()))
}

/// Well-formed dotted path with short names so edits collide with existing
/// keys.
fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec(("[a-z]{1,3}", prop::option::of(0usize..6)), 1..4).prop_map(|segs| {
        segs.into_iter()
            .map(|(name, index)| match index {
                Some(i) => format!("{name}[{i}]"),
                None => name,
            })
            .collect::<Vec<_>>()
            .join(".")
    })
}

/// Scalar that is stored as-is (not a clear token).
fn arb_scalar() -> impl Strategy<Value = EditValue> {
    prop_oneof![
        any::<bool>().prop_map(EditValue::Bool),
        any::<i64>().prop_map(EditValue::from),
        "[a-z]{1,8}"
            .prop_filter("clear token", |s| s != "null")
            .prop_map(EditValue::String),
    ]
}

fn arb_junk() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["..", ".", "[", "[x]", "]", "[1", "-", " "])
}

fn strict() -> CommitOptions {
    CommitOptions { validate: true, policy: FailurePolicy::AllOrNothing }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: after an edit, reading the same path yields the new value.
    #[test]
    fn prop_apply_then_read(mut record in arb_record(), raw in arb_path(), value in arb_scalar()) {
        let path = parse(&raw).unwrap();
        let expected = value.clone().into_value();
        apply(&mut record, path.steps(), value.into_value());
        prop_assert_eq!(get(&record, path.steps()), Some(&expected));
    }

    /// Property: "" and "null" always store JSON null.
    #[test]
    fn prop_clear_tokens_store_null(
        mut record in arb_record(),
        raw in arb_path(),
        token in prop::sample::select(vec!["", "null"]),
    ) {
        let path = parse(&raw).unwrap();
        apply(&mut record, path.steps(), EditValue::from(token).into_value());
        prop_assert_eq!(get(&record, path.steps()), Some(&Value::Null));
    }

    /// Property: writing past the end grows the array to exactly k+1 with ""
    /// placeholders in the gap and existing elements untouched.
    #[test]
    fn prop_index_growth(
        existing in prop::collection::vec("[a-z]{1,4}", 0..5),
        extra in 0usize..6,
    ) {
        let n = existing.len();
        let k = n + extra;
        let mut record = serde_json::json!({ "arr": existing.clone() });
        let path = parse(&format!("arr[{k}]")).unwrap();
        apply(&mut record, path.steps(), Value::from("v"));

        let arr = record["arr"].as_array().unwrap();
        prop_assert_eq!(arr.len(), k + 1);
        for (i, item) in existing.iter().enumerate() {
            prop_assert_eq!(&arr[i], &Value::from(item.as_str()));
        }
        for item in &arr[n..k] {
            prop_assert_eq!(item, &Value::from(""));
        }
        prop_assert_eq!(&arr[k], &Value::from("v"));
    }

    /// Property: top-level keys other than the edited one are untouched.
    #[test]
    fn prop_siblings_preserved(mut record in arb_record(), raw in arb_path(), value in arb_scalar()) {
        let before = record.clone();
        let path = parse(&raw).unwrap();
        let head = path.steps()[0].as_key().unwrap().to_string();
        apply(&mut record, path.steps(), value.into_value());
        for (key, val) in before.as_object().unwrap() {
            if *key != head {
                prop_assert_eq!(record.get(key), Some(val));
            }
        }
    }

    /// Property: a batch containing a malformed path changes no record.
    #[test]
    fn prop_malformed_path_changes_nothing(
        first in arb_record(),
        second in arb_record(),
        good in arb_path(),
        bad in arb_path(),
        junk in arb_junk(),
    ) {
        let mut store: MemoryRecordStore =
            [("r1", first.clone()), ("r2", second.clone())].into_iter().collect();
        let mut batch = EditBatch::new();
        batch.edit("r1", good, "x").edit("r2", format!("{bad}{junk}"), "y");

        let err = commit_batch(&mut store, &StructuralValidator::default(), &batch, strict());
        prop_assert!(err.is_err());
        prop_assert_eq!(store.get("r1").unwrap(), first);
        prop_assert_eq!(store.get("r2").unwrap(), second);
    }

    /// Property: a missing record anywhere in the batch leaves every record
    /// as it was.
    #[test]
    fn prop_missing_record_is_all_or_nothing(
        record in arb_record(),
        edits in prop::collection::vec((arb_path(), arb_scalar()), 1..5),
        missing_first in any::<bool>(),
    ) {
        let mut store: MemoryRecordStore = [("present", record.clone())].into_iter().collect();
        let mut batch = EditBatch::new();
        if missing_first {
            batch.edit("absent", "a", "b");
        }
        for (path, value) in edits {
            batch.edit("present", path, value);
        }
        if !missing_first {
            batch.edit("absent", "a", "b");
        }

        let err = commit_batch(&mut store, &StructuralValidator::default(), &batch, strict());
        prop_assert!(err.is_err());
        prop_assert_eq!(store.get("present").unwrap(), record);
    }
}
