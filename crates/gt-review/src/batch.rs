//! Edit batches: the pending field edits of one review action.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// String a reviewer submits to clear a field.
pub const NULL_TOKEN: &str = "null";

/// A submitted field value.
///
/// `""`, [`NULL_TOKEN`] and JSON `null` all mean "clear this field" and are
/// stored as `null`. A field left out of the batch is left unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EditValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl EditValue {
    /// Returns true if this value clears the field.
    pub fn is_clear(&self) -> bool {
        match self {
            EditValue::Null => true,
            EditValue::String(s) => s.is_empty() || s == NULL_TOKEN,
            _ => false,
        }
    }

    /// The tree value this edit writes.
    pub fn into_value(self) -> Value {
        if self.is_clear() {
            return Value::Null;
        }
        match self {
            EditValue::Null => Value::Null,
            EditValue::Bool(b) => Value::Bool(b),
            EditValue::Number(n) => Value::Number(n),
            EditValue::String(s) => Value::String(s),
        }
    }
}

impl From<&str> for EditValue {
    fn from(s: &str) -> Self {
        EditValue::String(s.to_string())
    }
}

impl From<String> for EditValue {
    fn from(s: String) -> Self {
        EditValue::String(s)
    }
}

impl From<bool> for EditValue {
    fn from(b: bool) -> Self {
        EditValue::Bool(b)
    }
}

impl From<i64> for EditValue {
    fn from(n: i64) -> Self {
        EditValue::Number(n.into())
    }
}

impl From<i32> for EditValue {
    fn from(n: i32) -> Self {
        EditValue::Number(n.into())
    }
}

/// Edits to apply, grouped by record ID.
///
/// Both levels keep insertion order: records are processed in the order they
/// were added and edits within a record are applied in order, so a later edit
/// to the same path wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditBatch {
    records: IndexMap<String, IndexMap<String, EditValue>>,
}

impl EditBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one edit; chains for building batches inline.
    pub fn edit(
        &mut self,
        record: impl Into<String>,
        path: impl Into<String>,
        value: impl Into<EditValue>,
    ) -> &mut Self {
        self.records
            .entry(record.into())
            .or_default()
            .insert(path.into(), value.into());
        self
    }

    /// Record IDs with their edits, in batch order.
    pub fn records(&self) -> impl Iterator<Item = (&str, &IndexMap<String, EditValue>)> {
        self.records.iter().map(|(id, edits)| (id.as_str(), edits))
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Total number of field edits across all records.
    pub fn edit_count(&self) -> usize {
        self.records.values().map(IndexMap::len).sum()
    }

    /// A batch with no field edits at all.
    pub fn is_empty(&self) -> bool {
        self.edit_count() == 0
    }
}

/// Request body accepted by the review endpoint and the CLI.
///
/// ```json
/// {"updates": {"img001": {"artwork.title": "The Starry Night"}}, "validate": true}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub updates: EditBatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clear_values() {
        assert_eq!(EditValue::from("").into_value(), Value::Null);
        assert_eq!(EditValue::from(NULL_TOKEN).into_value(), Value::Null);
        assert_eq!(EditValue::Null.into_value(), Value::Null);
        assert_eq!(EditValue::from("NULL").into_value(), json!("NULL"));
        assert_eq!(EditValue::from(" ").into_value(), json!(" "));
    }

    #[test]
    fn test_scalar_values() {
        assert_eq!(EditValue::from("Sold 1962").into_value(), json!("Sold 1962"));
        assert_eq!(EditValue::from(false).into_value(), json!(false));
        assert_eq!(EditValue::from(1962).into_value(), json!(1962));
    }

    #[test]
    fn test_deserialize_request() {
        let req: ReviewRequest = serde_json::from_value(json!({
            "updates": {
                "img001": {"artwork.title": "The Starry Night", "year": 1889, "signed": true},
                "img002": {"notes": null}
            },
            "validate": true
        }))
        .unwrap();
        assert_eq!(req.validate, Some(true));
        assert_eq!(req.updates.record_count(), 2);
        assert_eq!(req.updates.edit_count(), 4);

        let ids: Vec<&str> = req.updates.records().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["img001", "img002"]);

        let (_, edits) = req.updates.records().next().unwrap();
        assert_eq!(edits["year"], EditValue::Number(1889.into()));
        assert_eq!(edits["signed"], EditValue::Bool(true));
    }

    #[test]
    fn test_validate_flag_optional() {
        let req: ReviewRequest =
            serde_json::from_value(json!({"updates": {"a": {"b": "c"}}})).unwrap();
        assert_eq!(req.validate, None);
    }

    #[test]
    fn test_rejects_structured_values() {
        let res: Result<ReviewRequest, _> =
            serde_json::from_value(json!({"updates": {"a": {"b": {"nested": 1}}}}));
        assert!(res.is_err());
        let res: Result<ReviewRequest, _> =
            serde_json::from_value(json!({"updates": {"a": {"b": [1]}}}));
        assert!(res.is_err());
    }

    #[test]
    fn test_builder_order_and_override() {
        let mut batch = EditBatch::new();
        batch
            .edit("r1", "a", "first")
            .edit("r2", "b", "x")
            .edit("r1", "a", "second");
        assert_eq!(batch.record_count(), 2);
        assert_eq!(batch.edit_count(), 2);
        let (_, edits) = batch.records().next().unwrap();
        assert_eq!(edits["a"], EditValue::from("second"));
    }

    #[test]
    fn test_empty() {
        assert!(EditBatch::new().is_empty());
        let batch: EditBatch = serde_json::from_value(json!({"r1": {}})).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.record_count(), 1);
    }
}
