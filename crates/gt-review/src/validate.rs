//! Post-edit structural validation of records.

use serde_json::Value;

/// Checks a fully edited record before it is persisted.
pub trait RecordValidator {
    /// Returns a human-readable reason on failure.
    fn validate(&self, id: &str, record: &Value) -> Result<(), String>;
}

/// Built-in structural checks.
///
/// Always checks that the record serializes. Optionally requires an object
/// root and bounds nesting depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralValidator {
    pub require_object_root: bool,
    pub max_depth: Option<usize>,
}

impl Default for StructuralValidator {
    fn default() -> Self {
        Self { require_object_root: true, max_depth: None }
    }
}

impl RecordValidator for StructuralValidator {
    fn validate(&self, _id: &str, record: &Value) -> Result<(), String> {
        serde_json::to_vec(record).map_err(|e| format!("record does not serialize: {e}"))?;
        if self.require_object_root && !record.is_object() {
            return Err("record root must be an object".to_string());
        }
        if let Some(max) = self.max_depth {
            let depth = depth(record);
            if depth > max {
                return Err(format!("record nesting depth {depth} exceeds {max}"));
            }
        }
        Ok(())
    }
}

/// Nesting depth; scalars are depth 0, `{}` and `[]` are depth 1.
pub fn depth(val: &Value) -> usize {
    let mut max = 0;
    let mut stack = vec![(val, 0usize)];
    while let Some((node, d)) = stack.pop() {
        match node {
            Value::Object(map) => {
                max = max.max(d + 1);
                stack.extend(map.values().map(|v| (v, d + 1)));
            }
            Value::Array(arr) => {
                max = max.max(d + 1);
                stack.extend(arr.iter().map(|v| (v, d + 1)));
            }
            _ => {}
        }
    }
    max
}

/// Adapts a closure, e.g. a host-side schema check.
pub struct FnValidator<F>(pub F);

impl<F> RecordValidator for FnValidator<F>
where
    F: Fn(&str, &Value) -> Result<(), String>,
{
    fn validate(&self, id: &str, record: &Value) -> Result<(), String> {
        (self.0)(id, record)
    }
}

/// Runs each validator in order, stopping at the first failure.
impl<A: RecordValidator, B: RecordValidator> RecordValidator for (A, B) {
    fn validate(&self, id: &str, record: &Value) -> Result<(), String> {
        self.0.validate(id, record)?;
        self.1.validate(id, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_depth() {
        assert_eq!(depth(&json!(1)), 0);
        assert_eq!(depth(&json!({})), 1);
        assert_eq!(depth(&json!({"a": [1, {"b": []}]})), 4);
    }

    #[test]
    fn test_structural_default() {
        let v = StructuralValidator::default();
        assert!(v.validate("r", &json!({"a": [1, 2]})).is_ok());
        assert_eq!(
            v.validate("r", &json!([1])).unwrap_err(),
            "record root must be an object"
        );
    }

    #[test]
    fn test_structural_max_depth() {
        let v = StructuralValidator { require_object_root: false, max_depth: Some(2) };
        assert!(v.validate("r", &json!({"a": {"b": 1}})).is_ok());
        assert!(v
            .validate("r", &json!({"a": {"b": {"c": 1}}}))
            .unwrap_err()
            .contains("depth 3 exceeds 2"));
        assert!(v.validate("r", &json!("scalar")).is_ok());
    }

    #[test]
    fn test_fn_validator_and_chain() {
        let needs_title = FnValidator(|id: &str, rec: &Value| {
            if rec.get("title").is_some() {
                Ok(())
            } else {
                Err(format!("{id} has no title"))
            }
        });
        let chain = (StructuralValidator::default(), needs_title);
        assert!(chain.validate("r1", &json!({"title": "x"})).is_ok());
        assert_eq!(chain.validate("r1", &json!({})).unwrap_err(), "r1 has no title");
        assert_eq!(
            chain.validate("r1", &json!(null)).unwrap_err(),
            "record root must be an object"
        );
    }
}
