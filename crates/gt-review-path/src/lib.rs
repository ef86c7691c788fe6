//! Field paths for ground-truth records.
//!
//! A field path addresses one leaf inside a nested record, e.g.
//! `artwork.history.provenance[2]`. Paths are machine-generated from a known
//! address space, so the grammar is deliberately small and strict.
//!
//! # Example
//!
//! ```
//! use gt_review_path::{get, parse, Step};
//! use serde_json::json;
//!
//! let path = parse("artwork.history.provenance[1]").unwrap();
//! assert_eq!(path.leaf(), &Step::Index(1));
//!
//! let doc = json!({"artwork": {"history": {"provenance": ["Acquired 1901", "Sold 1962"]}}});
//! assert_eq!(get(&doc, path.steps()), Some(&json!("Sold 1962")));
//! ```

use std::str::FromStr;

use serde_json::Value;

pub mod types;
pub use types::{FieldPath, Step};

pub mod validate;
pub use validate::{
    is_valid_name, validate_field_path, PathError, PathErrorKind, MAX_PATH_DEPTH, MAX_PATH_LENGTH,
};

/// Parse a raw field path into steps.
///
/// A segment `name[n]` yields `Step::Key(name), Step::Index(n)`.
///
/// # Errors
///
/// Returns a [`PathError`] for anything outside the grammar; no partial
/// result is ever produced.
///
/// # Example
///
/// ```
/// use gt_review_path::{parse, Step};
///
/// let path = parse("people[0].name").unwrap();
/// assert_eq!(
///     path.steps(),
///     &[Step::Key("people".into()), Step::Index(0), Step::Key("name".into())]
/// );
/// assert!(parse("a[x]").is_err());
/// ```
pub fn parse(raw: &str) -> Result<FieldPath, PathError> {
    validate::scan(raw)
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl FieldPath {
    /// Build a path from steps, checking the same structural rules the
    /// grammar enforces.
    ///
    /// # Errors
    ///
    /// Fails if the step list is empty, does not start with a named step,
    /// holds two consecutive indexed steps, or names a key outside
    /// `[A-Za-z0-9_]+`.
    pub fn from_steps(steps: Vec<Step>) -> Result<Self, PathError> {
        let candidate = FieldPath { steps };
        let formatted = candidate.to_string();
        let fail = |offset, kind| Err(PathError::new(&formatted, offset, kind));

        // Offsets are byte positions in the formatted path.
        let mut offset = 0;
        let mut prev: Option<&Step> = None;
        for step in &candidate.steps {
            match step {
                Step::Key(name) => {
                    if prev.is_some() {
                        offset += 1;
                    }
                    if name.is_empty() {
                        return fail(offset, PathErrorKind::EmptySegment);
                    }
                    if let Some((at, c)) =
                        name.char_indices().find(|&(_, c)| !(c.is_ascii_alphanumeric() || c == '_'))
                    {
                        return fail(offset + at, PathErrorKind::UnexpectedCharacter(c));
                    }
                }
                Step::Index(_) => {
                    if !matches!(prev, Some(Step::Key(_))) {
                        return fail(offset, PathErrorKind::UnexpectedCharacter('['));
                    }
                }
            }
            offset += step.to_string().len();
            prev = Some(step);
        }
        if prev.is_none() {
            return fail(0, PathErrorKind::EmptyPath);
        }
        // Structure is sound; the scanner still applies the length and depth limits.
        parse(&formatted)?;
        Ok(candidate)
    }
}

/// Get the value addressed by `steps`.
///
/// Returns `None` when any step is absent or lands on the wrong container
/// kind.
pub fn get<'a>(val: &'a Value, steps: &[Step]) -> Option<&'a Value> {
    let mut current = val;
    for step in steps {
        current = match (step, current) {
            (Step::Key(name), Value::Object(map)) => map.get(name)?,
            (Step::Index(idx), Value::Array(arr)) => arr.get(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Mutable counterpart of [`get`].
pub fn get_mut<'a>(val: &'a mut Value, steps: &[Step]) -> Option<&'a mut Value> {
    let mut current = val;
    for step in steps {
        current = match (step, current) {
            (Step::Key(name), Value::Object(map)) => map.get_mut(name)?,
            (Step::Index(idx), Value::Array(arr)) => arr.get_mut(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Parse `raw` and read the value it addresses.
///
/// # Errors
///
/// Returns a [`PathError`] if `raw` is malformed.
pub fn get_by_path<'a>(val: &'a Value, raw: &str) -> Result<Option<&'a Value>, PathError> {
    let path = parse(raw)?;
    Ok(get(val, path.steps()))
}

/// Enumerate every addressable leaf of an object-rooted record.
///
/// Objects are descended into; array elements become indexed steps. Empty
/// arrays, scalars and nulls are leaves. Arrays nested directly inside
/// arrays cannot be addressed below the outer index and are reported as a
/// single leaf. Keys outside the name grammar are skipped.
///
/// # Example
///
/// ```
/// use gt_review_path::leaf_paths;
/// use serde_json::json;
///
/// let doc = json!({"title": "x", "tags": ["a", "b"], "meta": {"year": 1962}});
/// let paths: Vec<String> = leaf_paths(&doc).iter().map(ToString::to_string).collect();
/// assert_eq!(paths, vec!["title", "tags[0]", "tags[1]", "meta.year"]);
/// ```
pub fn leaf_paths(val: &Value) -> Vec<FieldPath> {
    let mut out = Vec::new();
    if let Value::Object(map) = val {
        let mut stack = Vec::new();
        for (key, child) in map {
            walk_member(key, child, &mut stack, &mut out);
        }
    }
    out
}

fn walk_member(key: &str, val: &Value, stack: &mut Vec<Step>, out: &mut Vec<FieldPath>) {
    if !is_valid_name(key) || stack.len() >= MAX_PATH_DEPTH {
        return;
    }
    stack.push(Step::Key(key.to_string()));
    match val {
        Value::Object(map) => {
            for (k, child) in map {
                walk_member(k, child, stack, out);
            }
        }
        Value::Array(arr) if !arr.is_empty() => {
            for (idx, elem) in arr.iter().enumerate() {
                stack.push(Step::Index(idx));
                match elem {
                    Value::Object(map) => {
                        for (k, child) in map {
                            walk_member(k, child, stack, out);
                        }
                    }
                    _ => out.push(FieldPath { steps: stack.clone() }),
                }
                stack.pop();
            }
        }
        _ => out.push(FieldPath { steps: stack.clone() }),
    }
    stack.pop();
}
