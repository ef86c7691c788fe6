//! Document mutation: write one value at a resolved field path.
//!
//! Walking a path never fails. Missing containers are created, and a value of
//! the wrong kind sitting where a container is needed is replaced with an
//! empty container of the right kind. Every such replacement is reported back
//! as a [`Coercion`] so callers can surface it; it is never silent.

use std::fmt;

use gt_review_path::Step;
use serde_json::{Map, Value};

/// Filler written into array slots skipped over by an indexed write.
pub const PLACEHOLDER: &str = "";

// ── Kinds ─────────────────────────────────────────────────────────────────

/// Kind of container a step requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Object,
    Array,
}

impl ContainerKind {
    /// The container a step addresses into.
    pub fn for_step(step: &Step) -> Self {
        match step {
            Step::Key(_) => ContainerKind::Object,
            Step::Index(_) => ContainerKind::Array,
        }
    }

    fn empty(self) -> Value {
        match self {
            ContainerKind::Object => Value::Object(Map::new()),
            ContainerKind::Array => Value::Array(Vec::new()),
        }
    }

    fn matches(self, val: &Value) -> bool {
        match self {
            ContainerKind::Object => val.is_object(),
            ContainerKind::Array => val.is_array(),
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContainerKind::Object => "object",
            ContainerKind::Array => "array",
        })
    }
}

/// Kind of any tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(val: &Value) -> Self {
        match val {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        })
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────

/// A wrong-kind value that was replaced by an empty container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coercion {
    /// Steps from the root to the replaced node (empty for the root itself).
    pub at: Vec<Step>,
    pub expected: ContainerKind,
    pub found: ValueKind,
}

impl fmt::Display for Coercion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.at.is_empty() {
            write!(f, "root: {} replaced by empty {}", self.found, self.expected)
        } else {
            let at = gt_review_path::FieldPath::from_steps(self.at.clone())
                .map(|p| p.to_string())
                .unwrap_or_else(|_| format!("{:?}", self.at));
            write!(f, "{at}: {} replaced by empty {}", self.found, self.expected)
        }
    }
}

/// What one [`apply`] call changed besides the leaf itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    pub coercions: Vec<Coercion>,
    /// Containers created where nothing existed.
    pub created: usize,
    /// Placeholder entries appended ahead of an indexed write.
    pub placeholders: usize,
}

// ── Apply ─────────────────────────────────────────────────────────────────

/// Write `value` at `steps` inside `tree`.
///
/// Siblings of every visited node are left untouched. An indexed step past
/// the end of its array grows the array to exactly `index + 1`, filling the
/// gap with [`PLACEHOLDER`] strings. An empty step list replaces the whole
/// tree.
///
/// # Example
///
/// ```
/// use gt_review::mutate::apply;
/// use gt_review_path::parse;
/// use serde_json::json;
///
/// let mut doc = json!({"artwork": {"history": {"provenance": ["Acquired 1901"]}}});
/// let path = parse("artwork.history.provenance[2]").unwrap();
/// apply(&mut doc, path.steps(), json!("Sold 1962"));
/// assert_eq!(
///     doc,
///     json!({"artwork": {"history": {"provenance": ["Acquired 1901", "", "Sold 1962"]}}})
/// );
/// ```
pub fn apply(tree: &mut Value, steps: &[Step], value: Value) -> MutationOutcome {
    let mut outcome = MutationOutcome::default();
    let Some((leaf, containers)) = steps.split_last() else {
        *tree = value;
        return outcome;
    };

    coerce_if_needed(tree, ContainerKind::for_step(&steps[0]), &[], &mut outcome);

    let mut current = tree;
    for (depth, step) in containers.iter().enumerate() {
        let expected = ContainerKind::for_step(&steps[depth + 1]);
        let (slot, fresh) = child_slot(current, step, &mut outcome);
        if fresh {
            *slot = expected.empty();
            outcome.created += 1;
        } else {
            coerce_if_needed(slot, expected, &steps[..=depth], &mut outcome);
        }
        current = slot;
    }

    let (slot, _) = child_slot(current, leaf, &mut outcome);
    *slot = value;
    outcome
}

fn coerce_if_needed(
    node: &mut Value,
    expected: ContainerKind,
    at: &[Step],
    outcome: &mut MutationOutcome,
) {
    if expected.matches(node) {
        return;
    }
    outcome.coercions.push(Coercion {
        at: at.to_vec(),
        expected,
        found: ValueKind::of(node),
    });
    *node = expected.empty();
}

/// Borrow the child addressed by `step`, creating the slot if needed.
///
/// `parent` must already be the container kind `step` requires. Returns the
/// slot and whether it was created by this call.
fn child_slot<'a>(
    parent: &'a mut Value,
    step: &Step,
    outcome: &mut MutationOutcome,
) -> (&'a mut Value, bool) {
    match (step, parent) {
        (Step::Key(name), Value::Object(map)) => {
            let fresh = !map.contains_key(name);
            (map.entry(name.clone()).or_insert(Value::Null), fresh)
        }
        (Step::Index(idx), Value::Array(arr)) => {
            let fresh = *idx >= arr.len();
            if fresh {
                outcome.placeholders += *idx - arr.len();
                arr.resize(*idx + 1, Value::String(PLACEHOLDER.to_string()));
            }
            (&mut arr[*idx], fresh)
        }
        (step, parent) => {
            // Callers coerce before descending, so this only guards misuse.
            *parent = ContainerKind::for_step(step).empty();
            child_slot(parent, step, outcome)
        }
    }
}
