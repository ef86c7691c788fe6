//! Type definitions for field paths.

use std::fmt;

/// One structural step of a resolved field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// Named member of an object container.
    Key(String),
    /// Positional element of an array container.
    Index(usize),
}

impl Step {
    /// Returns true for a named (object) step.
    pub fn is_key(&self) -> bool {
        matches!(self, Step::Key(_))
    }

    /// Returns true for an indexed (array) step.
    pub fn is_index(&self) -> bool {
        matches!(self, Step::Index(_))
    }

    /// The member name, if this is a named step.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Step::Key(name) => Some(name),
            Step::Index(_) => None,
        }
    }

    /// The element index, if this is an indexed step.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Step::Key(_) => None,
            Step::Index(idx) => Some(*idx),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Key(name) => f.write_str(name),
            Step::Index(idx) => write!(f, "[{idx}]"),
        }
    }
}

/// A parsed, validated field path.
///
/// Always starts with a [`Step::Key`] and never holds two consecutive
/// [`Step::Index`] steps, mirroring the wire grammar
/// `segment("."segment)*` with `segment = name("["digits"]")?`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub(crate) steps: Vec<Step>,
}

impl FieldPath {
    /// All steps, root first.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Consumes the path, returning its steps.
    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }

    /// The step that identifies the leaf.
    pub fn leaf(&self) -> &Step {
        // Construction guarantees at least one step.
        &self.steps[self.steps.len() - 1]
    }

    /// The steps that identify containers leading to the leaf.
    pub fn containers(&self) -> &[Step] {
        &self.steps[..self.steps.len() - 1]
    }

    /// Number of steps.
    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the leaf is an array element.
    pub fn is_indexed_leaf(&self) -> bool {
        self.leaf().is_index()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 && step.is_key() {
                f.write_str(".")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}
