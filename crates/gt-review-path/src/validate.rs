//! Grammar validation for field paths.
//!
//! The accepted language is exactly
//!
//! ```text
//! path    = segment ("." segment)*
//! segment = name ("[" digits "]")?
//! name    = [A-Za-z0-9_]+
//! digits  = [0-9]+
//! ```
//!
//! There is no escaping and no wildcard form; anything outside the grammar is
//! rejected as a whole, never partially resolved.

use thiserror::Error;

use crate::types::{FieldPath, Step};

/// Maximum allowed raw path length, in bytes.
pub const MAX_PATH_LENGTH: usize = 1024;

/// Maximum allowed number of resolved steps.
pub const MAX_PATH_DEPTH: usize = 256;

/// Why a raw path was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathErrorKind {
    #[error("path is empty")]
    EmptyPath,
    #[error("empty segment (leading, trailing or doubled dot)")]
    EmptySegment,
    #[error("unexpected character {0:?}")]
    UnexpectedCharacter(char),
    #[error("unbalanced bracket")]
    UnbalancedBracket,
    #[error("array index is not numeric")]
    NonNumericIndex,
    #[error("array index does not fit in usize")]
    IndexOverflow,
    #[error("path exceeds {MAX_PATH_LENGTH} bytes")]
    PathTooLong,
    #[error("path exceeds {MAX_PATH_DEPTH} steps")]
    PathTooDeep,
}

/// A malformed field path, with the byte offset where scanning stopped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed field path {path:?} at byte {offset}: {kind}")]
pub struct PathError {
    pub path: String,
    pub offset: usize,
    pub kind: PathErrorKind,
}

impl PathError {
    pub(crate) fn new(path: &str, offset: usize, kind: PathErrorKind) -> Self {
        Self { path: path.to_string(), offset, kind }
    }
}

/// Returns true if `name` is a valid segment name (`[A-Za-z0-9_]+`).
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_name_byte)
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Check a raw path against the grammar without keeping the result.
///
/// # Example
///
/// ```
/// use gt_review_path::validate_field_path;
///
/// validate_field_path("artwork.history.provenance[2]").unwrap();
/// validate_field_path("a..b").unwrap_err();
/// ```
pub fn validate_field_path(raw: &str) -> Result<(), PathError> {
    scan(raw).map(|_| ())
}

/// Scan a raw path into steps.
pub(crate) fn scan(raw: &str) -> Result<FieldPath, PathError> {
    if raw.is_empty() {
        return Err(PathError::new(raw, 0, PathErrorKind::EmptyPath));
    }
    if raw.len() > MAX_PATH_LENGTH {
        return Err(PathError::new(raw, MAX_PATH_LENGTH, PathErrorKind::PathTooLong));
    }

    let bytes = raw.as_bytes();
    let mut steps = Vec::new();
    let mut pos = 0;

    loop {
        // ── name ──
        let start = pos;
        while pos < bytes.len() && is_name_byte(bytes[pos]) {
            pos += 1;
        }
        if pos == start {
            let kind = match bytes.get(pos) {
                None | Some(b'.') | Some(b'[') => PathErrorKind::EmptySegment,
                Some(b']') => PathErrorKind::UnbalancedBracket,
                Some(_) => PathErrorKind::UnexpectedCharacter(char_at(raw, pos)),
            };
            return Err(PathError::new(raw, pos, kind));
        }
        steps.push(Step::Key(raw[start..pos].to_string()));

        // ── optional [digits] ──
        if bytes.get(pos) == Some(&b'[') {
            pos += 1;
            let digits_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos == digits_start {
                let kind = match bytes.get(pos) {
                    None => PathErrorKind::UnbalancedBracket,
                    Some(_) => PathErrorKind::NonNumericIndex,
                };
                return Err(PathError::new(raw, pos, kind));
            }
            match bytes.get(pos) {
                Some(b']') => {}
                None => return Err(PathError::new(raw, pos, PathErrorKind::UnbalancedBracket)),
                Some(_) => return Err(PathError::new(raw, pos, PathErrorKind::NonNumericIndex)),
            }
            let index: usize = raw[digits_start..pos]
                .parse()
                .map_err(|_| PathError::new(raw, digits_start, PathErrorKind::IndexOverflow))?;
            steps.push(Step::Index(index));
            pos += 1;
        }

        if steps.len() > MAX_PATH_DEPTH {
            return Err(PathError::new(raw, pos, PathErrorKind::PathTooDeep));
        }

        // ── separator ──
        match bytes.get(pos) {
            None => break,
            Some(b'.') => {
                pos += 1;
                if pos == bytes.len() {
                    return Err(PathError::new(raw, pos, PathErrorKind::EmptySegment));
                }
            }
            Some(b'[') | Some(b']') => {
                return Err(PathError::new(raw, pos, PathErrorKind::UnbalancedBracket))
            }
            Some(_) => {
                return Err(PathError::new(
                    raw,
                    pos,
                    PathErrorKind::UnexpectedCharacter(char_at(raw, pos)),
                ))
            }
        }
    }

    Ok(FieldPath { steps })
}

fn char_at(raw: &str, pos: usize) -> char {
    raw[pos..].chars().next().unwrap_or('\u{fffd}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(raw: &str) -> PathErrorKind {
        scan(raw).unwrap_err().kind
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("title"));
        assert!(is_valid_name("date_1962"));
        assert!(is_valid_name("_"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("a-b"));
        assert!(!is_valid_name("a.b"));
        assert!(!is_valid_name("café"));
    }

    #[test]
    fn test_empty_segments() {
        assert_eq!(kind(""), PathErrorKind::EmptyPath);
        assert_eq!(kind(".a"), PathErrorKind::EmptySegment);
        assert_eq!(kind("a."), PathErrorKind::EmptySegment);
        assert_eq!(kind("a..b"), PathErrorKind::EmptySegment);
        assert_eq!(kind("[0]"), PathErrorKind::EmptySegment);
        assert_eq!(kind("a.[0]"), PathErrorKind::EmptySegment);
    }

    #[test]
    fn test_brackets() {
        assert_eq!(kind("a["), PathErrorKind::UnbalancedBracket);
        assert_eq!(kind("a[1"), PathErrorKind::UnbalancedBracket);
        assert_eq!(kind("a]"), PathErrorKind::UnbalancedBracket);
        assert_eq!(kind("a[1]]"), PathErrorKind::UnbalancedBracket);
        assert_eq!(kind("a[1][2]"), PathErrorKind::UnbalancedBracket);
        assert_eq!(kind("]"), PathErrorKind::UnbalancedBracket);
    }

    #[test]
    fn test_non_numeric_index() {
        assert_eq!(kind("a[x]"), PathErrorKind::NonNumericIndex);
        assert_eq!(kind("a[]"), PathErrorKind::NonNumericIndex);
        assert_eq!(kind("a[-1]"), PathErrorKind::NonNumericIndex);
        assert_eq!(kind("a[1x]"), PathErrorKind::NonNumericIndex);
        assert_eq!(kind("a[ 1]"), PathErrorKind::NonNumericIndex);
    }

    #[test]
    fn test_unexpected_characters() {
        assert_eq!(kind("a b"), PathErrorKind::UnexpectedCharacter(' '));
        assert_eq!(kind("a/b"), PathErrorKind::UnexpectedCharacter('/'));
        assert_eq!(kind("café"), PathErrorKind::UnexpectedCharacter('é'));
        assert_eq!(kind("a[0]b"), PathErrorKind::UnexpectedCharacter('b'));
    }

    #[test]
    fn test_index_overflow() {
        let raw = format!("a[{}0]", usize::MAX);
        assert_eq!(kind(&raw), PathErrorKind::IndexOverflow);
    }

    #[test]
    fn test_limits() {
        let long = "a".repeat(MAX_PATH_LENGTH + 1);
        assert_eq!(kind(&long), PathErrorKind::PathTooLong);

        let deep = vec!["a"; MAX_PATH_DEPTH + 1].join(".");
        assert_eq!(kind(&deep), PathErrorKind::PathTooDeep);

        let max = vec!["a"; MAX_PATH_DEPTH].join(".");
        assert!(scan(&max).is_ok());
    }

    #[test]
    fn test_error_offset_and_message() {
        let err = scan("artwork..title").unwrap_err();
        assert_eq!(err.offset, 8);
        assert_eq!(err.path, "artwork..title");
        assert!(err.to_string().contains("artwork..title"));
        assert!(err.to_string().contains("empty segment"));
    }
}
