//! Error types for the review pipeline.
//!
//! Batch errors and regeneration errors are kept apart: a batch error means
//! nothing from the failing stage was written, while a regeneration error
//! means the record edits are already durable and only the derived artifact
//! is stale.

use std::fmt;

use gt_review_path::PathError;
use thiserror::Error;

use crate::coordinator::BatchReport;
use crate::regen::RegenerationError;
use crate::store::StoreError;

/// Point in a record's commit where a store call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Load => "loading",
            Stage::Persist => "persisting",
        })
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no updates provided")]
    EmptyBatch,

    #[error("invalid record id {record:?}: {reason}")]
    InvalidRecordId { record: String, reason: &'static str },

    #[error("record {record:?}: {source}")]
    MalformedPath {
        record: String,
        #[source]
        source: PathError,
    },

    #[error("record {record:?} not found")]
    RecordNotFound { record: String },

    #[error("record {record:?} failed validation: {reason}")]
    Validation { record: String, reason: String },

    #[error("record {record:?}: store failed while {stage}: {source}{}", rollback_note(.rollback_failures))]
    Store {
        record: String,
        stage: Stage,
        #[source]
        source: StoreError,
        /// Records written earlier in the batch that could not be restored.
        rollback_failures: Vec<String>,
    },
}

fn rollback_note(failures: &[String]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(" (rollback failed for: {})", failures.join(", "))
    }
}

impl BatchError {
    /// The record this error is about, if any.
    pub fn record(&self) -> Option<&str> {
        match self {
            BatchError::EmptyBatch => None,
            BatchError::InvalidRecordId { record, .. }
            | BatchError::MalformedPath { record, .. }
            | BatchError::RecordNotFound { record }
            | BatchError::Validation { record, .. }
            | BatchError::Store { record, .. } => Some(record),
        }
    }

    /// The offending raw field path, for [`BatchError::MalformedPath`].
    pub fn path(&self) -> Option<&str> {
        match self {
            BatchError::MalformedPath { source, .. } => Some(&source.path),
            _ => None,
        }
    }
}

/// Outcome of a full submit: commit, then regenerate.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Records in `report.committed` are durable; retry regeneration alone.
    #[error("edits committed for {} record(s) but regeneration failed: {source}", .report.committed.len())]
    Regeneration {
        report: Box<BatchReport>,
        #[source]
        source: RegenerationError,
    },
}
