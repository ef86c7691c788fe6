//! Patch batch coordination: resolve, stage, validate and commit an
//! [`EditBatch`] against a [`RecordStore`].
//!
//! A batch runs in three passes:
//!
//! 1. **Resolve** every record ID and field path. Nothing is loaded yet.
//! 2. **Stage** each record: load it, apply its edits in order, validate.
//! 3. **Commit** each staged record as a wholesale replacement.
//!
//! Under [`FailurePolicy::AllOrNothing`] the first failure in passes 1–2
//! aborts the batch before any write, and a write failure in pass 3 restores
//! the records already written in this batch. Callers must not run two
//! batches against the same store concurrently.

use gt_review_path::{parse, FieldPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, info_span, warn};

use crate::batch::{EditBatch, EditValue};
use crate::error::{BatchError, Stage};
use crate::mutate::{apply, Coercion};
use crate::store::{validate_record_id, RecordStore, StoreError};
use crate::validate::RecordValidator;

/// What to do when one record of a multi-record batch fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort the whole batch; no record is written.
    #[default]
    AllOrNothing,
    /// Skip failing records and commit the rest.
    PerRecord,
}

/// Per-call options for [`commit_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Run the validator on each record before persisting it.
    pub validate: bool,
    pub policy: FailurePolicy,
}

/// A coercion that happened while editing a specific record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCoercion {
    pub record: String,
    pub path: String,
    pub coercion: Coercion,
}

/// Result of a batch that was not aborted.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Records written, in batch order.
    pub committed: Vec<String>,
    /// Records skipped under [`FailurePolicy::PerRecord`].
    pub failed: Vec<BatchError>,
    pub edits_applied: usize,
    pub coercions: Vec<RecordCoercion>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct ResolvedEdit {
    raw: String,
    path: FieldPath,
    value: EditValue,
}

struct RecordPlan<'b> {
    id: &'b str,
    edits: Vec<ResolvedEdit>,
}

struct StagedRecord<'b> {
    id: &'b str,
    original: Value,
    updated: Value,
    edits: usize,
    coercions: Vec<RecordCoercion>,
}

/// Apply `batch` to `store`.
///
/// # Errors
///
/// * [`BatchError::EmptyBatch`] if the batch holds no edits.
/// * Under [`FailurePolicy::AllOrNothing`], the first record-level failure:
///   [`BatchError::InvalidRecordId`], [`BatchError::MalformedPath`],
///   [`BatchError::RecordNotFound`], [`BatchError::Validation`] or
///   [`BatchError::Store`]. The store is left as it was before the call
///   unless a rollback write also failed, which the error lists.
///
/// Under [`FailurePolicy::PerRecord`] record-level failures are collected in
/// [`BatchReport::failed`] instead.
pub fn commit_batch<S, V>(
    store: &mut S,
    validator: &V,
    batch: &EditBatch,
    opts: CommitOptions,
) -> Result<BatchReport, BatchError>
where
    S: RecordStore + ?Sized,
    V: RecordValidator + ?Sized,
{
    if batch.is_empty() {
        return Err(BatchError::EmptyBatch);
    }
    let span = info_span!(
        "commit_batch",
        records = batch.record_count(),
        edits = batch.edit_count(),
        validate = opts.validate,
        policy = ?opts.policy,
    );
    let _guard = span.enter();

    let mut report = BatchReport::default();
    let all_or_nothing = opts.policy == FailurePolicy::AllOrNothing;

    // ── resolve ──
    let mut plans = Vec::with_capacity(batch.record_count());
    for (id, edits) in batch.records() {
        if edits.is_empty() {
            debug!(record = id, "no edits, skipping");
            continue;
        }
        match resolve_record(id, edits.iter()) {
            Ok(plan) => plans.push(plan),
            Err(e) if all_or_nothing => return Err(e),
            Err(e) => {
                warn!(record = id, error = %e, "record skipped");
                report.failed.push(e);
            }
        }
    }

    // ── stage ──
    let mut staged = Vec::with_capacity(plans.len());
    for plan in plans {
        match stage_record(store, validator, plan, opts.validate) {
            Ok(record) => staged.push(record),
            Err(e) if all_or_nothing => return Err(e),
            Err(e) => {
                warn!(error = %e, "record skipped");
                report.failed.push(e);
            }
        }
    }

    // ── commit ──
    let mut written: Vec<&StagedRecord<'_>> = Vec::with_capacity(staged.len());
    for record in &staged {
        if let Err(source) = store.put(record.id, &record.updated) {
            let err = BatchError::Store {
                record: record.id.to_string(),
                stage: Stage::Persist,
                source,
                rollback_failures: Vec::new(),
            };
            if all_or_nothing {
                return Err(with_rollback(store, &written, err));
            }
            warn!(error = %err, "record skipped");
            report.failed.push(err);
            continue;
        }
        info!(record = record.id, edits = record.edits, "record committed");
        written.push(record);
    }

    for record in written {
        report.committed.push(record.id.to_string());
        report.edits_applied += record.edits;
        report.coercions.extend(record.coercions.iter().cloned());
    }
    info!(
        committed = report.committed.len(),
        failed = report.failed.len(),
        "batch finished"
    );
    Ok(report)
}

fn resolve_record<'b, 'e>(
    id: &'b str,
    edits: impl Iterator<Item = (&'e String, &'e EditValue)>,
) -> Result<RecordPlan<'b>, BatchError> {
    validate_record_id(id).map_err(|reason| BatchError::InvalidRecordId {
        record: id.to_string(),
        reason,
    })?;
    let edits = edits
        .map(|(raw, value)| {
            let path = parse(raw).map_err(|source| BatchError::MalformedPath {
                record: id.to_string(),
                source,
            })?;
            Ok(ResolvedEdit { raw: raw.clone(), path, value: value.clone() })
        })
        .collect::<Result<Vec<_>, BatchError>>()?;
    Ok(RecordPlan { id, edits })
}

fn stage_record<'b, S, V>(
    store: &S,
    validator: &V,
    plan: RecordPlan<'b>,
    validate: bool,
) -> Result<StagedRecord<'b>, BatchError>
where
    S: RecordStore + ?Sized,
    V: RecordValidator + ?Sized,
{
    let id = plan.id;
    let original = store.get(id).map_err(|source| match source {
        StoreError::NotFound(_) => BatchError::RecordNotFound { record: id.to_string() },
        source => BatchError::Store {
            record: id.to_string(),
            stage: Stage::Load,
            source,
            rollback_failures: Vec::new(),
        },
    })?;

    let mut updated = original.clone();
    let mut coercions = Vec::new();
    let edits = plan.edits.len();
    for edit in plan.edits {
        debug!(record = id, path = %edit.raw, "applying edit");
        let outcome = apply(&mut updated, edit.path.steps(), edit.value.into_value());
        for coercion in outcome.coercions {
            warn!(record = id, path = %edit.raw, %coercion, "coerced value to container");
            coercions.push(RecordCoercion {
                record: id.to_string(),
                path: edit.raw.clone(),
                coercion,
            });
        }
    }

    if validate {
        validator.validate(id, &updated).map_err(|reason| BatchError::Validation {
            record: id.to_string(),
            reason,
        })?;
    }

    Ok(StagedRecord { id, original, updated, edits, coercions })
}

/// Restore records already written by this batch, attaching any that could
/// not be restored to `err`.
fn with_rollback<S>(store: &mut S, written: &[&StagedRecord<'_>], mut err: BatchError) -> BatchError
where
    S: RecordStore + ?Sized,
{
    let mut failures = Vec::new();
    for record in written.iter().rev() {
        match store.put(record.id, &record.original) {
            Ok(()) => warn!(record = record.id, "rolled back"),
            Err(e) => {
                warn!(record = record.id, error = %e, "rollback failed");
                failures.push(record.id.to_string());
            }
        }
    }
    if let BatchError::Store { rollback_failures, .. } = &mut err {
        *rollback_failures = failures;
    }
    err
}
