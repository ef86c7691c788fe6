//! The patch-and-regenerate pipeline: commit a batch, then republish the
//! derived artifact.

use std::time::Duration;

use tracing::info;

use crate::batch::EditBatch;
use crate::coordinator::{commit_batch, BatchReport, CommitOptions, FailurePolicy};
use crate::error::ReviewError;
use crate::regen::{
    ArtifactPublisher, CancelHandle, MetricsEngine, RegenerationError, RegenerationTrigger,
    Regenerated,
};
use crate::store::RecordStore;
use crate::validate::RecordValidator;

/// A committed batch plus the regeneration that followed it.
#[derive(Debug)]
pub struct Submitted {
    pub report: BatchReport,
    /// `None` when nothing was committed, so nothing was regenerated.
    pub regenerated: Option<Regenerated>,
}

/// Owns a record store handle and the collaborators a batch flows through.
///
/// Calls take `&mut self`, so one pipeline value runs one batch at a time.
/// Hosts sharing a store between pipelines must serialize batches
/// themselves.
pub struct ReviewPipeline<S, V, E, P> {
    store: S,
    validator: V,
    engine: E,
    publisher: P,
    trigger: RegenerationTrigger,
    policy: FailurePolicy,
    cancel: CancelHandle,
}

impl<S, V, E, P> ReviewPipeline<S, V, E, P>
where
    S: RecordStore,
    V: RecordValidator,
    E: MetricsEngine,
    P: ArtifactPublisher,
{
    pub fn new(store: S, validator: V, engine: E, publisher: P) -> Self {
        Self {
            store,
            validator,
            engine,
            publisher,
            trigger: RegenerationTrigger::default(),
            policy: FailurePolicy::default(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound each regeneration; `None` waits for the engine indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.trigger.timeout = timeout;
        self
    }

    pub fn with_json_artifact_check(mut self, require_json: bool) -> Self {
        self.trigger.require_json = require_json;
        self
    }

    /// Handle another thread can use to cancel a running regeneration.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Commit `batch` and, if anything was written, regenerate.
    ///
    /// # Errors
    ///
    /// [`ReviewError::Batch`] when the batch aborted: no regeneration ran.
    /// [`ReviewError::Regeneration`] when edits were committed but the
    /// artifact could not be rebuilt; call [`Self::regenerate`] to retry.
    pub fn submit(&mut self, batch: &EditBatch, validate: bool) -> Result<Submitted, ReviewError> {
        let opts = CommitOptions { validate, policy: self.policy };
        let report = commit_batch(&mut self.store, &self.validator, batch, opts)?;
        if report.committed.is_empty() {
            info!("nothing committed; skipping regeneration");
            return Ok(Submitted { report, regenerated: None });
        }
        match self.regenerate() {
            Ok(done) => Ok(Submitted { report, regenerated: Some(done) }),
            Err(source) => Err(ReviewError::Regeneration { report: Box::new(report), source }),
        }
    }

    /// Regenerate and publish the artifact from the current record set.
    pub fn regenerate(&self) -> Result<Regenerated, RegenerationError> {
        self.trigger.regenerate(&self.engine, &self.publisher, &self.cancel)
    }
}
