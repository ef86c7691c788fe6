//! gt-review: patch-and-regenerate pipeline for reviewed ground-truth
//! records.
//!
//! A reviewer submits an [`EditBatch`]: for each record ID, a map from
//! dotted field path (`artwork.tags[2]`) to a new scalar value. The batch is
//! committed all-or-nothing against a [`RecordStore`], then a
//! [`MetricsEngine`] rebuilds the derived artifact, which is published
//! atomically.
//!
//! ```
//! use gt_review::{commit_batch, CommitOptions, EditBatch, MemoryRecordStore, RecordStore};
//! use gt_review::StructuralValidator;
//! use serde_json::json;
//!
//! let mut store: MemoryRecordStore =
//!     [("img001", json!({"artwork": {"title": "Untitled"}}))].into_iter().collect();
//! let mut batch = EditBatch::new();
//! batch.edit("img001", "artwork.title", "The Starry Night").edit("img001", "artwork.tags[1]", "sky");
//!
//! let opts = CommitOptions { validate: true, ..Default::default() };
//! let report = commit_batch(&mut store, &StructuralValidator::default(), &batch, opts).unwrap();
//! assert_eq!(report.committed, vec!["img001"]);
//! assert_eq!(
//!     store.get("img001").unwrap(),
//!     json!({"artwork": {"title": "The Starry Night", "tags": ["", "sky"]}})
//! );
//! ```

pub mod batch;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod mutate;
pub mod pipeline;
pub mod regen;
pub mod review_cli;
pub mod store;
pub mod validate;

pub use batch::{EditBatch, EditValue, ReviewRequest};
pub use config::{ConfigError, ReviewConfig};
pub use coordinator::{commit_batch, BatchReport, CommitOptions, FailurePolicy, RecordCoercion};
pub use error::{BatchError, ReviewError};
pub use mutate::{apply, Coercion, MutationOutcome};
pub use pipeline::{ReviewPipeline, Submitted};
pub use regen::{
    ArtifactPublisher, CancelHandle, CommandEngine, Deadline, EngineOutput, FilePublisher,
    FnEngine, MemoryPublisher, MetricsEngine, PublishError, RegenerationError,
    RegenerationTrigger, Regenerated,
};
pub use store::{FileRecordStore, MemoryRecordStore, RecordStore, StoreError};
pub use validate::{FnValidator, RecordValidator, StructuralValidator};
