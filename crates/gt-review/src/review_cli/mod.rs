//! `gt-review` command-line front end.
//!
//! - `gt-review apply --request FILE` commit a review request, then regenerate
//! - `gt-review regenerate`            rebuild the artifact from current records
//! - `gt-review get RECORD PATH`       print one field of a record
//! - `gt-review paths RECORD`          list every editable field path
//!
//! The JSON summary goes to stdout; logs go to stderr.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gt_review_path::{get_by_path, leaf_paths, PathError};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::batch::ReviewRequest;
use crate::config::{ConfigError, ReviewConfig, DEFAULT_CONFIG_FILE};
use crate::coordinator::{commit_batch, BatchReport, CommitOptions};
use crate::error::{BatchError, ReviewError};
use crate::pipeline::ReviewPipeline;
use crate::regen::{CancelHandle, FilePublisher, RegenerationError, Regenerated};
use crate::store::{FileRecordStore, RecordStore, StoreError};

/// Environment variable holding the log filter, e.g. `gt_review=debug`.
pub const LOG_ENV: &str = "GT_REVIEW_LOG";

// ── Arguments ─────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "gt-review", version, about = "Apply reviewed ground-truth edits and regenerate metrics")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Commit a review request and regenerate the artifact.
    Apply {
        /// Request file (`{"updates": {...}, "validate": bool}`); `-` reads stdin.
        #[arg(long, default_value = "-")]
        request: String,
        /// Skip record validation regardless of the request.
        #[arg(long)]
        no_validate: bool,
        /// Commit edits without running the metrics engine.
        #[arg(long)]
        skip_regenerate: bool,
    },
    /// Regenerate the artifact from the current records.
    Regenerate,
    /// Print the value at PATH in RECORD.
    Get { record: String, path: String },
    /// List the leaf field paths of RECORD.
    Paths { record: String },
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot read request {source_name}: {source}")]
    ReadRequest {
        source_name: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid request: {0}")]
    ParseRequest(#[source] serde_json::Error),
    #[error("no [engine] section in config; nothing to regenerate")]
    NoEngine,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("{path} not found in record {record:?}")]
    FieldNotFound { record: String, path: String },
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Regeneration(#[from] RegenerationError),
    #[error("cannot write output: {0}")]
    Output(#[source] io::Error),
}

impl CliError {
    /// Process exit status: 1 for rejected edits or lookups, 2 when edits
    /// were committed (or none were asked for) but regeneration failed, 3 for
    /// configuration and usage errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_)
            | CliError::ReadRequest { .. }
            | CliError::ParseRequest(_)
            | CliError::NoEngine => 3,
            CliError::Regeneration(_) => 2,
            CliError::Store(_)
            | CliError::Path(_)
            | CliError::FieldNotFound { .. }
            | CliError::Batch(_)
            | CliError::Output(_) => 1,
        }
    }
}

/// Render an error for the terminal: the message, then one `caused by` line
/// per cause whose text the lines above do not already carry.
pub fn render_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = format!("error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str("\n  caused by: ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

// ── Logging ───────────────────────────────────────────────────────────────

/// Install the global subscriber. Filter comes from [`LOG_ENV`], default
/// `info`. Does nothing if a subscriber is already set.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .try_init()
    };
}

// ── Commands ──────────────────────────────────────────────────────────────

/// Run a parsed command line. `input` backs `--request -`.
pub fn run(cli: &Cli, input: &mut dyn Read, out: &mut dyn Write) -> Result<(), CliError> {
    let config = ReviewConfig::load(&cli.config)?;
    match &cli.command {
        Command::Apply { request, no_validate, skip_regenerate } => {
            let request = read_request(request, input)?;
            let validate = !no_validate && request.validate.unwrap_or(config.validate);
            apply(&config, &request, validate, *skip_regenerate, out)
        }
        Command::Regenerate => regenerate(&config, out),
        Command::Get { record, path } => {
            let store = FileRecordStore::open(&config.records_dir)?;
            let doc = store.get(record)?;
            let value = get_by_path(&doc, path)?.ok_or_else(|| CliError::FieldNotFound {
                record: record.clone(),
                path: path.clone(),
            })?;
            write_json(out, value)
        }
        Command::Paths { record } => {
            let store = FileRecordStore::open(&config.records_dir)?;
            let doc = store.get(record)?;
            for path in leaf_paths(&doc) {
                writeln!(out, "{path}").map_err(CliError::Output)?;
            }
            Ok(())
        }
    }
}

fn read_request(source: &str, input: &mut dyn Read) -> Result<ReviewRequest, CliError> {
    let text = if source == "-" {
        let mut buf = String::new();
        input.read_to_string(&mut buf).map_err(|e| CliError::ReadRequest {
            source_name: "<stdin>".to_string(),
            source: e,
        })?;
        buf
    } else {
        fs::read_to_string(source).map_err(|e| CliError::ReadRequest {
            source_name: source.to_string(),
            source: e,
        })?
    };
    serde_json::from_str(&text).map_err(CliError::ParseRequest)
}

fn apply(
    config: &ReviewConfig,
    request: &ReviewRequest,
    validate: bool,
    skip_regenerate: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let mut store = FileRecordStore::open(&config.records_dir)?;
    let validator = config.validator();

    let engine = match &config.engine {
        Some(engine) if !skip_regenerate => engine,
        other => {
            if other.is_none() {
                warn!("no [engine] configured; artifact will not be regenerated");
            }
            let opts = CommitOptions { validate, policy: config.failure_policy };
            let report = commit_batch(&mut store, &validator, &request.updates, opts)?;
            return write_json(out, &summary(&report, None, None));
        }
    };

    let mut pipeline = ReviewPipeline::new(
        store,
        validator,
        engine.command_engine(),
        FilePublisher::new(&config.artifact_path),
    )
    .with_policy(config.failure_policy)
    .with_timeout(engine.timeout())
    .with_json_artifact_check(engine.require_json_artifact);

    match pipeline.submit(&request.updates, validate) {
        Ok(done) => write_json(out, &summary(&done.report, done.regenerated.as_ref(), None)),
        Err(ReviewError::Batch(e)) => Err(e.into()),
        Err(ReviewError::Regeneration { report, source }) => {
            write_json(out, &summary(&report, None, Some(&source)))?;
            Err(source.into())
        }
    }
}

fn regenerate(config: &ReviewConfig, out: &mut dyn Write) -> Result<(), CliError> {
    let engine = config.engine.as_ref().ok_or(CliError::NoEngine)?;
    let publisher = FilePublisher::new(&config.artifact_path);
    let done = engine
        .trigger()
        .regenerate(&engine.command_engine(), &publisher, &CancelHandle::new())?;
    info!(artifact = %config.artifact_path.display(), "artifact regenerated");
    write_json(out, &json!({ "regenerated": regenerated_json(&done) }))
}

// ── Output ────────────────────────────────────────────────────────────────

fn summary(
    report: &BatchReport,
    regenerated: Option<&Regenerated>,
    regeneration_error: Option<&RegenerationError>,
) -> Value {
    let status = if regeneration_error.is_some() {
        "stale"
    } else if report.is_complete() {
        "ok"
    } else {
        "partial"
    };
    let failed: Vec<Value> = report
        .failed
        .iter()
        .map(|e| json!({ "record": e.record(), "path": e.path(), "error": e.to_string() }))
        .collect();
    let coercions: Vec<Value> = report
        .coercions
        .iter()
        .map(|c| json!({ "record": c.record, "path": c.path, "detail": c.coercion.to_string() }))
        .collect();
    let mut out = json!({
        "status": status,
        "committed": report.committed,
        "failed": failed,
        "edits_applied": report.edits_applied,
        "coercions": coercions,
        "regenerated": regenerated.map(regenerated_json),
    });
    if let (Some(err), Some(obj)) = (regeneration_error, out.as_object_mut()) {
        obj.insert("regeneration_error".to_string(), Value::String(err.to_string()));
    }
    out
}

fn regenerated_json(done: &Regenerated) -> Value {
    json!({ "bytes": done.bytes, "elapsed_ms": duration_ms(done.elapsed) })
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn write_json<T: serde::Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut *out, value)
        .map_err(|e| CliError::Output(io::Error::other(e)))?;
    writeln!(out).map_err(CliError::Output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn setup(engine: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("records")).unwrap();
        fs::write(
            dir.path().join("records/img001.json"),
            r#"{"artwork": {"title": "Untitled", "tags": ["a"]}}"#,
        )
        .unwrap();
        let mut config =
            String::from("records_dir = \"records\"\nartifact_path = \"out/analysis.json\"\n");
        if let Some(engine) = engine {
            config.push_str(engine);
        }
        fs::write(dir.path().join(DEFAULT_CONFIG_FILE), config).unwrap();
        dir
    }

    fn cli(dir: &Path, args: &[&str]) -> Cli {
        let config = dir.join(DEFAULT_CONFIG_FILE);
        let mut argv = vec!["gt-review", "--config", config.to_str().unwrap()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn run_str(cli: &Cli, stdin: &str) -> (Result<(), CliError>, String) {
        let mut out = Vec::new();
        let result = run(cli, &mut stdin.as_bytes(), &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from(["gt-review", "apply", "--no-validate"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(matches!(
            cli.command,
            Command::Apply { ref request, no_validate: true, skip_regenerate: false } if request == "-"
        ));
        let cli = Cli::try_parse_from(["gt-review", "get", "img001", "artwork.title", "--log-json"])
            .unwrap();
        assert!(cli.log_json);
        assert!(Cli::try_parse_from(["gt-review", "get", "img001"]).is_err());
    }

    #[test]
    fn test_apply_without_engine_commits() {
        let dir = setup(None);
        let cli = cli(dir.path(), &["apply"]);
        let (result, out) =
            run_str(&cli, r#"{"updates": {"img001": {"artwork.title": "The Starry Night"}}}"#);
        result.unwrap();
        let summary: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(summary["status"], "ok");
        assert_eq!(summary["committed"], json!(["img001"]));
        assert_eq!(summary["regenerated"], Value::Null);

        let cli = cli_get(dir.path(), "artwork.title");
        let (result, out) = run_str(&cli, "");
        result.unwrap();
        assert_eq!(out.trim(), "\"The Starry Night\"");
    }

    fn cli_get(dir: &Path, path: &str) -> Cli {
        cli(dir, &["get", "img001", path])
    }

    #[test]
    fn test_apply_missing_record_exit_code() {
        let dir = setup(None);
        let cli = cli(dir.path(), &["apply"]);
        let (result, out) = run_str(&cli, r#"{"updates": {"img999": {"a": "b"}}}"#);
        let err = result.unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(matches!(err, CliError::Batch(BatchError::RecordNotFound { .. })));
        assert!(out.is_empty());
    }

    #[test]
    fn test_bad_request_is_usage_error() {
        let dir = setup(None);
        let cli = cli(dir.path(), &["apply"]);
        let (result, _) = run_str(&cli, r#"{"updates": {"img001": {"a": [1]}}}"#);
        assert_eq!(result.unwrap_err().exit_code(), 3);
    }

    #[test]
    fn test_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli(dir.path(), &["regenerate"]);
        let (result, _) = run_str(&cli, "");
        assert!(matches!(result, Err(ref e @ CliError::Config(_)) if e.exit_code() == 3));
    }

    #[test]
    fn test_regenerate_requires_engine() {
        let dir = setup(None);
        let (result, _) = run_str(&cli(dir.path(), &["regenerate"]), "");
        assert!(matches!(result, Err(CliError::NoEngine)));
    }

    #[test]
    fn test_paths_and_missing_field() {
        let dir = setup(None);
        let (result, out) = run_str(&cli(dir.path(), &["paths", "img001"]), "");
        result.unwrap();
        assert_eq!(out, "artwork.title\nartwork.tags[0]\n");

        let (result, _) = run_str(&cli_get(dir.path(), "artwork.year"), "");
        assert!(matches!(result, Err(CliError::FieldNotFound { .. })));
        let (result, _) = run_str(&cli_get(dir.path(), "artwork..year"), "");
        assert!(matches!(result, Err(CliError::Path(_))));
    }

    #[test]
    fn test_get_rejects_escaping_record_id() {
        let dir = setup(None);
        fs::write(dir.path().join("secret.json"), r#"{"a": 1}"#).unwrap();
        let (result, out) = run_str(&cli(dir.path(), &["get", "../secret", "a"]), "");
        let err = result.unwrap_err();
        assert!(matches!(err, CliError::Store(StoreError::InvalidId { .. })));
        assert_eq!(err.exit_code(), 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_render_error_prints_each_cause_once() {
        let dir = setup(None);
        let request = r#"{"updates": {"img001": {"artwork.tags[x]": "b"}}}"#;
        let (result, _) = run_str(&cli(dir.path(), &["apply"]), request);
        let rendered = render_error(&result.unwrap_err());
        assert_eq!(rendered.matches("array index is not numeric").count(), 1);
        assert!(!rendered.contains("caused by"));

        fs::write(dir.path().join("records/img002.json"), "{not json").unwrap();
        let (result, _) = run_str(&cli(dir.path(), &["paths", "img002"]), "");
        let err = result.unwrap_err();
        assert!(matches!(err, CliError::Store(StoreError::Corrupt { .. })));
        let rendered = render_error(&err);
        assert_eq!(rendered.lines().count(), 1);
        assert!(rendered.starts_with("error: record \"img002\" is not valid JSON: "));
    }

    #[test]
    fn test_render_error_keeps_uncarried_causes() {
        #[derive(Debug, Error)]
        #[error("engine wrapper gave up")]
        struct Wrapper(#[source] io::Error);

        let rendered = render_error(&Wrapper(io::Error::other("pipe closed")));
        assert_eq!(rendered, "error: engine wrapper gave up\n  caused by: pipe closed");
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_regenerates_with_engine() {
        let dir = setup(Some(
            "[engine]\nprogram = \"sh\"\nargs = [\"-c\", \"printf '{\\\"ok\\\":true}'\"]\nrequire_json_artifact = true\n",
        ));
        let request = dir.path().join("request.json");
        fs::write(&request, r#"{"updates": {"img001": {"artwork.tags[2]": "c"}}, "validate": true}"#)
            .unwrap();
        let cli = cli(dir.path(), &["apply", "--request", request.to_str().unwrap()]);
        let (result, out) = run_str(&cli, "");
        result.unwrap();
        let summary: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(summary["regenerated"]["bytes"], 11);
        let artifact = fs::read_to_string(dir.path().join("out/analysis.json")).unwrap();
        assert_eq!(artifact, r#"{"ok":true}"#);
    }

    #[cfg(unix)]
    #[test]
    fn test_engine_failure_keeps_edits() {
        let dir = setup(Some("[engine]\nprogram = \"sh\"\nargs = [\"-c\", \"exit 4\"]\n"));
        let cli = cli(dir.path(), &["apply"]);
        let (result, out) = run_str(&cli, r#"{"updates": {"img001": {"artwork.title": "X"}}}"#);
        let err = result.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        let summary: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(summary["status"], "stale");
        assert_eq!(summary["committed"], json!(["img001"]));

        let (result, out) = run_str(&cli_get(dir.path(), "artwork.title"), "");
        result.unwrap();
        assert_eq!(out.trim(), "\"X\"");
    }
}
