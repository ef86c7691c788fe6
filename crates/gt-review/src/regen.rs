//! Regeneration of the derived comparison artifact.
//!
//! After a batch commits, the metrics engine recomputes the artifact from
//! the full current record set and the result is published with a
//! write-then-swap so readers never see a partial artifact. A failure here
//! does not undo the committed edits; regeneration can be retried on its
//! own.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::store::write_then_rename;

#[derive(Debug, Error)]
pub enum RegenerationError {
    #[error("metrics engine failed: {message}")]
    EngineFailure { message: String },
    #[error("metrics engine did not finish within {timeout:?}")]
    TimedOut { timeout: Duration },
    #[error("regeneration cancelled")]
    Cancelled,
    #[error("metrics engine produced an artifact that is not JSON: {0}")]
    InvalidArtifact(#[source] serde_json::Error),
    #[error("publishing artifact failed: {0}")]
    Publish(#[from] PublishError),
}

impl RegenerationError {
    pub fn engine(message: impl Into<String>) -> Self {
        RegenerationError::EngineFailure { message: message.into() }
    }
}

// ── Deadline ──────────────────────────────────────────────────────────────

/// Shared flag a host flips to abandon an in-flight regeneration.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation so the handle can be reused.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Time budget plus cancellation flag handed to a [`MetricsEngine`].
///
/// Engines are expected to poll [`Deadline::check`] and stop early.
#[derive(Debug, Clone)]
pub struct Deadline {
    timeout: Option<Duration>,
    expires_at: Option<Instant>,
    cancel: CancelHandle,
}

impl Deadline {
    pub fn new(timeout: Option<Duration>, cancel: CancelHandle) -> Self {
        Self {
            timeout,
            expires_at: timeout.map(|t| Instant::now() + t),
            cancel,
        }
    }

    pub fn after(timeout: Duration) -> Self {
        Self::new(Some(timeout), CancelHandle::new())
    }

    /// No time limit; only cancellation stops the engine.
    pub fn unbounded() -> Self {
        Self::new(None, CancelHandle::new())
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err` once the deadline passed or cancellation was requested.
    pub fn check(&self) -> Result<(), RegenerationError> {
        if self.is_cancelled() {
            return Err(RegenerationError::Cancelled);
        }
        match self.timeout {
            Some(timeout) if self.is_expired() => Err(RegenerationError::TimedOut { timeout }),
            _ => Ok(()),
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────

/// Recomputes the derived artifact from the full persisted record set.
///
/// Implementations take no batch-specific input and must honor `deadline`.
pub trait MetricsEngine {
    fn run(&self, deadline: &Deadline) -> Result<Vec<u8>, RegenerationError>;
}

/// In-process engine backed by a closure.
pub struct FnEngine<F>(pub F);

impl<F> MetricsEngine for FnEngine<F>
where
    F: Fn(&Deadline) -> Result<Vec<u8>, String>,
{
    fn run(&self, deadline: &Deadline) -> Result<Vec<u8>, RegenerationError> {
        deadline.check()?;
        (self.0)(deadline).map_err(RegenerationError::engine)
    }
}

/// Where a [`CommandEngine`] leaves its artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineOutput {
    /// Everything the program writes to stdout.
    #[default]
    Stdout,
    /// A file the program writes, relative to its working directory.
    File(PathBuf),
}

/// Engine that runs an external program, e.g. an analysis script.
///
/// The child is polled against the deadline and killed when it expires or
/// is cancelled.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    output: EngineOutput,
    poll_interval: Duration,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            output: EngineOutput::Stdout,
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn output(mut self, output: EngineOutput) -> Self {
        self.output = output;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn artifact_file(&self, file: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) if file.is_relative() => dir.join(file),
            _ => file.to_path_buf(),
        }
    }

    fn spawn(&self) -> Result<Child, RegenerationError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        // Own process group, so stopping the engine also stops its children.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
        cmd.spawn()
            .map_err(|e| RegenerationError::engine(format!("cannot start {:?}: {e}", self.program)))
    }

    fn nap(&self, deadline: &Deadline) -> Duration {
        deadline
            .remaining()
            .map_or(self.poll_interval, |left| left.min(self.poll_interval))
    }

    fn stop(&self, child: &mut Child, reason: RegenerationError) -> RegenerationError {
        warn!(program = %self.program, reason = %reason, "stopping metrics engine");
        kill_tree(child);
        reason
    }

    fn wait(&self, child: &mut Child, deadline: &Deadline) -> Result<ExitStatus, RegenerationError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => return Err(RegenerationError::engine(format!("wait failed: {e}"))),
            }
            if let Err(stop) = deadline.check() {
                return Err(self.stop(child, stop));
            }
            thread::sleep(self.nap(deadline));
        }
    }

    /// Wait for both pipes to close. Processes the engine left running in
    /// the background can hold them open past its exit.
    fn collect(
        &self,
        child: &mut Child,
        pipes: &Receiver<(Pipe, Vec<u8>)>,
        deadline: &Deadline,
    ) -> Result<(Vec<u8>, Vec<u8>), RegenerationError> {
        let mut stdout = None;
        let mut stderr = None;
        while stdout.is_none() || stderr.is_none() {
            if let Err(stop) = deadline.check() {
                return Err(self.stop(child, stop));
            }
            match pipes.recv_timeout(self.nap(deadline)) {
                Ok((Pipe::Stdout, buf)) => stdout = Some(buf),
                Ok((Pipe::Stderr, buf)) => stderr = Some(buf),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok((stdout.unwrap_or_default(), stderr.unwrap_or_default()))
    }
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>, which: Pipe, tx: Sender<(Pipe, Vec<u8>)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            // A read error just truncates captured output.
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send((which, buf));
    });
}

/// Kill the engine's process group, then reap the engine itself.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill(2) with a negative pid signals the group the engine
        // leads; no memory is shared with the callee.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl MetricsEngine for CommandEngine {
    fn run(&self, deadline: &Deadline) -> Result<Vec<u8>, RegenerationError> {
        deadline.check()?;
        debug!(program = %self.program, args = ?self.args, "starting metrics engine");
        let mut child = self.spawn()?;
        let (tx, pipes) = mpsc::channel();
        drain(child.stdout.take(), Pipe::Stdout, tx.clone());
        drain(child.stderr.take(), Pipe::Stderr, tx);

        let status = self.wait(&mut child, deadline)?;
        let (stdout, stderr) = self.collect(&mut child, &pipes, deadline)?;

        if !status.success() {
            let tail = String::from_utf8_lossy(&stderr);
            let tail = tail.trim();
            return Err(RegenerationError::engine(format!(
                "{:?} exited with {status}{}{}",
                self.program,
                if tail.is_empty() { "" } else { ": " },
                tail
            )));
        }
        if !stderr.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&stderr).trim(), "metrics engine stderr");
        }

        match &self.output {
            EngineOutput::Stdout => Ok(stdout),
            EngineOutput::File(file) => {
                let path = self.artifact_file(file);
                fs::read(&path).map_err(|e| {
                    RegenerationError::engine(format!("cannot read artifact {}: {e}", path.display()))
                })
            }
        }
    }
}

// ── Publisher ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("cannot write {}: {source}", .target.display())]
    Io {
        target: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("artifact slot is poisoned")]
    Poisoned,
}

/// Makes a new artifact visible to readers in one atomic step.
pub trait ArtifactPublisher {
    fn publish(&self, artifact: &[u8]) -> Result<(), PublishError>;
}

/// Publishes to a file by writing a sibling temp file and renaming it over
/// the target.
#[derive(Debug, Clone)]
pub struct FilePublisher {
    target: PathBuf,
}

impl FilePublisher {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self { target: target.into() }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        self.target.with_file_name(format!(".{name}.tmp"))
    }
}

impl ArtifactPublisher for FilePublisher {
    fn publish(&self, artifact: &[u8]) -> Result<(), PublishError> {
        let io_err = |source| PublishError::Io { target: self.target.clone(), source };
        if let Some(parent) = self.target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        write_then_rename(&self.temp_path(), &self.target, artifact).map_err(io_err)
    }
}

/// In-process publisher: readers clone the current `Arc` and keep a
/// consistent snapshot even while a newer artifact is swapped in.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    current: Arc<RwLock<Option<Arc<Vec<u8>>>>>,
    published: Arc<AtomicUsize>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest published artifact.
    pub fn current(&self) -> Option<Arc<Vec<u8>>> {
        self.current.read().ok().and_then(|slot| slot.clone())
    }

    /// How many artifacts have been published.
    pub fn publish_count(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }
}

impl ArtifactPublisher for MemoryPublisher {
    fn publish(&self, artifact: &[u8]) -> Result<(), PublishError> {
        let next = Arc::new(artifact.to_vec());
        let mut slot = self.current.write().map_err(|_| PublishError::Poisoned)?;
        *slot = Some(next);
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Trigger ───────────────────────────────────────────────────────────────

/// Summary of a successful regeneration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regenerated {
    pub bytes: usize,
    pub elapsed: Duration,
}

/// Runs the engine under a deadline and publishes its output.
#[derive(Debug, Clone)]
pub struct RegenerationTrigger {
    pub timeout: Option<Duration>,
    /// Refuse to publish bytes that do not parse as JSON.
    pub require_json: bool,
}

impl Default for RegenerationTrigger {
    fn default() -> Self {
        Self { timeout: Some(Duration::from_secs(300)), require_json: false }
    }
}

impl RegenerationTrigger {
    /// Regenerate and publish.
    ///
    /// # Errors
    ///
    /// Any [`RegenerationError`]; nothing is published on error. A result
    /// that arrives after the deadline is discarded.
    pub fn regenerate<E, P>(
        &self,
        engine: &E,
        publisher: &P,
        cancel: &CancelHandle,
    ) -> Result<Regenerated, RegenerationError>
    where
        E: MetricsEngine + ?Sized,
        P: ArtifactPublisher + ?Sized,
    {
        let started = Instant::now();
        let deadline = Deadline::new(self.timeout, cancel.clone());
        info!(timeout = ?self.timeout, "regenerating artifact");

        let result = engine.run(&deadline).and_then(|artifact| {
            deadline.check()?;
            if self.require_json {
                serde_json::from_slice::<IgnoredAny>(&artifact)
                    .map_err(RegenerationError::InvalidArtifact)?;
            }
            publisher.publish(&artifact)?;
            Ok(artifact.len())
        });

        match result {
            Ok(bytes) => {
                let elapsed = started.elapsed();
                info!(bytes, ?elapsed, "artifact published");
                Ok(Regenerated { bytes, elapsed })
            }
            Err(e) => {
                error!(error = %e, "regeneration failed");
                Err(e)
            }
        }
    }
}
