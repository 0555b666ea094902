//! Subprocess bridge to the external render engine.
//!
//! Each invocation spawns one engine process, writes a single JSON request
//! line to its stdin, closes stdin, and then consumes newline-delimited JSON
//! events from stdout:
//!
//! ```text
//! -> {"command":"renderMedia","options":{...}}
//! <- {"type":"info","message":"Selected composition: Intro"}
//! <- {"type":"progress","data":{"progress":0.5,"renderedFrames":30}}
//! <- {"type":"complete"}
//! ```
//!
//! Two timeouts bound the read loop. The per-read timeout only bounds a
//! single line wait so liveness can be re-checked; the stall timeout fails
//! the call when no `progress` or `info` event arrives within its window.
//! The process never outlives the call.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, ExecutionFailure};
use crate::job::RenderOptions;

/// Commands understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineCommand {
    #[serde(rename = "renderMedia")]
    RenderMedia,
    #[serde(rename = "renderStill")]
    RenderStill,
    #[serde(rename = "getCompositions")]
    GetCompositions,
}

impl EngineCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineCommand::RenderMedia => "renderMedia",
            EngineCommand::RenderStill => "renderStill",
            EngineCommand::GetCompositions => "getCompositions",
        }
    }
}

impl std::fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct EngineRequest<'a> {
    command: EngineCommand,
    options: &'a RenderOptions,
}

/// A progress report forwarded from the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Fraction in `[0.0, 1.0]` as reported by the engine.
    pub progress: f64,
    /// The full progress payload, verbatim.
    pub details: RenderOptions,
}

/// Successful result of an engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    /// A render command finished.
    Rendered,
    /// The inspection command returned these compositions.
    Compositions(Vec<Value>),
}

/// One parsed stdout line.
#[derive(Debug, PartialEq)]
enum EngineEvent {
    Progress(ProgressEvent),
    Info(String),
    Compositions(Vec<Value>),
    Complete,
    Error(String),
    Unknown(String),
}

impl EngineEvent {
    /// Parses one raw output line. Returns `None` for lines that are not
    /// JSON objects with a string `type`, including lines that are not UTF-8.
    fn parse(line: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(line).ok()?;
        let object = value.as_object()?;
        let kind = object.get("type")?.as_str()?;

        let event = match kind {
            "progress" => {
                let payload = match object.get("data") {
                    Some(Value::Object(data)) => data.clone(),
                    _ => {
                        let mut payload = object.clone();
                        payload.remove("type");
                        payload
                    }
                };
                let progress = payload
                    .get("progress")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                EngineEvent::Progress(ProgressEvent {
                    progress,
                    details: payload,
                })
            }
            "info" => EngineEvent::Info(message_of(object)),
            "compositions" => {
                let data = match object.get("data") {
                    Some(Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                };
                EngineEvent::Compositions(data)
            }
            "complete" => EngineEvent::Complete,
            "error" => {
                let message = message_of(object);
                EngineEvent::Error(if message.is_empty() {
                    "engine reported an error".to_string()
                } else {
                    message
                })
            }
            other => EngineEvent::Unknown(other.to_string()),
        };
        Some(event)
    }
}

fn message_of(object: &serde_json::Map<String, Value>) -> String {
    match object.get("message") {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Runs engine commands.
///
/// The scheduler depends on this seam rather than on [`EngineBridge`]
/// directly so the worker pool can be exercised without a real engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Executes `command` with `options`, forwarding progress reports to
    /// `progress` when given. Cancelling `cancel` terminates the engine.
    async fn execute(
        &self,
        command: EngineCommand,
        options: RenderOptions,
        progress: Option<mpsc::Sender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> Result<EngineOutcome, EngineError>;
}

/// Bridge to the engine executable.
#[derive(Debug, Clone)]
pub struct EngineBridge {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    read_timeout: Duration,
    stall_timeout: Duration,
}

impl EngineBridge {
    /// Creates a bridge, verifying that the engine program and its entry
    /// point exist.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let program = resolve_program(&config.program).ok_or_else(|| {
            EngineError::Setup(format!(
                "engine program not found: {}",
                config.program.display()
            ))
        })?;

        let mut args = Vec::new();
        if let Some(entry) = &config.entry {
            let entry_path = match &config.working_dir {
                Some(dir) if entry.is_relative() => dir.join(entry),
                _ => entry.clone(),
            };
            if !entry_path.is_file() {
                return Err(EngineError::Setup(format!(
                    "engine entry point not found at {}",
                    entry_path.display()
                )));
            }
            args.push(entry_path.to_string_lossy().into_owned());
        }
        args.extend(config.args.iter().cloned());

        if let Some(dir) = &config.working_dir {
            if !dir.is_dir() {
                return Err(EngineError::Setup(format!(
                    "engine working directory not found: {}",
                    dir.display()
                )));
            }
        }

        info!(
            program = %program.display(),
            read_timeout_ms = config.read_timeout.as_millis() as u64,
            stall_timeout_ms = config.stall_timeout.as_millis() as u64,
            "Render engine bridge ready"
        );

        Ok(Self {
            program,
            args,
            working_dir: config.working_dir.clone(),
            read_timeout: config.read_timeout,
            stall_timeout: config.stall_timeout,
        })
    }

    /// Renders a video.
    pub async fn render_media(
        &self,
        options: RenderOptions,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<EngineOutcome, EngineError> {
        self.run(EngineCommand::RenderMedia, options, progress, CancellationToken::new())
            .await
    }

    /// Renders a single frame.
    pub async fn render_still(
        &self,
        options: RenderOptions,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<EngineOutcome, EngineError> {
        self.run(EngineCommand::RenderStill, options, progress, CancellationToken::new())
            .await
    }

    /// Lists the compositions available in a bundle.
    pub async fn get_compositions(&self, options: RenderOptions) -> Result<Vec<Value>, EngineError> {
        match self
            .run(EngineCommand::GetCompositions, options, None, CancellationToken::new())
            .await?
        {
            EngineOutcome::Compositions(items) => Ok(items),
            EngineOutcome::Rendered => Ok(Vec::new()),
        }
    }

    async fn run(
        &self,
        command: EngineCommand,
        options: RenderOptions,
        progress: Option<mpsc::Sender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> Result<EngineOutcome, EngineError> {
        let mut request = serde_json::to_vec(&EngineRequest {
            command,
            options: &options,
        })?;
        request.push(b'\n');

        let started_at = Instant::now();
        let mut child = self.spawn().map_err(ExecutionFailure::from)?;
        let pid = child.id();
        debug!(command = %command, pid = ?pid, "Spawned render engine");

        let outcome = self
            .drive(&mut child, &request, progress.as_ref(), &cancel)
            .await;

        // Whatever happened, the engine and anything it started must be gone
        // before we return.
        terminate(&mut child, pid).await;
        if let Err(ref failure) = outcome {
            warn!(
                command = %command,
                pid = ?pid,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %failure,
                "Render engine invocation failed"
            );
        } else {
            info!(
                command = %command,
                pid = ?pid,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Render engine invocation finished"
            );
        }

        outcome.map_err(EngineError::from)
    }

    fn spawn(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The engine gets its own process group so helpers it launches
        // (node, a browser) can be killed with it.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.spawn()
    }

    async fn drive(
        &self,
        child: &mut Child,
        request: &[u8],
        progress: Option<&mpsc::Sender<ProgressEvent>>,
        cancel: &CancellationToken,
    ) -> Result<EngineOutcome, ExecutionFailure> {
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });
        let stderr_task = StderrCapture(stderr_task);

        if let Some(mut stdin) = child.stdin.take() {
            // A process that exits without reading its input is judged by its
            // exit status, not by the broken pipe.
            if let Err(err) = stdin.write_all(request).await {
                debug!(error = %err, "Engine closed stdin before reading the request");
            }
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("engine stdout was not captured"))?;

        let result = self.read_events(stdout, progress, cancel).await?;

        let status = self.wait_for_exit(child, cancel).await?;
        if !status.success() {
            let stderr = stderr_task.collect(self.read_timeout).await;
            return Err(ExecutionFailure::Exit {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        result.ok_or(ExecutionFailure::MissingResult)
    }

    /// Reads events until end of stream.
    ///
    /// The first terminal success event fixes the outcome; anything the engine
    /// writes after it is drained and discarded so the engine never sees a
    /// closed pipe. Returns `Ok(None)` when the stream ended without a
    /// terminal event.
    async fn read_events(
        &self,
        stdout: ChildStdout,
        progress: Option<&mpsc::Sender<ProgressEvent>>,
        cancel: &CancellationToken,
    ) -> Result<Option<EngineOutcome>, ExecutionFailure> {
        let mut reader = BufReader::new(stdout);
        // Partial lines survive a read timeout and are completed by the next read.
        let mut buf = Vec::new();
        let mut outcome = None;
        let mut last_activity = Instant::now();

        loop {
            let idle = last_activity.elapsed();
            if idle >= self.stall_timeout {
                return Err(ExecutionFailure::Stalled(self.stall_timeout));
            }
            let wait = self.read_timeout.min(self.stall_timeout - idle);

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExecutionFailure::Cancelled),
                read = tokio::time::timeout(wait, reader.read_until(b'\n', &mut buf)) => match read {
                    Err(_) => continue,
                    Ok(Ok(read)) => read,
                    Ok(Err(err)) => return Err(err.into()),
                },
            };
            if read == 0 && buf.is_empty() {
                return Ok(outcome);
            }
            let line = std::mem::take(&mut buf);

            if outcome.is_some() {
                last_activity = Instant::now();
                debug!(
                    line = %String::from_utf8_lossy(&line).trim_end(),
                    "Discarding engine output after result"
                );
                continue;
            }

            let Some(event) = EngineEvent::parse(&line) else {
                debug!(
                    line = %String::from_utf8_lossy(&line).trim_end(),
                    "Skipping unparseable engine output"
                );
                continue;
            };

            match event {
                EngineEvent::Progress(report) => {
                    last_activity = Instant::now();
                    if let Some(sink) = progress {
                        // Best effort: a full channel drops the report.
                        let _ = sink.try_send(report);
                    }
                }
                EngineEvent::Info(message) => {
                    last_activity = Instant::now();
                    debug!(message = %message, "Engine info");
                }
                EngineEvent::Compositions(items) => {
                    last_activity = Instant::now();
                    outcome = Some(EngineOutcome::Compositions(items));
                }
                EngineEvent::Complete => {
                    last_activity = Instant::now();
                    outcome = Some(EngineOutcome::Rendered);
                }
                EngineEvent::Error(message) => return Err(ExecutionFailure::Reported(message)),
                EngineEvent::Unknown(kind) => {
                    debug!(event_type = %kind, "Ignoring unknown engine event");
                }
            }
        }
    }

    async fn wait_for_exit(
        &self,
        child: &mut Child,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus, ExecutionFailure> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecutionFailure::Cancelled),
            waited = tokio::time::timeout(self.stall_timeout, child.wait()) => match waited {
                Ok(status) => Ok(status?),
                Err(_) => Err(ExecutionFailure::Stalled(self.stall_timeout)),
            },
        }
    }
}

#[async_trait]
impl Renderer for EngineBridge {
    async fn execute(
        &self,
        command: EngineCommand,
        options: RenderOptions,
        progress: Option<mpsc::Sender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> Result<EngineOutcome, EngineError> {
        self.run(command, options, progress, cancel).await
    }
}

/// Background reader for the engine's stderr. Aborted if dropped unread.
struct StderrCapture(Option<JoinHandle<String>>);

impl StderrCapture {
    async fn collect(mut self, limit: Duration) -> String {
        let Some(handle) = self.0.take() else {
            return String::new();
        };
        // A grandchild holding the pipe open must not hang the caller.
        let abort = handle.abort_handle();
        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(text)) => text,
            Ok(Err(_)) => String::new(),
            Err(_) => {
                abort.abort();
                String::new()
            }
        }
    }
}

impl Drop for StderrCapture {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

/// Kills the engine's process group, then reaps the engine itself.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        kill_process_group(pid);
    }
    #[cfg(not(unix))]
    let _ = pid;

    match child.try_wait() {
        Ok(Some(_)) => {}
        _ => {
            if let Err(err) = child.kill().await {
                warn!(error = %err, "Failed to kill render engine");
            }
        }
    }
}

/// Sends `SIGKILL` to every process in the group led by `pgid`.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // Nothing left in the group.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(pgid, error = %err, "Failed to kill render engine process group"),
    }
}

/// Finds the program on disk, searching `PATH` for bare names.
fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
