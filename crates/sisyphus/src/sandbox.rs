//! Resource sandbox adapter.
//!
//! [`Sandbox::start`] launches one process under time, memory and process
//! limits and hands back a handle to await or cancel it. Limit breaches are
//! reported through [`SandboxStatus`], never as errors; [`SandboxError`] is
//! reserved for the sandbox itself failing.
//!
//! [`IsolateSandbox`] drives the `isolate` tool with cgroups; each worker
//! slot owns one isolate box.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::languages::ExecParam;

/// How a sandboxed process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Ok,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    OutputLimitExceeded,
    Cancelled,
    /// The sandbox produced a result it could not explain
    Unknown,
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SandboxStatus::Ok => "OK",
            SandboxStatus::TimeLimitExceeded => "TimeLimitExceeded",
            SandboxStatus::MemoryLimitExceeded => "MemoryLimitExceeded",
            SandboxStatus::RuntimeError => "RuntimeError",
            SandboxStatus::OutputLimitExceeded => "OutputLimitExceeded",
            SandboxStatus::Cancelled => "Cancelled",
            SandboxStatus::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxResult {
    pub status: SandboxStatus,
    /// Exit code, or the signal number for `RuntimeError`
    pub code: i32,
    /// CPU time in nanoseconds
    pub time: u64,
    /// Peak memory in bytes
    pub memory: u64,
}

/// A host directory made visible inside the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub src: PathBuf,
    pub dst: String,
    pub writable: bool,
}

impl Mount {
    pub fn read_only(src: impl Into<PathBuf>, dst: &str) -> Self {
        Self {
            src: src.into(),
            dst: dst.to_string(),
            writable: false,
        }
    }

    pub fn writable(src: impl Into<PathBuf>, dst: &str) -> Self {
        Self {
            src: src.into(),
            dst: dst.to_string(),
            writable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxParameter {
    pub exec: ExecParam,
    pub mounts: Vec<Mount>,
    /// Isolate box, equal to the worker slot running the task
    pub box_id: usize,
}

impl SandboxParameter {
    /// Map a path seen by the sandboxed process to the host.
    /// Relative paths are taken from the working directory.
    pub fn host_path(&self, path: &str) -> Option<PathBuf> {
        let inside = Path::new(&self.exec.working_directory).join(path);
        self.mounts.iter().find_map(|mount| {
            inside
                .strip_prefix(&mount.dst)
                .ok()
                .map(|rest| mount.src.join(rest))
        })
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The supervisor died or left no result behind
    #[error("The child process has exited unexpectedly: {0}")]
    ChildExitedUnexpectedly(String),

    /// The file meant for stdin could not be opened at launch
    #[error("Cannot open stdin file {0}")]
    StdinUnavailable(String),

    #[error("Failed to initialize sandbox box {box_id}: {message}")]
    Init { box_id: usize, message: String },

    #[error("Failed to launch sandbox: {0}")]
    Launch(#[from] std::io::Error),
}

impl SandboxError {
    /// Launch races that go away when the same task is simply run again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SandboxError::ChildExitedUnexpectedly(_) | SandboxError::StdinUnavailable(_)
        )
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn start(&self, param: SandboxParameter) -> Result<Box<dyn SandboxHandle>, SandboxError>;
}

#[async_trait]
pub trait SandboxHandle: Send {
    async fn wait_for_stop(&mut self) -> Result<SandboxResult, SandboxError>;

    /// Kill the process; `wait_for_stop` then reports `Cancelled`
    async fn stop(&mut self);
}

/// Start a process and wait for it
pub async fn run(
    sandbox: &dyn Sandbox,
    param: SandboxParameter,
) -> Result<SandboxResult, SandboxError> {
    let mut handle = sandbox.start(param).await?;
    handle.wait_for_stop().await
}

const SANDBOX_PATH: &str = "PATH=/usr/local/bin:/usr/bin:/bin";

/// Sandbox backed by `isolate --cg`
pub struct IsolateSandbox {
    isolate: PathBuf,
}

impl IsolateSandbox {
    pub fn new(isolate: impl Into<PathBuf>) -> Self {
        Self {
            isolate: isolate.into(),
        }
    }

    async fn init_box(&self, box_id: usize) -> Result<(), SandboxError> {
        let output = Command::new(&self.isolate)
            .args(box_args(box_id, "--init"))
            .output()
            .await?;

        if !output.status.success() {
            return Err(SandboxError::Init {
                box_id,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Sandbox for IsolateSandbox {
    async fn start(&self, param: SandboxParameter) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        if let Some(stdin) = &param.exec.stdin {
            let host = param
                .host_path(stdin)
                .ok_or_else(|| SandboxError::StdinUnavailable(stdin.clone()))?;
            if tokio::fs::File::open(&host).await.is_err() {
                return Err(SandboxError::StdinUnavailable(stdin.clone()));
            }
        }

        self.init_box(param.box_id).await?;

        let meta = tempfile::Builder::new()
            .prefix("isolate-")
            .suffix(".meta")
            .tempfile()?;

        tracing::debug!(
            box_id = param.box_id,
            executable = %param.exec.executable,
            "Starting sandboxed process"
        );
        let child = Command::new(&self.isolate)
            .args(isolate_args(&param, meta.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        Ok(Box::new(IsolateHandle {
            isolate: self.isolate.clone(),
            box_id: param.box_id,
            child,
            meta,
            cancelled: false,
        }))
    }
}

struct IsolateHandle {
    isolate: PathBuf,
    box_id: usize,
    child: Child,
    meta: tempfile::NamedTempFile,
    cancelled: bool,
}

impl IsolateHandle {
    async fn collect(&mut self) -> Result<SandboxResult, SandboxError> {
        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            pipe.read_to_string(&mut stderr).await.ok();
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| SandboxError::ChildExitedUnexpectedly(e.to_string()))?;

        // isolate exits 0 or 1 depending on the program, 2 on its own faults
        if status.code().is_none_or(|code| code > 1) {
            if self.cancelled {
                return Ok(cancelled());
            }
            let meta = tokio::fs::read_to_string(self.meta.path())
                .await
                .unwrap_or_default();
            if meta.trim().is_empty() {
                return Err(SandboxError::ChildExitedUnexpectedly(stderr.trim().to_string()));
            }
            tracing::warn!("isolate reported an internal error: {}", stderr.trim());
            return Ok(parse_meta(&meta));
        }

        let meta = tokio::fs::read_to_string(self.meta.path())
            .await
            .map_err(|e| SandboxError::ChildExitedUnexpectedly(e.to_string()))?;
        if self.cancelled {
            return Ok(SandboxResult {
                status: SandboxStatus::Cancelled,
                ..parse_meta(&meta)
            });
        }
        Ok(parse_meta(&meta))
    }

    /// Tear the box down so no process or cgroup outlives the run. The next
    /// start re-initializes it, so a failure here is only logged.
    async fn cleanup(&self) {
        let output = Command::new(&self.isolate)
            .args(box_args(self.box_id, "--cleanup"))
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {}
            Ok(output) => tracing::warn!(
                box_id = self.box_id,
                "Failed to clean up sandbox box: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => tracing::warn!(box_id = self.box_id, "Failed to clean up sandbox box: {}", e),
        }
    }
}

#[async_trait]
impl SandboxHandle for IsolateHandle {
    async fn wait_for_stop(&mut self) -> Result<SandboxResult, SandboxError> {
        let result = self.collect().await;
        self.cleanup().await;
        result
    }

    async fn stop(&mut self) {
        self.cancelled = true;
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Sandboxed process already gone: {}", e);
        }
    }
}

fn cancelled() -> SandboxResult {
    SandboxResult {
        status: SandboxStatus::Cancelled,
        code: 0,
        time: 0,
        memory: 0,
    }
}

fn seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Command line of a box-wide isolate action such as `--init`
fn box_args(box_id: usize, action: &str) -> [String; 3] {
    [format!("--box-id={}", box_id), "--cg".to_string(), action.to_string()]
}

/// Command line of `isolate --run` for one invocation
fn isolate_args(param: &SandboxParameter, meta: &Path) -> Vec<String> {
    let exec = &param.exec;
    let mut args = vec![
        format!("--box-id={}", param.box_id),
        "--cg".to_string(),
        "--run".to_string(),
        "--silent".to_string(),
        format!("--meta={}", meta.display()),
        format!("--chdir={}", exec.working_directory),
        format!("--time={}", seconds(exec.time)),
        // a sleeping program is killed once the wall clock runs out
        format!("--wall-time={}", seconds(exec.time * 3 + 1000)),
        format!("--cg-mem={}", exec.memory / 1024),
        format!("--processes={}", exec.process),
        format!("--env={}", SANDBOX_PATH),
    ];

    for mount in &param.mounts {
        let mode = if mount.writable { ":rw" } else { "" };
        args.push(format!("--dir={}={}{}", mount.dst, mount.src.display(), mode));
    }
    if let Some(stack) = exec.stack_size {
        args.push(format!("--stack={}", stack / 1024));
    }
    if let Some(stdin) = &exec.stdin {
        args.push(format!("--stdin={}", stdin));
    }
    if let Some(stdout) = &exec.stdout {
        args.push(format!("--stdout={}", stdout));
    }
    match (&exec.stdout, &exec.stderr) {
        (Some(stdout), Some(stderr)) if stdout == stderr => {
            args.push("--stderr-to-stdout".to_string());
        }
        (_, Some(stderr)) => args.push(format!("--stderr={}", stderr)),
        _ => {}
    }

    args.push("--".to_string());
    args.push(exec.executable.clone());
    args.extend(exec.parameters.iter().skip(1).cloned());
    args
}

/// Turn an isolate meta file into a result
fn parse_meta(meta: &str) -> SandboxResult {
    let fields: HashMap<&str, &str> = meta
        .lines()
        .filter_map(|line| line.split_once(':'))
        .collect();
    let number = |key: &str| fields.get(key).and_then(|v| v.trim().parse::<u64>().ok());

    let time = fields
        .get("time")
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|secs| (secs * 1e9).round() as u64)
        .unwrap_or(0);
    let memory = number("cg-mem").or_else(|| number("max-rss")).unwrap_or(0) * 1024;
    let exit_code = number("exitcode").unwrap_or(0) as i32;
    let signal = number("exitsig").unwrap_or(0) as i32;

    let (status, code) = if fields.contains_key("cg-oom-killed") {
        (SandboxStatus::MemoryLimitExceeded, signal)
    } else {
        match fields.get("status").map(|s| s.trim()) {
            Some("TO") => (SandboxStatus::TimeLimitExceeded, exit_code),
            Some("SG") => (SandboxStatus::RuntimeError, signal),
            Some("XX") => (SandboxStatus::Unknown, exit_code),
            // RE is a plain non-zero exit; the caller inspects the code
            _ => (SandboxStatus::Ok, exit_code),
        }
    };

    SandboxResult {
        status,
        code,
        time,
        memory,
    }
}
