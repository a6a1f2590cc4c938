//! Messages exchanged between the judge daemon and the sandbox workers.
//!
//! Requests travel on the shared task stream inside a [`TaskEnvelope`];
//! replies are pushed onto the per-request reply list named by `reply_to`.
//! Both are encoded with MessagePack so byte buffers survive unchanged.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::test_data::FileIo;
use crate::types::{TaskStatus, Verdict};

/// Compile `code` and publish the artifact under `binary_name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileTask {
    pub code: String,
    pub language: String,
    pub binary_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationResult {
    pub status: TaskStatus,
    #[serde(default)]
    pub message: String,
}

impl CompilationResult {
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Done,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            message: message.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }
}

/// Run a compiled binary against one test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTask {
    pub binary_name: String,
    /// Problem store reference of the input file
    pub input: String,
    /// Problem store reference of the answer file
    pub answer: String,
    /// Time limit in milliseconds
    pub time_limit: u64,
    /// Memory limit in megabytes
    pub memory_limit: u64,
    #[serde(default)]
    pub file_io: Option<FileIo>,
    /// Compiled special judge, if the problem has one
    #[serde(default)]
    pub spj_binary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub result: Verdict,
    /// Milliseconds
    pub time: u64,
    /// Kibibytes
    pub memory: u64,
    #[serde(default)]
    pub user_output: Option<String>,
    #[serde(default)]
    pub user_error: Option<String>,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub spj_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcRequest {
    Compile(CompileTask),
    RunStandard(RunTask),
}

impl RpcRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            RpcRequest::Compile(_) => "compile",
            RpcRequest::RunStandard(_) => "run_standard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcResult {
    Compiled(CompilationResult),
    Ran(RunResult),
}

/// A reply pushed by a worker. `Started` arrives at most once, before the
/// terminal `Finished` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcReply {
    Started,
    Finished(RpcResult),
    Error(String),
}

impl RpcReply {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RpcReply::Started)
    }

    pub fn encode(&self) -> AppResult<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(bytes: &[u8]) -> AppResult<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// A request tagged with its correlation id and reply destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub correlation_id: Uuid,
    pub reply_to: String,
    #[serde(default)]
    pub priority: u8,
    pub request: RpcRequest,
}

impl TaskEnvelope {
    pub fn encode(&self) -> AppResult<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(bytes: &[u8]) -> AppResult<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
