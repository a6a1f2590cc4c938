//! In-memory stand-ins for the daemon's collaborators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use uuid::Uuid;

use olympus_common::JudgeTask;
use olympus_common::cache::{ArtifactStore, BinaryMetadata, MemoryArtifactStore};
use olympus_common::lock::LocalLock;
use olympus_common::rpc::{CompilationResult, RpcRequest, RpcResult, RunResult, RunTask};
use olympus_common::store::ProblemStore;
use olympus_common::types::Verdict;

use crate::channel::{Dispatched, TaskChannel};
use crate::compile::CompileService;
use crate::context::Context;
use crate::reporter::Reporter;

/// Keeps every snapshot it is handed
#[derive(Default)]
pub struct RecordingReporter {
    pub progress: StdMutex<Vec<JudgeTask>>,
    pub results: StdMutex<Vec<JudgeTask>>,
}

impl RecordingReporter {
    pub fn progress_count(&self) -> usize {
        self.progress.lock().unwrap().len()
    }

    pub fn last_result(&self) -> Option<JudgeTask> {
        self.results.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report_progress(&self, task: &JudgeTask) {
        self.progress.lock().unwrap().push(task.clone());
    }

    async fn report_result(&self, task: &JudgeTask) {
        self.results.lock().unwrap().push(task.clone());
    }
}

/// Worker pool stand-in.
///
/// Compiles succeed unless the source contains `compile error`. Runs answer
/// with the verdict scripted for the input reference (Accepted otherwise).
#[derive(Default)]
pub struct ScriptedWorker {
    pub artifacts: MemoryArtifactStore,
    pub verdicts: HashMap<String, Verdict>,
    pub run_delay: Duration,
    pub compiles: StdMutex<Vec<String>>,
    pub runs: StdMutex<Vec<RunTask>>,
}

impl ScriptedWorker {
    pub fn with_verdicts(verdicts: &[(&str, Verdict)]) -> Self {
        Self {
            verdicts: verdicts
                .iter()
                .map(|(input, v)| (input.to_string(), *v))
                .collect(),
            ..Self::default()
        }
    }

    pub fn compile_count(&self) -> usize {
        self.compiles.lock().unwrap().len()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskChannel for ScriptedWorker {
    async fn dispatch(&self, request: RpcRequest, _priority: u8) -> Result<Dispatched> {
        let (dispatched, mut sink) = Dispatched::pair(Uuid::new_v4());

        match request {
            RpcRequest::Compile(task) => {
                self.compiles.lock().unwrap().push(task.binary_name.clone());
                let result = if task.code.contains("compile error") {
                    CompilationResult::failed("a.cpp:1:1: error: expected ';'")
                } else {
                    let metadata = BinaryMetadata {
                        language: task.language,
                        code: task.code,
                    };
                    self.artifacts
                        .put(&task.binary_name, Vec::new(), metadata)
                        .await?;
                    CompilationResult::done("")
                };
                sink.finish(Ok(RpcResult::Compiled(result)));
            }
            RpcRequest::RunStandard(task) => {
                if !self.artifacts.exists(&task.binary_name).await? {
                    bail!("Redis record {}:binary unavailable.", task.binary_name);
                }
                self.runs.lock().unwrap().push(task.clone());
                let verdict = self
                    .verdicts
                    .get(&task.input)
                    .copied()
                    .unwrap_or(Verdict::Accepted);
                let delay = self.run_delay;
                tokio::spawn(async move {
                    sink.started();
                    tokio::time::sleep(delay).await;
                    sink.finish(Ok(RpcResult::Ran(RunResult {
                        result: verdict,
                        time: 5,
                        memory: 2048,
                        user_output: Some("3\n".to_string()),
                        user_error: None,
                        system_message: Some("Exited with return code 0".to_string()),
                        spj_message: None,
                    })));
                });
            }
        }
        Ok(dispatched)
    }
}

pub fn context(
    store: impl ProblemStore + 'static,
    worker: Arc<ScriptedWorker>,
    reporter: Arc<RecordingReporter>,
) -> Context {
    let compiler = CompileService::new(
        worker.clone(),
        Arc::new(worker.artifacts.clone()),
        Arc::new(LocalLock::new()),
        Duration::from_secs(5),
    );
    Context {
        store: Arc::new(store),
        channel: worker,
        compiler,
        reporter,
        data_display_limit: 128,
    }
}
