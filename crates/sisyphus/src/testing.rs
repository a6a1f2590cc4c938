//! Scripted sandbox for the worker's unit tests.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use olympus_common::cache::MemoryArtifactStore;
use olympus_common::lock::LocalLock;

use crate::binary::BinaryCache;
use crate::config::WorkerLimits;
use crate::sandbox::{
    Sandbox, SandboxError, SandboxHandle, SandboxParameter, SandboxResult, SandboxStatus,
};

type Script = dyn Fn(&SandboxParameter) -> Result<SandboxResult, SandboxError> + Send + Sync;

/// Runs `script` instead of a process. The script plays the program by
/// writing files through [`SandboxParameter::host_path`].
pub struct FakeSandbox {
    script: Box<Script>,
    pub calls: Mutex<Vec<SandboxParameter>>,
}

impl FakeSandbox {
    pub fn new(
        script: impl Fn(&SandboxParameter) -> Result<SandboxResult, SandboxError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn start(&self, param: SandboxParameter) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        self.calls.lock().unwrap().push(param.clone());
        let result = (self.script)(&param)?;
        Ok(Box::new(FakeHandle { result }))
    }
}

struct FakeHandle {
    result: SandboxResult,
}

#[async_trait]
impl SandboxHandle for FakeHandle {
    async fn wait_for_stop(&mut self) -> Result<SandboxResult, SandboxError> {
        Ok(self.result)
    }

    async fn stop(&mut self) {
        self.result.status = SandboxStatus::Cancelled;
    }
}

/// A 5 ms, 2 MiB run ending with `status`
pub fn finished(status: SandboxStatus, code: i32) -> SandboxResult {
    SandboxResult {
        status,
        code,
        time: 5_000_000,
        memory: 2 << 20,
    }
}

pub fn exited(code: i32) -> SandboxResult {
    finished(SandboxStatus::Ok, code)
}

/// Write a file the way the sandboxed program would see it
pub fn write(param: &SandboxParameter, path: &str, contents: impl AsRef<[u8]>) {
    std::fs::write(param.host_path(path).unwrap(), contents).unwrap();
}

pub fn limits() -> WorkerLimits {
    WorkerLimits {
        data_display_limit: 128,
        stderr_display_limit: 5120,
        compiler_message_limit: 51200,
        output_limit: 1024,
        spj_time_limit: 1500,
        spj_memory_limit: 256,
    }
}

/// Binary cache over an in-memory store, unpacking under `dir`
pub fn binary_cache(dir: &Path) -> (Arc<MemoryArtifactStore>, Arc<BinaryCache>) {
    let store = Arc::new(MemoryArtifactStore::new());
    let cache = BinaryCache::new(
        store.clone(),
        Arc::new(LocalLock::new()),
        dir.join("binaries"),
        Duration::from_secs(5),
    );
    (store, Arc::new(cache))
}

/// Publish a fake build of `code`
pub async fn publish(cache: &BinaryCache, scratch: &Path, name: &str, language: &str, code: &str) {
    let dir = scratch.join(format!("build-{}", name));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(dir.join("a.out"), code).await.unwrap();
    cache.push(name, language, code, &dir).await.unwrap();
}
