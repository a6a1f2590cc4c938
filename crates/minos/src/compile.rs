//! Compile cache with per-fingerprint deduplication.
//!
//! Identical (source, language) pairs share one artifact. The first caller
//! to take the fingerprint lock dispatches the compile; callers arriving
//! later either see the published artifact immediately or wait on the lock
//! and see it then. Failed compilations are not cached.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};

use olympus_common::cache::{ArtifactStore, fingerprint};
use olympus_common::lock::{DistributedLock, with_lock};
use olympus_common::rpc::{CompilationResult, CompileTask, RpcRequest};

use crate::channel::TaskChannel;

#[derive(Clone)]
pub struct CompileService {
    channel: Arc<dyn TaskChannel>,
    artifacts: Arc<dyn ArtifactStore>,
    lock: Arc<dyn DistributedLock>,
    lock_ttl: Duration,
}

impl CompileService {
    pub fn new(
        channel: Arc<dyn TaskChannel>,
        artifacts: Arc<dyn ArtifactStore>,
        lock: Arc<dyn DistributedLock>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            channel,
            artifacts,
            lock,
            lock_ttl,
        }
    }

    /// Compile `code`, returning the artifact name and the outcome
    pub async fn compile(
        &self,
        code: &str,
        language: &str,
        priority: u8,
    ) -> Result<(String, CompilationResult)> {
        let name = fingerprint(code, language);
        tracing::debug!(fingerprint = %name, "Compiling code");

        let result = with_lock(self.lock.as_ref(), &name, self.lock_ttl, || async {
            if self.artifacts.exists(&name).await? {
                tracing::debug!(fingerprint = %name, "Binary already exists");
                return Ok(CompilationResult::done(""));
            }

            let task = CompileTask {
                code: code.to_string(),
                language: language.to_string(),
                binary_name: name.clone(),
            };
            let dispatched = self
                .channel
                .dispatch(RpcRequest::Compile(task), priority)
                .await?;
            dispatched.compiled().await
        })
        .await
        .with_context(|| format!("Failed to lock {}", name))??;

        if !result.is_done() {
            tracing::debug!(fingerprint = %name, "Compilation failed");
        }
        Ok((name, result))
    }
}
