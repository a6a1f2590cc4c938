//! Task stream consumer.
//!
//! Each entry on the task stream carries a [`TaskEnvelope`]. The worker
//! takes a sandbox slot before reading, announces `Started` on the entry's
//! reply list, runs the request and pushes the terminal reply. The entry is
//! acknowledged only after that reply is stored, so a worker dying halfway
//! leaves the entry pending for another worker to claim.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use deadpool_redis::redis;
use tokio::task::JoinSet;

use olympus_common::rpc::{RpcReply, RpcRequest, RpcResult, TaskEnvelope};
use olympus_common::stream::{StreamEntry, claim_abandoned, ensure_group, parse_read_reply};

use crate::compiler::Compiler;
use crate::config::Config;
use crate::runner::Runner;
use crate::sandbox::SandboxError;
use crate::slots::{SlotGuard, SlotPool};

/// Pending entries idle for longer than this are taken over at start
const CLAIM_MIN_IDLE_MS: u64 = 60_000;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, request: &RpcRequest, slot: &SlotGuard) -> Result<RpcResult>;
}

/// Dispatches requests to the compiler and the runner
pub struct Executor {
    compiler: Compiler,
    runner: Runner,
}

impl Executor {
    pub fn new(compiler: Compiler, runner: Runner) -> Self {
        Self { compiler, runner }
    }
}

#[async_trait]
impl TaskHandler for Executor {
    async fn handle(&self, request: &RpcRequest, slot: &SlotGuard) -> Result<RpcResult> {
        match request {
            RpcRequest::Compile(task) => Ok(RpcResult::Compiled(
                self.compiler.compile(task, slot).await?,
            )),
            RpcRequest::RunStandard(task) => Ok(RpcResult::Ran(
                self.runner.judge_standard(task, slot).await?,
            )),
        }
    }
}

fn is_transient(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<SandboxError>()
            .is_some_and(SandboxError::is_transient)
    })
}

/// Run `request`, retrying in place while the sandbox reports a transient
/// fault. Every other failure becomes an error reply.
pub async fn execute_with_retry(
    handler: &dyn TaskHandler,
    request: &RpcRequest,
    slot: &SlotGuard,
    max_retries: u32,
) -> RpcReply {
    let mut retries = 0;
    loop {
        match handler.handle(request, slot).await {
            Ok(result) => return RpcReply::Finished(result),
            Err(e) if is_transient(&e) && retries < max_retries => {
                retries += 1;
                tracing::warn!(retries, "Transient sandbox failure, retrying: {:#}", e);
            }
            Err(e) => {
                tracing::error!("Task failed: {:#}", e);
                return RpcReply::Error(format!("{:#}", e));
            }
        }
    }
}

/// Reply destination and request of a stream entry
fn parse_envelope(entry: &StreamEntry) -> Result<TaskEnvelope> {
    let payload = entry.field("payload")?;
    TaskEnvelope::decode(payload).context("Invalid task payload")
}

#[derive(Clone)]
pub struct Worker {
    config: Arc<Config>,
    redis_pool: deadpool_redis::Pool,
    slots: SlotPool,
    handler: Arc<dyn TaskHandler>,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        config: Config,
        redis_pool: deadpool_redis::Pool,
        slots: SlotPool,
        handler: Arc<dyn TaskHandler>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            redis_pool,
            slots,
            handler,
            shutdown,
        }
    }

    /// Initialize consumer group
    pub async fn initialize(&self) -> Result<()> {
        let mut conn = self.redis_pool.get().await?;
        ensure_group(&mut conn, &self.config.task_stream, &self.config.consumer_group).await?;
        Ok(())
    }

    /// Run the consumer loop until shutdown, then wait for running tasks
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            "Starting worker '{}' in group '{}' with {} sandbox slots",
            self.config.consumer_name,
            self.config.consumer_group,
            self.slots.available()
        );

        let mut tasks = JoinSet::new();
        if let Err(e) = self.claim_pending_messages(&mut tasks).await {
            tracing::error!("Failed to claim pending tasks: {:#}", e);
        }

        while !self.shutdown.load(Ordering::SeqCst) {
            let slot = self.slots.acquire().await?;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.read_next().await {
                Ok(Some(entry)) => {
                    let worker = self.clone();
                    tasks.spawn(async move { worker.handle_entry(entry, slot).await });
                }
                Ok(None) => {}
                Err(e) => {
                    let err_msg = format!("{:#}", e);
                    tracing::error!("Error reading task stream: {}", err_msg);

                    if err_msg.contains("NOGROUP") {
                        tracing::warn!("Consumer group missing, re-initializing...");
                        if let Err(init_err) = self.initialize().await {
                            tracing::error!("Failed to re-initialize consumer group: {}", init_err);
                        }
                    }

                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!("Task handler panicked: {}", e);
                }
            }
        }

        tracing::info!("Worker shutting down, waiting for {} running tasks", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Task handler panicked: {}", e);
            }
        }
        Ok(())
    }

    /// Take over tasks abandoned by dead workers
    async fn claim_pending_messages(&self, tasks: &mut JoinSet<()>) -> Result<()> {
        let mut conn = self.redis_pool.get().await?;
        let claimed = claim_abandoned(
            &mut conn,
            &self.config.task_stream,
            &self.config.consumer_group,
            &self.config.consumer_name,
            CLAIM_MIN_IDLE_MS,
        )
        .await?;
        drop(conn);

        if !claimed.is_empty() {
            tracing::info!("Claimed {} abandoned tasks", claimed.len());
        }
        for entry in claimed {
            let slot = self.slots.acquire().await?;
            let worker = self.clone();
            tasks.spawn(async move { worker.handle_entry(entry, slot).await });
        }
        Ok(())
    }

    async fn read_next(&self) -> Result<Option<StreamEntry>> {
        let mut conn = self.redis_pool.get().await?;

        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_timeout_ms)
            .arg("STREAMS")
            .arg(&self.config.task_stream)
            .arg(">")
            .query_async(&mut *conn)
            .await?;

        Ok(parse_read_reply(&reply)?.into_iter().next())
    }

    async fn handle_entry(&self, entry: StreamEntry, slot: SlotGuard) {
        let envelope = match parse_envelope(&entry) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(message_id = %entry.id, "Rejecting task: {:#}", e);
                drop(slot);
                if let Ok(reply_to) = entry.field_str("reply_to") {
                    let reply = RpcReply::Error(format!("{:#}", e));
                    if let Err(e) = self.send_reply(&reply_to, &reply).await {
                        tracing::error!(message_id = %entry.id, "Failed to reply: {:#}", e);
                        return;
                    }
                }
                self.ack(&entry.id).await;
                return;
            }
        };

        let correlation_id = envelope.correlation_id;
        tracing::info!(
            correlation_id = %correlation_id,
            message_id = %entry.id,
            slot = slot.index(),
            "Processing {} task",
            envelope.request.kind()
        );

        if let Err(e) = self.send_reply(&envelope.reply_to, &RpcReply::Started).await {
            tracing::warn!(correlation_id = %correlation_id, "Failed to announce start: {:#}", e);
        }

        let reply = execute_with_retry(
            self.handler.as_ref(),
            &envelope.request,
            &slot,
            self.config.max_transient_retries,
        )
        .await;
        drop(slot);

        if let Err(e) = self.send_reply(&envelope.reply_to, &reply).await {
            // left pending, another worker will claim it
            tracing::error!(correlation_id = %correlation_id, "Failed to send reply: {:#}", e);
            return;
        }
        tracing::debug!(correlation_id = %correlation_id, "Task finished");
        self.ack(&entry.id).await;
    }

    async fn send_reply(&self, reply_to: &str, reply: &RpcReply) -> Result<()> {
        let payload = reply.encode()?;
        let mut conn = self.redis_pool.get().await?;

        let _: () = redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(reply_to)
            .arg(payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(reply_to)
            .arg(self.config.reply_ttl_secs)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn ack(&self, message_id: &str) {
        let acked = async {
            let mut conn = self.redis_pool.get().await?;
            redis::cmd("XACK")
                .arg(&self.config.task_stream)
                .arg(&self.config.consumer_group)
                .arg(message_id)
                .query_async::<i64>(&mut *conn)
                .await?;
            anyhow::Ok(())
        }
        .await;

        if let Err(e) = acked {
            tracing::error!(message_id = %message_id, "Failed to ack task: {:#}", e);
        }
    }
}
