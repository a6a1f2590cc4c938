//! Redis Stream consumer for judge tasks

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context as _, Result};
use deadpool_redis::redis;

use olympus_common::stream::{StreamEntry, claim_abandoned, ensure_group, parse_read_reply};
use olympus_common::{JudgeState, JudgeStatus, JudgeTask};

use crate::config::Config;
use crate::context::Context;
use crate::judger;

/// Pending entries idle for longer than this are taken over at start
const CLAIM_MIN_IDLE_MS: u64 = 60_000;

/// Judge consumer that processes tasks from the judge stream one at a time
pub struct JudgeConsumer {
    config: Config,
    redis_pool: deadpool_redis::Pool,
    shutdown: Arc<AtomicBool>,
    ctx: Context,
}

impl JudgeConsumer {
    pub fn new(
        config: Config,
        redis_pool: deadpool_redis::Pool,
        shutdown: Arc<AtomicBool>,
        ctx: Context,
    ) -> Self {
        Self {
            config,
            redis_pool,
            shutdown,
            ctx,
        }
    }

    /// Initialize consumer group
    pub async fn initialize(&self) -> Result<()> {
        let mut conn = self.redis_pool.get().await?;
        ensure_group(&mut conn, &self.config.judge_stream, &self.config.consumer_group).await?;
        Ok(())
    }

    /// Run the consumer loop
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(
            "Starting judge consumer '{}' in group '{}'",
            self.config.worker_id,
            self.config.consumer_group
        );

        if let Err(e) = self.claim_pending_messages().await {
            if e.to_string().contains("NOGROUP") {
                tracing::warn!("Consumer group not found during pending-claim, re-initializing...");
                self.initialize().await?;
            } else {
                return Err(e);
            }
        }

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.process_next_task().await {
                Ok(_) => {}
                Err(e) => {
                    let err_msg = format!("{:#}", e);
                    tracing::error!("Error processing judge task: {}", err_msg);

                    if err_msg.contains("NOGROUP") {
                        tracing::warn!("Consumer group missing, re-initializing...");
                        if let Err(init_err) = self.initialize().await {
                            tracing::error!("Failed to re-initialize consumer group: {}", init_err);
                        }
                    }

                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        tracing::info!("Judge consumer shutting down");
        Ok(())
    }

    /// Take over and judge tasks abandoned by dead daemons
    async fn claim_pending_messages(&self) -> Result<()> {
        let mut conn = self.redis_pool.get().await?;
        let claimed = claim_abandoned(
            &mut conn,
            &self.config.judge_stream,
            &self.config.consumer_group,
            &self.config.worker_id,
            CLAIM_MIN_IDLE_MS,
        )
        .await?;
        drop(conn);

        for entry in claimed {
            self.handle_entry(entry).await?;
        }
        Ok(())
    }

    /// Process the next task from the stream. Returns whether one was found.
    async fn process_next_task(&self) -> Result<bool> {
        let mut conn = self.redis_pool.get().await?;

        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.worker_id)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_timeout_ms)
            .arg("STREAMS")
            .arg(&self.config.judge_stream)
            .arg(">")
            .query_async(&mut *conn)
            .await?;
        drop(conn);

        let entries = parse_read_reply(&reply)?;
        let found = !entries.is_empty();
        for entry in entries {
            self.handle_entry(entry).await?;
        }
        Ok(found)
    }

    async fn handle_entry(&self, entry: StreamEntry) -> Result<()> {
        let task = match parse_task(&entry) {
            Ok(task) => {
                tracing::info!(
                    task_id = %task.task_id,
                    problem_id = %task.problem_id,
                    message_id = %entry.id,
                    "Processing judge task"
                );
                judger::process(&self.ctx, task).await
            }
            Err(e) => {
                tracing::error!(message_id = %entry.id, "Rejecting judge task: {:#}", e);
                let rejected = rejected_task(&entry, &e);
                self.ctx.reporter.report_progress(&rejected).await;
                self.ctx.reporter.report_result(&rejected).await;
                rejected
            }
        };

        self.ack_message(&entry.id)
            .await
            .with_context(|| format!("Failed to ack task {}", task.task_id))?;
        Ok(())
    }

    /// Acknowledge a message
    async fn ack_message(&self, message_id: &str) -> Result<()> {
        let mut conn = self.redis_pool.get().await?;

        redis::cmd("XACK")
            .arg(&self.config.judge_stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<i64>(&mut *conn)
            .await?;

        Ok(())
    }
}

fn parse_task(entry: &StreamEntry) -> Result<JudgeTask> {
    let raw = entry.field("task")?;
    serde_json::from_slice(raw).context("Invalid judge task")
}

/// Build a `SystemError` report for a task that could not be parsed,
/// keeping whatever identifiers could be recovered.
fn rejected_task(entry: &StreamEntry, error: &anyhow::Error) -> JudgeTask {
    let raw: serde_json::Value = entry
        .field("task")
        .ok()
        .and_then(|raw| serde_json::from_slice(raw).ok())
        .unwrap_or_default();
    let field = |name: &str| {
        raw.get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let mut judge_state = JudgeState::default();
    judge_state.fail(
        JudgeStatus::SystemError,
        format!("An error occurred.\n{:#}", error),
    );

    JudgeTask {
        priority: 0,
        task_id: field("task_id"),
        problem_id: field("problem_id"),
        kind: Default::default(),
        code: String::new(),
        language: field("language"),
        score: 0,
        judge_state,
    }
}
