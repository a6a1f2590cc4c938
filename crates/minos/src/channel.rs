//! Client half of the task channel.
//!
//! A request is published to the shared work stream with a fresh
//! correlation id and a private reply list. A background listener drains
//! the reply list and resolves the two phases of a [`Dispatched`] call:
//! an optional "started" signal, then the terminal outcome.

use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use async_trait::async_trait;
use deadpool_redis::redis;
use tokio::sync::oneshot;
use uuid::Uuid;

use olympus_common::rpc::{
    CompilationResult, RpcReply, RpcRequest, RpcResult, RunResult, TaskEnvelope,
};
use olympus_common::utils::random_hex;

/// Ships requests to the worker pool
#[async_trait]
pub trait TaskChannel: Send + Sync {
    async fn dispatch(&self, request: RpcRequest, priority: u8) -> Result<Dispatched>;
}

/// An in-flight request
#[derive(Debug)]
pub struct Dispatched {
    pub correlation_id: Uuid,
    started: Option<oneshot::Receiver<()>>,
    outcome: oneshot::Receiver<Result<RpcResult, String>>,
}

/// Producer side of a [`Dispatched`], driven by whoever reads the replies
#[derive(Debug)]
pub struct ReplySink {
    started: Option<oneshot::Sender<()>>,
    outcome: oneshot::Sender<Result<RpcResult, String>>,
}

impl Dispatched {
    pub fn pair(correlation_id: Uuid) -> (Dispatched, ReplySink) {
        let (started_tx, started_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        (
            Dispatched {
                correlation_id,
                started: Some(started_rx),
                outcome: outcome_rx,
            },
            ReplySink {
                started: Some(started_tx),
                outcome: outcome_tx,
            },
        )
    }

    /// Wait for the worker to pick the request up.
    ///
    /// Returns `false` when the request finished without announcing a start,
    /// or when the signal was already consumed.
    pub async fn started(&mut self) -> bool {
        match self.started.take() {
            Some(rx) => rx.await.is_ok(),
            None => false,
        }
    }

    /// Wait for the terminal reply
    pub async fn outcome(self) -> Result<RpcResult> {
        match self.outcome.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(anyhow!(message)),
            Err(_) => bail!("Reply channel of task {} closed", self.correlation_id),
        }
    }

    pub async fn compiled(self) -> Result<CompilationResult> {
        match self.outcome().await? {
            RpcResult::Compiled(result) => Ok(result),
            other => bail!("Expected a compilation result, got {:?}", other),
        }
    }

    pub async fn ran(self) -> Result<RunResult> {
        match self.outcome().await? {
            RpcResult::Ran(result) => Ok(result),
            other => bail!("Expected a run result, got {:?}", other),
        }
    }
}

impl ReplySink {
    /// Signal a start. Later calls are ignored.
    pub fn started(&mut self) {
        if let Some(tx) = self.started.take() {
            let _ = tx.send(());
        }
    }

    /// Resolve the outcome. A pending start signal resolves to `false`.
    pub fn finish(self, outcome: Result<RpcResult, String>) {
        let _ = self.outcome.send(outcome);
    }

    /// Whether the caller stopped waiting for the outcome
    pub fn is_abandoned(&self) -> bool {
        self.outcome.is_closed()
    }

    /// Feed one reply; returns the sink back while more replies are expected
    pub fn accept(mut self, reply: RpcReply) -> Option<Self> {
        match reply {
            RpcReply::Started => {
                self.started();
                Some(self)
            }
            RpcReply::Finished(result) => {
                self.finish(Ok(result));
                None
            }
            RpcReply::Error(message) => {
                self.finish(Err(message));
                None
            }
        }
    }
}

/// Task channel over Redis: `XADD` to the work stream, replies via `BLPOP`.
///
/// Listeners take their connections from `reply_pool` only.
#[derive(Clone)]
pub struct RedisTaskChannel {
    pool: deadpool_redis::Pool,
    reply_pool: deadpool_redis::Pool,
    task_stream: String,
}

/// How long one `BLPOP` waits before the listener checks on its caller
const REPLY_POLL_SECS: u64 = 1;

impl RedisTaskChannel {
    pub fn new(
        pool: deadpool_redis::Pool,
        reply_pool: deadpool_redis::Pool,
        task_stream: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            reply_pool,
            task_stream: task_stream.into(),
        }
    }

    async fn listen(pool: deadpool_redis::Pool, reply_to: String, mut sink: ReplySink) {
        loop {
            if sink.is_abandoned() {
                tracing::debug!(reply_to = %reply_to, "Caller went away, dropping reply listener");
                break;
            }

            let popped: Result<Option<(String, Vec<u8>)>> = async {
                let mut conn = pool.get().await?;
                let value = redis::cmd("BLPOP")
                    .arg(&reply_to)
                    .arg(REPLY_POLL_SECS)
                    .query_async(&mut *conn)
                    .await?;
                Ok(value)
            }
            .await;

            let payload = match popped {
                Ok(Some((_, payload))) => payload,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(reply_to = %reply_to, "Failed to read reply: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let reply = match RpcReply::decode(&payload) {
                Ok(reply) => reply,
                Err(e) => {
                    sink.finish(Err(format!("Malformed reply: {}", e)));
                    break;
                }
            };
            tracing::debug!(reply_to = %reply_to, terminal = reply.is_terminal(), "Got reply");

            match sink.accept(reply) {
                Some(rest) => sink = rest,
                None => break,
            }
        }

        if let Ok(mut conn) = pool.get().await {
            let _: redis::RedisResult<i64> =
                redis::cmd("DEL").arg(&reply_to).query_async(&mut *conn).await;
        }
    }
}

#[async_trait]
impl TaskChannel for RedisTaskChannel {
    async fn dispatch(&self, request: RpcRequest, priority: u8) -> Result<Dispatched> {
        let correlation_id = Uuid::new_v4();
        let reply_to = format!("reply.{}", random_hex(20));
        let kind = request.kind();

        let envelope = TaskEnvelope {
            correlation_id,
            reply_to: reply_to.clone(),
            priority,
            request,
        };
        let payload = envelope.encode()?;

        let mut conn = self.pool.get().await.context("Failed to get Redis connection")?;
        redis::cmd("XADD")
            .arg(&self.task_stream)
            .arg("*")
            .arg("correlation_id")
            .arg(correlation_id.to_string())
            .arg("reply_to")
            .arg(&reply_to)
            .arg("payload")
            .arg(payload)
            .query_async::<String>(&mut *conn)
            .await
            .with_context(|| format!("Failed to publish {} task", kind))?;

        tracing::debug!(
            correlation_id = %correlation_id,
            priority,
            "Dispatched {} task",
            kind
        );

        let (dispatched, sink) = Dispatched::pair(correlation_id);
        tokio::spawn(Self::listen(self.reply_pool.clone(), reply_to, sink));
        Ok(dispatched)
    }
}
