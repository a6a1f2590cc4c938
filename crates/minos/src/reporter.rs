//! Progress and result reporting.

use async_trait::async_trait;
use deadpool_redis::redis;

use olympus_common::JudgeTask;

/// Receives judge task snapshots. Reports are fire-and-forget: failures are
/// logged and never fail the judging.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report_progress(&self, task: &JudgeTask);
    async fn report_result(&self, task: &JudgeTask);
}

/// Publishes reports to a Redis stream for the result store to consume
#[derive(Clone)]
pub struct RedisReporter {
    pool: deadpool_redis::Pool,
    stream: String,
}

impl RedisReporter {
    pub fn new(pool: deadpool_redis::Pool, stream: impl Into<String>) -> Self {
        Self {
            pool,
            stream: stream.into(),
        }
    }

    async fn publish(&self, kind: &str, task: &JudgeTask) -> anyhow::Result<()> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.pool.get().await?;

        redis::cmd("XADD")
            .arg(&self.stream)
            .arg("*")
            .arg("task_id")
            .arg(&task.task_id)
            .arg("kind")
            .arg(kind)
            .arg("status")
            .arg(task.judge_state.status.to_string())
            .arg("payload")
            .arg(payload)
            .query_async::<String>(&mut *conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Reporter for RedisReporter {
    async fn report_progress(&self, task: &JudgeTask) {
        tracing::trace!(task_id = %task.task_id, "Reporting progress");
        if let Err(e) = self.publish("progress", task).await {
            tracing::warn!(task_id = %task.task_id, "Failed to report progress: {}", e);
        }
    }

    async fn report_result(&self, task: &JudgeTask) {
        tracing::debug!(
            task_id = %task.task_id,
            status = %task.judge_state.status,
            score = task.score,
            "Reporting result"
        );
        if let Err(e) = self.publish("result", task).await {
            tracing::error!(task_id = %task.task_id, "Failed to report result: {}", e);
        }
    }
}
