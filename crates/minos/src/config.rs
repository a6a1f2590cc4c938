//! Configuration for the Minos judge daemon

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Minos configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL
    pub redis_url: String,

    /// Maximum pooled Redis connections
    pub redis_pool_size: usize,

    /// Connections reserved for reply listeners, kept apart from the main
    /// pool so polling replies never starves dispatch or reporting
    pub reply_pool_size: usize,

    /// Worker ID for consumer group
    pub worker_id: String,

    /// Consumer group name
    pub consumer_group: String,

    /// Stream carrying judge tasks to this daemon
    pub judge_stream: String,

    /// Shared work stream read by the sisyphus workers
    pub task_stream: String,

    /// Stream receiving progress and result reports
    pub report_stream: String,

    /// Block timeout for XREADGROUP (milliseconds)
    pub block_timeout_ms: usize,

    /// Root of the problem test data
    pub testdata_path: PathBuf,

    /// Bytes of input/answer attached to each case detail
    pub data_display_limit: usize,

    /// Lease of the per-fingerprint compile lock
    pub compile_lock_ttl: Duration,

    pub lock: LockConfig,
}

/// How long a waiter keeps retrying a held lock
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub retry_delay: Duration,
    pub retry_count: u32,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            redis_pool_size: env_or("REDIS_POOL_SIZE", 64),
            reply_pool_size: env_or("REPLY_POOL_SIZE", 256),
            worker_id: env::var("WORKER_ID").unwrap_or_else(|_| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("minos_{}", &id[..8])
            }),
            consumer_group: env::var("CONSUMER_GROUP")
                .unwrap_or_else(|_| "minos_group".to_string()),
            judge_stream: env::var("JUDGE_STREAM")
                .unwrap_or_else(|_| "judge_queue".to_string()),
            task_stream: env::var("TASK_STREAM")
                .unwrap_or_else(|_| "judge_tasks".to_string()),
            report_stream: env::var("REPORT_STREAM")
                .unwrap_or_else(|_| "judge_reports".to_string()),
            block_timeout_ms: env_or("BLOCK_TIMEOUT_MS", 5000),
            testdata_path: PathBuf::from(
                env::var("TESTDATA_PATH").unwrap_or_else(|_| "/mnt/data/testdata".to_string()),
            ),
            data_display_limit: env_or("DATA_DISPLAY_LIMIT", 128),
            compile_lock_ttl: Duration::from_millis(env_or("COMPILE_LOCK_TTL_MS", 5000)),
            lock: LockConfig {
                retry_delay: Duration::from_millis(env_or("LOCK_RETRY_DELAY_MS", 200)),
                // enough to wait out a compile that overruns its lease
                retry_count: env_or("LOCK_RETRY_COUNT", 300),
            },
        }
    }
}
