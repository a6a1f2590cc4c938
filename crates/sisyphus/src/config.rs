//! Configuration for the Sisyphus sandbox worker.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Sisyphus configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL
    pub redis_url: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Consumer name (unique per instance)
    pub consumer_name: String,
    /// Shared work stream written by the judge daemons
    pub task_stream: String,
    /// Block timeout for XREADGROUP (milliseconds)
    pub block_timeout_ms: usize,
    /// Root of the per-slot scratch directories
    pub working_directory: PathBuf,
    /// Where fetched binaries are unpacked
    pub binary_directory: PathBuf,
    /// Root of the problem test data
    pub testdata_path: PathBuf,
    /// Seconds a reply list outlives its last reply
    pub reply_ttl_secs: u64,
    /// In-place retries of a task hitting a transient sandbox fault
    pub max_transient_retries: u32,
    /// Lease of the per-binary fetch lock
    pub binary_lock_ttl: Duration,
    /// Retry policy while another task holds a fetch lock
    pub lock_retry_delay: Duration,
    pub lock_retry_count: u32,
    pub sandbox: SandboxConfig,
    pub limits: WorkerLimits,
}

/// Sandbox slots and the isolate binary driving them
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Number of concurrent sandboxes, one isolate box each
    pub slots: usize,
    pub isolate_path: PathBuf,
    /// Build C++ without `-mx32`
    pub do_not_use_x32_abi: bool,
}

/// Display and resource limits applied to every task
#[derive(Debug, Clone)]
pub struct WorkerLimits {
    /// Bytes of user output returned with a result
    pub data_display_limit: usize,
    /// Bytes of stderr and special judge messages returned with a result
    pub stderr_display_limit: usize,
    /// Bytes of compiler output returned with a compilation result
    pub compiler_message_limit: usize,
    /// Ceiling on everything a program writes to its working directory
    pub output_limit: u64,
    /// Special judge time limit (milliseconds)
    pub spj_time_limit: u64,
    /// Special judge memory limit (megabytes)
    pub spj_memory_limit: u64,
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
            consumer_group: env::var("CONSUMER_GROUP")
                .unwrap_or_else(|_| "sisyphus_group".to_string()),
            consumer_name: env::var("CONSUMER_NAME")
                .unwrap_or_else(|_| format!("sisyphus_{}", uuid::Uuid::new_v4())),
            task_stream: env::var("TASK_STREAM").unwrap_or_else(|_| "judge_tasks".to_string()),
            block_timeout_ms: env_or("BLOCK_TIMEOUT_MS", 5000),
            working_directory: PathBuf::from(
                env::var("WORKING_DIRECTORY")
                    .unwrap_or_else(|_| "/var/lib/sisyphus/work".to_string()),
            ),
            binary_directory: PathBuf::from(
                env::var("BINARY_DIRECTORY")
                    .unwrap_or_else(|_| "/var/lib/sisyphus/binaries".to_string()),
            ),
            testdata_path: PathBuf::from(
                env::var("TESTDATA_PATH").unwrap_or_else(|_| "/mnt/data/testdata".to_string()),
            ),
            reply_ttl_secs: env_or("REPLY_TTL_SECS", 600),
            max_transient_retries: env_or("MAX_TRANSIENT_RETRIES", 5),
            binary_lock_ttl: Duration::from_millis(env_or("BINARY_LOCK_TTL_MS", 5000)),
            lock_retry_delay: Duration::from_millis(env_or("LOCK_RETRY_DELAY_MS", 200)),
            lock_retry_count: env_or("LOCK_RETRY_COUNT", 300),
            sandbox: SandboxConfig {
                slots: env_or("SANDBOX_SLOTS", 4),
                isolate_path: PathBuf::from(
                    env::var("ISOLATE_PATH").unwrap_or_else(|_| "isolate".to_string()),
                ),
                do_not_use_x32_abi: env::var("DO_NOT_USE_X32_ABI")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
            },
            limits: WorkerLimits {
                data_display_limit: env_or("DATA_DISPLAY_LIMIT", 128),
                stderr_display_limit: env_or("STDERR_DISPLAY_LIMIT", 5120),
                compiler_message_limit: env_or("COMPILER_MESSAGE_LIMIT", 51200),
                output_limit: env_or("OUTPUT_LIMIT", 104_857_600),
                spj_time_limit: env_or("SPJ_TIME_LIMIT", 1500),
                spj_memory_limit: env_or("SPJ_MEMORY_LIMIT", 256),
            },
        }
    }
}
