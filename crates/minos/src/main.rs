//! Minos - Judge Daemon for Olympus
//!
//! Consumes judge tasks from a Redis Stream, compiles submissions through
//! the shared compile cache, fans test cases out to the sisyphus workers
//! and reports progress and results.

mod channel;
mod compile;
mod config;
mod consumer;
mod context;
mod judger;
mod reporter;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use olympus_common::cache::RedisArtifactStore;
use olympus_common::lock::RedisLock;
use olympus_common::store::FsProblemStore;

use crate::channel::RedisTaskChannel;
use crate::compile::CompileService;
use crate::config::Config;
use crate::consumer::JudgeConsumer;
use crate::context::Context;
use crate::reporter::RedisReporter;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "minos=debug,olympus_common=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn create_pool(url: &str, max_size: usize) -> Result<deadpool_redis::Pool> {
    let mut cfg = deadpool_redis::Config::from_url(url);
    cfg.pool = Some(deadpool_redis::PoolConfig::new(max_size));
    Ok(cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting Minos Judge Daemon");

    // Load configuration
    let config = Config::from_env();
    tracing::info!("Worker ID: {}", config.worker_id);

    // Create Redis pool
    tracing::info!("Connecting to Redis...");
    let redis_pool = create_pool(&config.redis_url, config.redis_pool_size)?;
    // every in-flight case polls its reply list on a connection of its own
    let reply_pool = create_pool(&config.redis_url, config.reply_pool_size)?;
    tracing::info!("Redis connected");

    let channel = Arc::new(RedisTaskChannel::new(
        redis_pool.clone(),
        reply_pool,
        &config.task_stream,
    ));
    let compiler = CompileService::new(
        channel.clone(),
        Arc::new(RedisArtifactStore::new(redis_pool.clone())),
        Arc::new(RedisLock::new(
            redis_pool.clone(),
            config.lock.retry_count,
            config.lock.retry_delay,
        )),
        config.compile_lock_ttl,
    );
    let ctx = Context {
        store: Arc::new(FsProblemStore::new(&config.testdata_path)),
        channel,
        compiler,
        reporter: Arc::new(RedisReporter::new(redis_pool.clone(), &config.report_stream)),
        data_display_limit: config.data_display_limit,
    };

    // Create shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // Setup signal handlers
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        tracing::info!("Shutdown signal received, finishing current task...");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    // Create and initialize consumer
    let mut consumer = JudgeConsumer::new(config, redis_pool, shutdown, ctx);
    consumer.initialize().await?;

    tracing::info!("Minos ready, starting judge consumer loop");
    consumer.run().await?;

    tracing::info!("Minos shutdown complete");
    Ok(())
}
