//! Sisyphus - Sandbox Worker for Olympus
//!
//! Consumes compile and run requests from the shared task stream, executes
//! them in isolate sandboxes and pushes replies to the requesting daemon.

mod binary;
mod compare;
mod compiler;
mod config;
mod fsutil;
mod languages;
mod runner;
mod sandbox;
mod slots;
#[cfg(test)]
mod testing;
mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use olympus_common::cache::RedisArtifactStore;
use olympus_common::lock::RedisLock;
use olympus_common::store::FsProblemStore;

use crate::binary::BinaryCache;
use crate::compiler::Compiler;
use crate::config::Config;
use crate::runner::Runner;
use crate::sandbox::IsolateSandbox;
use crate::slots::SlotPool;
use crate::worker::{Executor, Worker};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sisyphus=debug,olympus_common=info".into());

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

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting Sisyphus Sandbox Worker");

    // Load configuration
    let config = Config::from_env();
    tracing::info!("Consumer: {}", config.consumer_name);

    // Create Redis pool
    tracing::info!("Connecting to Redis...");
    let redis_cfg = deadpool_redis::Config::from_url(&config.redis_url);
    let redis_pool = redis_cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
    tracing::info!("Redis connected");

    let sandbox = Arc::new(IsolateSandbox::new(&config.sandbox.isolate_path));
    let binaries = Arc::new(BinaryCache::new(
        Arc::new(RedisArtifactStore::new(redis_pool.clone())),
        Arc::new(RedisLock::new(
            redis_pool.clone(),
            config.lock_retry_count,
            config.lock_retry_delay,
        )),
        &config.binary_directory,
        config.binary_lock_ttl,
    ));
    let executor = Executor::new(
        Compiler::new(
            sandbox.clone(),
            binaries.clone(),
            config.limits.compiler_message_limit,
            config.sandbox.do_not_use_x32_abi,
        ),
        Runner::new(
            sandbox,
            Arc::new(FsProblemStore::new(&config.testdata_path)),
            binaries,
            config.limits.clone(),
        ),
    );
    let slots = SlotPool::new(config.sandbox.slots, &config.working_directory);

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

        tracing::info!("Shutdown signal received, finishing running tasks...");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let worker = Worker::new(config, redis_pool, slots, Arc::new(executor), shutdown);
    worker.initialize().await?;

    tracing::info!("Sisyphus ready, starting worker loop");
    worker.run().await?;

    tracing::info!("Sisyphus shutdown complete");
    Ok(())
}
