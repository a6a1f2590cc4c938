//! Compiled artifact cache, keyed by source fingerprint.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::redis;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::utils::hash_string;

/// Cache key of a (source, language) pair
pub fn fingerprint(code: &str, language: &str) -> String {
    format!("src-{}{}", language, hash_string(code))
}

/// What an artifact was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryMetadata {
    pub language: String,
    pub code: String,
}

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Whether a finished artifact is published under `name`
    async fn exists(&self, name: &str) -> AppResult<bool>;

    /// Publish a packed binary together with its metadata
    async fn put(&self, name: &str, binary: Vec<u8>, metadata: BinaryMetadata) -> AppResult<()>;

    async fn get_binary(&self, name: &str) -> AppResult<Vec<u8>>;

    async fn get_metadata(&self, name: &str) -> AppResult<BinaryMetadata>;
}

fn binary_key(name: &str) -> String {
    format!("{}:binary", name)
}

fn metadata_key(name: &str) -> String {
    format!("{}:metadata", name)
}

/// Artifact store kept in Redis. Entries are never evicted here.
#[derive(Clone)]
pub struct RedisArtifactStore {
    pool: deadpool_redis::Pool,
}

impl RedisArtifactStore {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self { pool }
    }

    async fn get_bytes(&self, key: &str) -> AppResult<Vec<u8>> {
        let mut conn = self.pool.get().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;
        value.ok_or_else(|| AppError::NotFound(format!("Redis record {} unavailable.", key)))
    }
}

#[async_trait]
impl ArtifactStore for RedisArtifactStore {
    async fn exists(&self, name: &str) -> AppResult<bool> {
        let mut conn = self.pool.get().await?;
        let count: i64 = redis::cmd("EXISTS")
            .arg(metadata_key(name))
            .query_async(&mut *conn)
            .await?;
        Ok(count > 0)
    }

    async fn put(&self, name: &str, binary: Vec<u8>, metadata: BinaryMetadata) -> AppResult<()> {
        let encoded = rmp_serde::to_vec_named(&metadata)?;
        let mut conn = self.pool.get().await?;

        // Metadata marks the entry as present, so both keys go in one
        // transaction.
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(binary_key(name))
            .arg(binary)
            .ignore()
            .cmd("SET")
            .arg(metadata_key(name))
            .arg(encoded)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        tracing::debug!("Published artifact {}", name);
        Ok(())
    }

    async fn get_binary(&self, name: &str) -> AppResult<Vec<u8>> {
        self.get_bytes(&binary_key(name)).await
    }

    async fn get_metadata(&self, name: &str) -> AppResult<BinaryMetadata> {
        let raw = self.get_bytes(&metadata_key(name)).await?;
        Ok(rmp_serde::from_slice(&raw)?)
    }
}

/// Artifact store held in process memory
#[derive(Default, Clone)]
pub struct MemoryArtifactStore {
    entries: Arc<Mutex<HashMap<String, (Vec<u8>, BinaryMetadata)>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, name: &str) -> AppResult<bool> {
        Ok(self.entries.lock().await.contains_key(name))
    }

    async fn put(&self, name: &str, binary: Vec<u8>, metadata: BinaryMetadata) -> AppResult<()> {
        self.entries
            .lock()
            .await
            .insert(name.to_string(), (binary, metadata));
        Ok(())
    }

    async fn get_binary(&self, name: &str) -> AppResult<Vec<u8>> {
        self.entries
            .lock()
            .await
            .get(name)
            .map(|(binary, _)| binary.clone())
            .ok_or_else(|| AppError::NotFound(format!("Artifact {} unavailable.", name)))
    }

    async fn get_metadata(&self, name: &str) -> AppResult<BinaryMetadata> {
        self.entries
            .lock()
            .await
            .get(name)
            .map(|(_, metadata)| metadata.clone())
            .ok_or_else(|| AppError::NotFound(format!("Artifact {} unavailable.", name)))
    }
}
