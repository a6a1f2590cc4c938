//! Publishing compiled output to the artifact store and fetching it back.
//!
//! An artifact is the compiler's output directory as a gzipped tar. Workers
//! unpack it once into `{binary_directory}/{name}` and reuse that copy.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use olympus_common::cache::{ArtifactStore, BinaryMetadata};
use olympus_common::lock::{DistributedLock, with_lock};

use crate::fsutil;
use crate::languages::{Language, get_language};

/// A binary ready to run on this worker
pub struct FetchedBinary {
    pub directory: PathBuf,
    pub language: &'static dyn Language,
    /// Source it was built from, handed to special judges
    pub code: String,
}

pub struct BinaryCache {
    artifacts: Arc<dyn ArtifactStore>,
    lock: Arc<dyn DistributedLock>,
    directory: PathBuf,
    lock_ttl: Duration,
}

impl BinaryCache {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        lock: Arc<dyn DistributedLock>,
        directory: impl Into<PathBuf>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            artifacts,
            lock,
            directory: directory.into(),
            lock_ttl,
        }
    }

    /// Archive `dir` and publish it under `name`
    pub async fn push(&self, name: &str, language: &str, code: &str, dir: &Path) -> Result<()> {
        tracing::debug!(binary = %name, "Pushing binary, creating tar archive");
        let archive = pack(dir.to_path_buf()).await?;
        tracing::debug!(binary = %name, size = archive.len(), "Archive created");

        let metadata = BinaryMetadata {
            language: language.to_string(),
            code: code.to_string(),
        };
        self.artifacts.put(name, archive, metadata).await?;
        Ok(())
    }

    /// Make `name` available locally, downloading it if no other task has
    pub async fn fetch(&self, name: &str) -> Result<FetchedBinary> {
        tracing::debug!(binary = %name, "Fetching binary");
        let metadata = self
            .artifacts
            .get_metadata(name)
            .await
            .with_context(|| format!("Binary {} is not published", name))?;
        let language = get_language(&metadata.language)
            .ok_or_else(|| anyhow!("Binary {} has unknown language {}", name, metadata.language))?;

        tokio::fs::create_dir_all(&self.directory).await?;
        let target = self.directory.join(name);
        let lock_name = format!("{}-get.lock", target.display());

        with_lock(self.lock.as_ref(), &lock_name, self.lock_ttl, || async {
            if tokio::fs::try_exists(&target).await? {
                tracing::debug!(binary = %name, "Binary already fetched");
                return Ok(());
            }

            tracing::debug!(binary = %name, "Downloading binary");
            let unpacked = async {
                let archive = self.artifacts.get_binary(name).await?;
                tokio::fs::create_dir_all(&target).await?;
                unpack(archive, target.clone()).await
            }
            .await;

            if let Err(e) = &unpacked {
                tracing::error!(binary = %name, "Fetching binary failed: {:#}", e);
                fsutil::try_remove_dir(&target).await;
            }
            unpacked
        })
        .await??;

        Ok(FetchedBinary {
            directory: target,
            language,
            code: metadata.code,
        })
    }
}

async fn pack(dir: PathBuf) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        builder.mode(tar::HeaderMode::Deterministic);
        builder
            .append_dir_all(".", &dir)
            .context("failed to build tar")?;
        let mut encoder = builder.into_inner().context("failed to finalize tar")?;
        encoder.flush()?;
        encoder.finish().context("compression finalization failed")
    })
    .await?
}

async fn unpack(archive: Vec<u8>, target: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let decoder = flate2::bufread::GzDecoder::new(archive.as_slice());
        let mut archive = tar::Archive::new(decoder);
        archive.set_preserve_permissions(true);
        archive
            .unpack(&target)
            .with_context(|| format!("failed to unpack into {}", target.display()))
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use olympus_common::cache::{MemoryArtifactStore, MockArtifactStore};
    use olympus_common::lock::LocalLock;
    use olympus_common::{AppError, cache::fingerprint};

    fn cache(artifacts: Arc<dyn ArtifactStore>, dir: &Path) -> BinaryCache {
        BinaryCache::new(
            artifacts,
            Arc::new(LocalLock::new()),
            dir,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_push_then_fetch() {
        let scratch = tempfile::tempdir().unwrap();
        let bin = scratch.path().join("bin");
        tokio::fs::create_dir_all(bin.join("lib")).await.unwrap();
        tokio::fs::write(bin.join("a.out"), b"\x7fELF").await.unwrap();
        tokio::fs::write(bin.join("lib/data"), b"payload").await.unwrap();

        let store = Arc::new(MemoryArtifactStore::new());
        let cache = cache(store.clone(), &scratch.path().join("binaries"));
        let name = fingerprint("int main() {}", "cpp");

        cache.push(&name, "cpp", "int main() {}", &bin).await.unwrap();
        assert!(store.exists(&name).await.unwrap());

        let fetched = cache.fetch(&name).await.unwrap();
        assert_eq!(fetched.language.name(), "cpp");
        assert_eq!(fetched.code, "int main() {}");
        assert_eq!(
            tokio::fs::read(fetched.directory.join("a.out")).await.unwrap(),
            b"\x7fELF"
        );
        assert_eq!(
            tokio::fs::read(fetched.directory.join("lib/data")).await.unwrap(),
            b"payload"
        );
    }

    #[tokio::test]
    async fn test_fetch_reuses_local_copy() {
        let scratch = tempfile::tempdir().unwrap();
        let binaries = scratch.path().join("binaries");
        tokio::fs::create_dir_all(binaries.join("src-cpp1")).await.unwrap();

        let mut store = MockArtifactStore::new();
        store.expect_get_metadata().returning(|_| {
            Ok(BinaryMetadata {
                language: "cpp".into(),
                code: "code".into(),
            })
        });
        store.expect_get_binary().never();

        let fetched = cache(Arc::new(store), &binaries)
            .fetch("src-cpp1")
            .await
            .unwrap();
        assert_eq!(fetched.directory, binaries.join("src-cpp1"));
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let binaries = scratch.path().join("binaries");

        let mut store = MockArtifactStore::new();
        store.expect_get_metadata().returning(|_| {
            Ok(BinaryMetadata {
                language: "cpp".into(),
                code: "code".into(),
            })
        });
        store
            .expect_get_binary()
            .returning(|_| Ok(b"definitely not gzip".to_vec()));

        let result = cache(Arc::new(store), &binaries).fetch("src-cpp1").await;
        assert!(result.is_err());
        assert!(!binaries.join("src-cpp1").exists());
    }

    #[tokio::test]
    async fn test_fetch_unpublished_binary() {
        let scratch = tempfile::tempdir().unwrap();
        let mut store = MockArtifactStore::new();
        store
            .expect_get_metadata()
            .returning(|key| Err(AppError::NotFound(format!("Redis record {} unavailable.", key))));

        let err = cache(Arc::new(store), scratch.path())
            .fetch("src-cpp1")
            .await
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("not published"));
    }
}
