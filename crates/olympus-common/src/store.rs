//! Problem test data store.
//!
//! Test data lives on a filesystem shared by the daemon and the workers:
//!
//! ```text
//! {root}/{problem_id}/test.json
//! {root}/{problem_id}/{case files...}
//! ```
//!
//! File references handed out by the store are relative to `root` and
//! already include the problem directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::test_data::Test;
use crate::utils::read_file_length;

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ProblemStore: Send + Sync {
    /// Load the test description of a problem. Fails with `NotFound` when the
    /// problem has no test data.
    async fn get_test(&self, problem_id: &str) -> AppResult<Test>;

    /// Read at most `limit` bytes of a file for display
    async fn read_file(&self, file_ref: &str, limit: usize) -> String;

    /// Copy a file to a local path
    async fn copy_file(&self, file_ref: &str, dest: &Path) -> AppResult<()>;
}

/// Problem store backed by a local (or network mounted) directory
#[derive(Debug, Clone)]
pub struct FsProblemStore {
    root: PathBuf,
}

impl FsProblemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a file reference below the root, refusing anything that
    /// would escape it.
    fn resolve(&self, file_ref: &str) -> AppResult<PathBuf> {
        let relative = Path::new(file_ref);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || file_ref.is_empty() {
            return Err(AppError::FileError(format!(
                "Invalid test data reference: {}",
                file_ref
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ProblemStore for FsProblemStore {
    async fn get_test(&self, problem_id: &str) -> AppResult<Test> {
        let path = self.resolve(problem_id)?.join("test.json");

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(
                    "Can not find Problem TestData".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let mut test: Test = serde_json::from_slice(&raw)?;
        for case in test.subtasks.iter_mut().flat_map(|s| s.cases.iter_mut()) {
            case.input = format!("{}/{}", problem_id, case.input);
            case.output = format!("{}/{}", problem_id, case.output);
        }

        tracing::debug!(
            "Loaded test data for problem {} ({} cases)",
            problem_id,
            test.case_count()
        );
        Ok(test)
    }

    async fn read_file(&self, file_ref: &str, limit: usize) -> String {
        match self.resolve(file_ref) {
            Ok(path) => read_file_length(path, limit).await,
            Err(_) => String::new(),
        }
    }

    async fn copy_file(&self, file_ref: &str, dest: &Path) -> AppResult<()> {
        let src = self.resolve(file_ref)?;
        tokio::fs::copy(&src, dest).await.map_err(|e| {
            AppError::FileError(format!("Failed to copy {}: {}", file_ref, e))
        })?;
        Ok(())
    }
}
