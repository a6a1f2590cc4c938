//! Worker slots.
//!
//! A slot is an index into the per-slot scratch directories and the isolate
//! box of the same number. At most `size` tasks hold a slot at once, and a
//! slot goes back to the pool when its guard is dropped, whichever way the
//! task ends.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct SlotPool {
    semaphore: Arc<Semaphore>,
    free: Arc<Mutex<Vec<usize>>>,
    root: PathBuf,
}

impl SlotPool {
    pub fn new(size: usize, root: impl Into<PathBuf>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            // popped from the back, so slot 0 is handed out first
            free: Arc::new(Mutex::new((0..size).rev().collect())),
            root: root.into(),
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<SlotGuard> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Slot pool closed")?;

        // a permit guarantees an index is waiting in the free list
        let index = self
            .free
            .lock()
            .map_err(|_| anyhow!("Slot free list poisoned"))?
            .pop()
            .ok_or_else(|| anyhow!("No free slot index behind a permit"))?;

        tracing::trace!(slot = index, "Slot acquired");
        Ok(SlotGuard {
            index,
            dirs: SlotDirs::new(&self.root, index),
            free: self.free.clone(),
            _permit: permit,
        })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Scratch directories owned by one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDirs {
    /// Source files of a compile
    pub src: PathBuf,
    /// Compiler output
    pub bin: PathBuf,
    /// `/tmp` of the compiler
    pub temp: PathBuf,
    /// Working directory of the user program
    pub data: PathBuf,
    /// Working directory of the special judge
    pub data_spj: PathBuf,
}

impl SlotDirs {
    pub fn new(root: &Path, index: usize) -> Self {
        let base = root.join(index.to_string());
        Self {
            src: base.join("src"),
            bin: base.join("bin"),
            temp: base.join("temp"),
            data: base.join("data"),
            data_spj: base.join("data-spj"),
        }
    }
}

pub struct SlotGuard {
    index: usize,
    dirs: SlotDirs,
    free: Arc<Mutex<Vec<usize>>>,
    // released after the index is back in the free list
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dirs(&self) -> &SlotDirs {
        &self.dirs
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Ok(mut free) = self.free.lock() {
            free.push(self.index);
        }
        tracing::trace!(slot = self.index, "Slot released");
    }
}
