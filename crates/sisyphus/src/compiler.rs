//! Compilation of submissions and special judges.
//!
//! The source is written to the slot's `src` directory and compiled inside
//! the sandbox with `src` mounted read-only, `bin` writable and a private
//! `/tmp`. A successful build is published to the artifact store under the
//! task's binary name; a failed or oversized one never is.

use std::sync::Arc;

use anyhow::{Context, Result};

use olympus_common::rpc::{CompilationResult, CompileTask};
use olympus_common::utils::read_file_length;

use crate::binary::BinaryCache;
use crate::fsutil;
use crate::languages::{Language, get_language};
use crate::sandbox::{self, Mount, Sandbox, SandboxParameter, SandboxStatus};
use crate::slots::SlotGuard;

const SOURCE_MOUNT: &str = "/sandbox/1";
const OUTPUT_MOUNT: &str = "/sandbox/2";

pub struct Compiler {
    sandbox: Arc<dyn Sandbox>,
    binaries: Arc<BinaryCache>,
    message_limit: usize,
    do_not_use_x32_abi: bool,
}

impl Compiler {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        binaries: Arc<BinaryCache>,
        message_limit: usize,
        do_not_use_x32_abi: bool,
    ) -> Self {
        Self {
            sandbox,
            binaries,
            message_limit,
            do_not_use_x32_abi,
        }
    }

    pub async fn compile(&self, task: &CompileTask, slot: &SlotGuard) -> Result<CompilationResult> {
        let Some(language) = get_language(&task.language) else {
            return Ok(CompilationResult::failed(format!(
                "Unsupported language: {}",
                task.language
            )));
        };

        tracing::info!(
            binary = %task.binary_name,
            language = %task.language,
            slot = slot.index(),
            "Compiling"
        );
        let result = self.build(task, language, slot).await;

        let dirs = slot.dirs();
        fsutil::try_remove_dir(&dirs.bin).await;
        fsutil::try_remove_dir(&dirs.src).await;
        fsutil::try_empty_dir(&dirs.temp).await;
        result
    }

    async fn build(
        &self,
        task: &CompileTask,
        language: &dyn Language,
        slot: &SlotGuard,
    ) -> Result<CompilationResult> {
        let dirs = slot.dirs();
        tokio::try_join!(
            fsutil::create_or_empty_dir(&dirs.src),
            fsutil::create_or_empty_dir(&dirs.bin),
            fsutil::create_or_empty_dir(&dirs.temp),
        )?;
        tokio::fs::write(dirs.src.join(language.source_file_name()), &task.code)
            .await
            .context("Failed to write source file")?;
        tokio::try_join!(
            fsutil::set_write_access(&dirs.src, false),
            fsutil::set_write_access(&dirs.bin, true),
            fsutil::set_write_access(&dirs.temp, true),
        )?;

        let exec = language.compile(
            &format!("{}/{}", SOURCE_MOUNT, language.source_file_name()),
            OUTPUT_MOUNT,
            self.do_not_use_x32_abi,
        );
        let message_file = exec.message_file.clone();
        let param = SandboxParameter {
            exec,
            mounts: vec![
                Mount::read_only(&dirs.src, SOURCE_MOUNT),
                Mount::writable(&dirs.bin, OUTPUT_MOUNT),
                Mount::writable(&dirs.temp, "/tmp"),
            ],
            box_id: slot.index(),
        };
        let result = sandbox::run(self.sandbox.as_ref(), param).await?;

        let message = match &message_file {
            Some(file) => read_file_length(dirs.bin.join(file), self.message_limit).await,
            None => String::new(),
        };

        if result.status != SandboxStatus::Ok {
            tracing::debug!(status = %result.status, "Compiler did not exit normally");
            let message = format!(
                "A {} encountered while compiling your code.\n\n{}",
                result.status, message
            );
            return Ok(CompilationResult::failed(message.trim()));
        }
        if result.code != 0 {
            tracing::debug!(code = result.code, "Compilation failed");
            return Ok(CompilationResult::failed(message));
        }

        // the message is not part of the artifact
        if let Some(file) = &message_file {
            let path = dirs.bin.join(file);
            if tokio::fs::try_exists(&path).await? {
                tokio::fs::remove_file(&path).await?;
            }
        }

        let size = fsutil::folder_size(&dirs.bin).await?;
        if size > language.binary_size_limit() {
            return Ok(CompilationResult::failed(format!(
                "Your source code compiled to {} bytes which is too big, too thick, too long for us..",
                size
            )));
        }

        self.binaries
            .push(&task.binary_name, language.name(), &task.code, &dirs.bin)
            .await
            .with_context(|| format!("Failed to publish binary {}", task.binary_name))?;
        tracing::info!(binary = %task.binary_name, size, "Binary published");
        Ok(CompilationResult::done(message))
    }
}
