//! Standard problems: stdin/stdout (or file I/O) programs checked by diff or
//! a special judge.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;

use olympus_common::rpc::{CompilationResult, RpcRequest, RunTask};
use olympus_common::types::languages;
use olympus_common::{CaseDetail, CaseState, CaseStatus, Executable, Test, TestCase};

use super::{CaseProgress, Judger};
use crate::context::Context;

const SPJ_MESSAGE_HEADER: &str = "===== Special Judge Compilation Message =====";
const INTERACTOR_MESSAGE_HEADER: &str = "===== Interactor Compilation Message =====";

/// Problem-supplied programs compiled before the submission
#[derive(Debug, Clone, Copy)]
enum Helper {
    SpecialJudge,
    Interactor,
}

impl Helper {
    fn name(self) -> &'static str {
        match self {
            Helper::SpecialJudge => "Special judge",
            Helper::Interactor => "Interactor",
        }
    }

    fn unknown_language(self) -> &'static str {
        match self {
            Helper::SpecialJudge => "Unknown SPJ Language",
            Helper::Interactor => "Unknown Interactor Language",
        }
    }

    fn message_header(self) -> &'static str {
        match self {
            Helper::SpecialJudge => SPJ_MESSAGE_HEADER,
            Helper::Interactor => INTERACTOR_MESSAGE_HEADER,
        }
    }
}

pub struct StandardJudger {
    ctx: Context,
    test: Arc<Test>,
    priority: u8,
    language: String,
    code: String,
    spj_binary: Option<String>,
    interactor_binary: Option<String>,
    user_binary: Option<String>,
}

impl StandardJudger {
    pub fn new(ctx: Context, test: Arc<Test>, priority: u8, language: &str, code: &str) -> Self {
        Self {
            ctx,
            test,
            priority,
            language: language.to_string(),
            code: code.to_string(),
            spj_binary: None,
            interactor_binary: None,
            user_binary: None,
        }
    }

    /// Compile a helper program. Any failure aborts the task before the
    /// submission is compiled.
    async fn compile_helper(&self, helper: Helper, executable: &Executable) -> Result<String> {
        tracing::debug!(language = %executable.language, "Compiling {}", helper.name());
        if !languages::is_supported(&executable.language) {
            bail!(helper.unknown_language());
        }

        let (name, result) = self
            .ctx
            .compiler
            .compile(&executable.code, &executable.language, self.priority)
            .await?;
        if !result.is_done() {
            tracing::debug!("{} failed to compile", helper.name());
            if result.message.is_empty() {
                bail!("{} failed to compile", helper.name());
            }
            bail!("{}\n{}", helper.message_header(), result.message);
        }
        Ok(name)
    }
}

#[async_trait]
impl Judger for StandardJudger {
    /// Compile the special judge and interactor, if the problem has them
    async fn preprocess(&mut self) -> Result<()> {
        let test = self.test.clone();
        self.spj_binary = match &test.spj {
            Some(spj) => Some(self.compile_helper(Helper::SpecialJudge, spj).await?),
            None => None,
        };
        self.interactor_binary = match &test.interactor {
            Some(interactor) => Some(self.compile_helper(Helper::Interactor, interactor).await?),
            None => None,
        };
        Ok(())
    }

    async fn compile(&mut self) -> Result<CompilationResult> {
        if !languages::is_supported(&self.language) {
            return Ok(CompilationResult::failed(format!(
                "Unsupported language: {}",
                self.language
            )));
        }

        let (name, result) = self
            .ctx
            .compiler
            .compile(&self.code, &self.language, self.priority)
            .await?;
        self.user_binary = Some(name);
        Ok(result)
    }

    async fn judge_one_case(&self, case: &TestCase, progress: CaseProgress) -> Result<CaseState> {
        let binary = self
            .user_binary
            .clone()
            .ok_or_else(|| anyhow!("Submission was not compiled"))?;

        tracing::debug!(
            case = %case.prefix,
            input = %case.input,
            output = %case.output,
            spj = ?self.spj_binary,
            interactor = ?self.interactor_binary,
            "Judging case"
        );
        let task = RunTask {
            binary_name: binary,
            input: case.input.clone(),
            answer: case.output.clone(),
            time_limit: self.test.limit.time_limit,
            memory_limit: self.test.limit.memory_limit,
            file_io: self.test.file_io.clone(),
            spj_binary: self.spj_binary.clone(),
        };

        let mut dispatched = self
            .ctx
            .channel
            .dispatch(RpcRequest::RunStandard(task), self.priority)
            .await?;
        if dispatched.started().await {
            progress.started().await;
        }
        let result = dispatched.ran().await?;

        let (input, output) = if result.result.hides_test_data() {
            (None, None)
        } else {
            let limit = self.ctx.data_display_limit;
            let (input, output) = tokio::join!(
                self.ctx.store.read_file(&case.input, limit),
                self.ctx.store.read_file(&case.output, limit),
            );
            (Some(input), Some(output))
        };

        Ok(CaseState {
            prefix: case.prefix.clone(),
            status: CaseStatus::from(result.result),
            error_message: None,
            detail: Some(CaseDetail {
                time: result.time,
                memory: result.memory,
                input,
                output,
                user_output: result.user_output,
                user_error: result.user_error,
                spj_message: result.spj_message,
                system_message: result.system_message,
            }),
        })
    }
}
