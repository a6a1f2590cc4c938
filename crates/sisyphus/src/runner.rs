//! Running a compiled submission against one test case and judging it.
//!
//! The program runs with its binary mounted read-only at `/sandbox/2` and
//! the slot's `data` directory writable at `/sandbox/1`. Whatever it leaves
//! behind counts against the output limit. Programs that finish normally
//! are judged either by a special judge, run in `data-spj` with the input,
//! the user's output, the answer and the submitted code, or by comparing
//! the output with the answer.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use nix::sys::signal::Signal;

use olympus_common::rpc::{RunResult, RunTask};
use olympus_common::store::ProblemStore;
use olympus_common::types::Verdict;
use olympus_common::utils::{random_hex, read_file_length};

use crate::binary::{BinaryCache, FetchedBinary};
use crate::compare::compare_files;
use crate::config::WorkerLimits;
use crate::fsutil;
use crate::languages::{Language, Redirects};
use crate::sandbox::{self, Mount, Sandbox, SandboxParameter, SandboxResult, SandboxStatus};
use crate::slots::{SlotDirs, SlotGuard};

const DATA_MOUNT: &str = "/sandbox/1";
const BINARY_MOUNT: &str = "/sandbox/2";

const SPJ_INPUT: &str = "input";
const SPJ_USER_OUTPUT: &str = "user_out";
const SPJ_ANSWER: &str = "answer";
const SPJ_CODE: &str = "code";
const SPJ_SCORE: &str = "score.txt";
const SPJ_MESSAGE: &str = "message.txt";

/// A finished run and whether its output was thrown away
#[derive(Debug, Clone, Copy)]
struct RunOutcome {
    output_limit_exceeded: bool,
    result: SandboxResult,
}

struct SpjVerdict {
    result: Verdict,
    message: String,
}

pub struct Runner {
    sandbox: Arc<dyn Sandbox>,
    store: Arc<dyn ProblemStore>,
    binaries: Arc<BinaryCache>,
    limits: WorkerLimits,
}

impl Runner {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        store: Arc<dyn ProblemStore>,
        binaries: Arc<BinaryCache>,
        limits: WorkerLimits,
    ) -> Self {
        Self {
            sandbox,
            store,
            binaries,
            limits,
        }
    }

    pub async fn judge_standard(&self, task: &RunTask, slot: &SlotGuard) -> Result<RunResult> {
        let dirs = slot.dirs();
        tokio::try_join!(
            fsutil::create_or_empty_dir(&dirs.data),
            fsutil::create_or_empty_dir(&dirs.data_spj),
        )?;

        let result = self.judge(task, dirs, slot.index()).await;

        fsutil::try_empty_dir(&dirs.data).await;
        fsutil::try_empty_dir(&dirs.data_spj).await;
        result
    }

    async fn judge(&self, task: &RunTask, dirs: &SlotDirs, box_id: usize) -> Result<RunResult> {
        let binary = self.binaries.fetch(&task.binary_name).await?;

        let (input_name, output_name, redirects) = match &task.file_io {
            Some(file_io) => (
                file_io.input.clone(),
                file_io.output.clone(),
                Redirects::default(),
            ),
            None => {
                let input = format!("{}.in", random_hex(5));
                let output = format!("{}.out", random_hex(10));
                (
                    input.clone(),
                    output.clone(),
                    Redirects {
                        stdin: Some(input),
                        stdout: Some(output),
                        stderr: None,
                    },
                )
            }
        };
        let error_name = format!("{}.err", random_hex(5));
        let redirects = Redirects {
            stderr: Some(error_name.clone()),
            ..redirects
        };

        self.store
            .copy_file(&task.input, &dirs.data.join(&input_name))
            .await
            .context("Failed to stage test input")?;

        let outcome = self
            .run_program(
                binary.language,
                &binary.directory,
                &dirs.data,
                task.time_limit,
                megabytes(task.memory_limit)?,
                redirects,
                box_id,
            )
            .await?;
        tracing::debug!(
            binary = %task.binary_name,
            status = %outcome.result.status,
            code = outcome.result.code,
            ole = outcome.output_limit_exceeded,
            "Program finished"
        );

        let (mut verdict, system_message) = classify(&outcome);
        let mut result = RunResult {
            result: Verdict::Accepted,
            time: (outcome.result.time as f64 / 1e6).round() as u64,
            memory: outcome.result.memory / 1024,
            user_output: Some(
                read_file_length(
                    dirs.data.join(&output_name),
                    self.limits.data_display_limit,
                )
                .await,
            ),
            user_error: Some(
                read_file_length(
                    dirs.data.join(&error_name),
                    self.limits.stderr_display_limit,
                )
                .await,
            ),
            system_message,
            spj_message: None,
        };

        let user_output = dirs.data_spj.join(SPJ_USER_OUTPUT);
        if let Err(e) = tokio::fs::rename(dirs.data.join(&output_name), &user_output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e).context("Failed to move user output");
            }
            if verdict.is_none() {
                verdict = Some(Verdict::FileError);
            }
        }

        if let Some(verdict) = verdict {
            result.result = verdict;
            return Ok(result);
        }

        let answer = dirs.data_spj.join(SPJ_ANSWER);
        self.store
            .copy_file(&task.answer, &answer)
            .await
            .context("Failed to stage answer")?;

        match &task.spj_binary {
            Some(spj_name) => {
                let spj = self.binaries.fetch(spj_name).await?;
                self.store
                    .copy_file(&task.input, &dirs.data_spj.join(SPJ_INPUT))
                    .await
                    .context("Failed to stage special judge input")?;
                tokio::fs::write(dirs.data_spj.join(SPJ_CODE), &binary.code).await?;

                let judged = self.run_spj(&spj, dirs, box_id).await?;
                result.result = judged.result;
                result.spj_message = Some(judged.message);
            }
            None => {
                let diff = compare_files(&user_output, &answer).await?;
                result.result = if diff.pass {
                    Verdict::Accepted
                } else {
                    Verdict::WrongAnswer
                };
                result.spj_message = Some(diff.message);
            }
        }
        Ok(result)
    }

    async fn run_spj(
        &self,
        spj: &FetchedBinary,
        dirs: &SlotDirs,
        box_id: usize,
    ) -> Result<SpjVerdict> {
        let outcome = self
            .run_program(
                spj.language,
                &spj.directory,
                &dirs.data_spj,
                self.limits.spj_time_limit,
                megabytes(self.limits.spj_memory_limit)?,
                Redirects {
                    stdin: None,
                    stdout: Some(SPJ_SCORE.to_string()),
                    stderr: Some(SPJ_MESSAGE.to_string()),
                },
                box_id,
            )
            .await?;

        let status = if outcome.output_limit_exceeded {
            SandboxStatus::OutputLimitExceeded
        } else {
            outcome.result.status
        };
        if status != SandboxStatus::Ok {
            return Ok(SpjVerdict {
                result: Verdict::JudgementFailed,
                message: format!("Special Judge {} encountered.", status),
            });
        }

        let score_text = tokio::fs::read_to_string(dirs.data_spj.join(SPJ_SCORE))
            .await
            .unwrap_or_default();
        let Some(score) = parse_score(&score_text) else {
            return Ok(SpjVerdict {
                result: Verdict::JudgementFailed,
                message: format!(
                    "Special Judge returned an unrecognized score: {}.",
                    score_text
                ),
            });
        };

        let result = if score == 100.0 {
            Verdict::Accepted
        } else if score == 0.0 {
            Verdict::WrongAnswer
        } else {
            Verdict::PartiallyCorrect
        };
        Ok(SpjVerdict {
            result,
            message: read_file_length(
                dirs.data_spj.join(SPJ_MESSAGE),
                self.limits.stderr_display_limit,
            )
            .await,
        })
    }

    /// Run `language`'s binary from `binary_dir` inside `working_dir`.
    /// When the run leaves more than the output limit behind, the directory
    /// is emptied and the outcome is flagged.
    #[allow(clippy::too_many_arguments)]
    async fn run_program(
        &self,
        language: &dyn Language,
        binary_dir: &Path,
        working_dir: &Path,
        time: u64,
        memory: u64,
        redirects: Redirects,
        box_id: usize,
    ) -> Result<RunOutcome> {
        tokio::try_join!(
            fsutil::set_write_access(binary_dir, false),
            fsutil::set_write_access(working_dir, true),
        )?;

        let param = SandboxParameter {
            exec: language.run(BINARY_MOUNT, DATA_MOUNT, time, memory, redirects),
            mounts: vec![
                Mount::read_only(binary_dir, BINARY_MOUNT),
                Mount::writable(working_dir, DATA_MOUNT),
            ],
            box_id,
        };
        let result = sandbox::run(self.sandbox.as_ref(), param).await?;

        let output_limit_exceeded = fsutil::folder_size(working_dir).await? > self.limits.output_limit;
        if output_limit_exceeded {
            fsutil::empty_dir(working_dir).await?;
        }
        Ok(RunOutcome {
            output_limit_exceeded,
            result,
        })
    }
}

/// Memory limit in bytes
fn megabytes(limit: u64) -> Result<u64> {
    limit
        .checked_mul(1024 * 1024)
        .ok_or_else(|| anyhow!("Memory limit {} MB is out of range", limit))
}

/// Verdict settled by the run alone, if any, and the system message
fn classify(outcome: &RunOutcome) -> (Option<Verdict>, Option<String>) {
    let result = &outcome.result;
    if outcome.output_limit_exceeded {
        return (Some(Verdict::OutputLimitExceeded), None);
    }
    match result.status {
        SandboxStatus::TimeLimitExceeded => (Some(Verdict::TimeLimitExceeded), None),
        SandboxStatus::MemoryLimitExceeded => (Some(Verdict::MemoryLimitExceeded), None),
        SandboxStatus::RuntimeError => (
            Some(Verdict::RuntimeError),
            Some(format!("Killed: {}", signal_name(result.code))),
        ),
        SandboxStatus::Ok => (
            None,
            Some(format!("Exited with return code {}", result.code)),
        ),
        _ => (
            Some(Verdict::RuntimeError),
            Some(format!("Warning: corrupt sandbox result {:?}", result)),
        ),
    }
}

fn signal_name(signal: i32) -> String {
    Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {}", signal))
}

/// A special judge score is a number in `0..=100`
fn parse_score(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|score| (0.0..=100.0).contains(score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use olympus_common::store::MockProblemStore;
    use olympus_common::test_data::FileIo;

    use crate::slots::SlotPool;
    use crate::testing::{FakeSandbox, binary_cache, exited, finished, limits, publish, write};

    const SOLUTION: &str = "solution";
    const CHECKER: &str = "checker";

    struct Harness {
        scratch: tempfile::TempDir,
        pool: SlotPool,
        sandbox: Arc<FakeSandbox>,
        runner: Runner,
    }

    /// Store serving `input.txt` as "1 2\n" and `answer.txt` as "3\n"
    fn store() -> MockProblemStore {
        let mut store = MockProblemStore::new();
        store.expect_copy_file().returning(|file_ref, dest| {
            let content = match file_ref {
                "1/input.txt" => "1 2\n",
                "1/answer.txt" => "3\n",
                other => panic!("unexpected file {}", other),
            };
            std::fs::write(dest, content).unwrap();
            Ok(())
        });
        store
    }

    async fn harness(sandbox: FakeSandbox) -> Harness {
        let scratch = tempfile::tempdir().unwrap();
        let (_, binaries) = binary_cache(scratch.path());
        publish(&binaries, scratch.path(), SOLUTION, "cpp", "int main() {}").await;
        publish(&binaries, scratch.path(), CHECKER, "cpp", "checker source").await;

        let sandbox = Arc::new(sandbox);
        Harness {
            pool: SlotPool::new(1, scratch.path().join("work")),
            runner: Runner::new(sandbox.clone(), Arc::new(store()), binaries, limits()),
            sandbox,
            scratch,
        }
    }

    fn task() -> RunTask {
        RunTask {
            binary_name: SOLUTION.into(),
            input: "1/input.txt".into(),
            answer: "1/answer.txt".into(),
            time_limit: 1000,
            memory_limit: 256,
            file_io: None,
            spj_binary: None,
        }
    }

    fn spj_task() -> RunTask {
        RunTask {
            spj_binary: Some(CHECKER.into()),
            ..task()
        }
    }

    fn is_spj(param: &SandboxParameter) -> bool {
        param.exec.stdout.as_deref() == Some(SPJ_SCORE)
    }

    /// Answer with `output` on stdout after echoing the input check
    fn prints(output: &'static str) -> FakeSandbox {
        FakeSandbox::new(move |param| {
            let stdin = param.exec.stdin.as_deref().unwrap();
            let input = std::fs::read_to_string(param.host_path(stdin).unwrap()).unwrap();
            assert_eq!(input, "1 2\n");
            write(param, param.exec.stdout.as_deref().unwrap(), output);
            Ok(exited(0))
        })
    }

    async fn judge(h: &Harness, task: &RunTask) -> RunResult {
        let slot = h.pool.acquire().await.unwrap();
        h.runner.judge_standard(task, &slot).await.unwrap()
    }

    #[tokio::test]
    async fn test_accepted() {
        let h = harness(prints("3\n")).await;

        let result = judge(&h, &task()).await;

        assert_eq!(result.result, Verdict::Accepted);
        assert_eq!(result.time, 5);
        assert_eq!(result.memory, 2048);
        assert_eq!(result.user_output.as_deref(), Some("3\n"));
        assert_eq!(
            result.system_message.as_deref(),
            Some("Exited with return code 0")
        );
    }

    #[tokio::test]
    async fn test_run_layout() {
        let h = harness(prints("3\n")).await;
        judge(&h, &task()).await;

        let calls = h.sandbox.calls.lock().unwrap();
        let param = &calls[0];
        assert_eq!(param.exec.executable, "/sandbox/2/a.out");
        assert_eq!(param.exec.working_directory, "/sandbox/1");
        assert_eq!(param.exec.memory, 256 << 20);
        assert_eq!(param.exec.time, 1000);
        assert!(param.mounts[0].dst == "/sandbox/2" && !param.mounts[0].writable);
        assert!(param.mounts[1].dst == "/sandbox/1" && param.mounts[1].writable);
        assert!(param.exec.stdin.as_deref().unwrap().ends_with(".in"));
        assert!(param.exec.stdout.as_deref().unwrap().ends_with(".out"));
        assert!(param.exec.stderr.as_deref().unwrap().ends_with(".err"));
    }

    #[tokio::test]
    async fn test_wrong_answer() {
        let h = harness(prints("4\n")).await;

        let result = judge(&h, &task()).await;

        assert_eq!(result.result, Verdict::WrongAnswer);
        assert_eq!(
            result.spj_message.as_deref(),
            Some("Output differs at line 1: expected \"3\", found \"4\"")
        );
    }

    #[tokio::test]
    async fn test_output_limit_takes_precedence() {
        let h = harness(FakeSandbox::new(|param| {
            write(param, param.exec.stdout.as_deref().unwrap(), vec![b'3'; 4096]);
            Ok(finished(SandboxStatus::TimeLimitExceeded, 0))
        }))
        .await;
        let slot = h.pool.acquire().await.unwrap();

        let result = h.runner.judge_standard(&task(), &slot).await.unwrap();

        assert_eq!(result.result, Verdict::OutputLimitExceeded);
        assert_eq!(fsutil::folder_size(&slot.dirs().data).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resource_limits() {
        let h = harness(FakeSandbox::new(|_| {
            Ok(finished(SandboxStatus::TimeLimitExceeded, 0))
        }))
        .await;
        assert_eq!(judge(&h, &task()).await.result, Verdict::TimeLimitExceeded);

        let h = harness(FakeSandbox::new(|_| {
            Ok(finished(SandboxStatus::MemoryLimitExceeded, 0))
        }))
        .await;
        assert_eq!(judge(&h, &task()).await.result, Verdict::MemoryLimitExceeded);
    }

    #[tokio::test]
    async fn test_killed_by_signal() {
        let h = harness(FakeSandbox::new(|param| {
            write(param, param.exec.stderr.as_deref().unwrap(), "segfault incoming");
            Ok(finished(SandboxStatus::RuntimeError, 11))
        }))
        .await;

        let result = judge(&h, &task()).await;

        assert_eq!(result.result, Verdict::RuntimeError);
        assert_eq!(result.system_message.as_deref(), Some("Killed: SIGSEGV"));
        assert_eq!(result.user_error.as_deref(), Some("segfault incoming"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_still_judged() {
        let h = harness(FakeSandbox::new(|param| {
            write(param, param.exec.stdout.as_deref().unwrap(), "3");
            Ok(exited(1))
        }))
        .await;

        let result = judge(&h, &task()).await;

        assert_eq!(result.result, Verdict::Accepted);
        assert_eq!(
            result.system_message.as_deref(),
            Some("Exited with return code 1")
        );
    }

    #[tokio::test]
    async fn test_corrupt_sandbox_result() {
        let h = harness(FakeSandbox::new(|_| Ok(finished(SandboxStatus::Unknown, 0)))).await;

        let result = judge(&h, &task()).await;

        assert_eq!(result.result, Verdict::RuntimeError);
        assert!(
            result
                .system_message
                .unwrap()
                .starts_with("Warning: corrupt sandbox result")
        );
    }

    #[tokio::test]
    async fn test_missing_output_is_file_error() {
        let h = harness(FakeSandbox::new(|_| Ok(exited(0)))).await;

        let result = judge(&h, &task()).await;

        assert_eq!(result.result, Verdict::FileError);
        assert_eq!(result.user_output.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_file_io() {
        let h = harness(FakeSandbox::new(|param| {
            assert!(param.exec.stdin.is_none());
            assert!(param.exec.stdout.is_none());
            let input = std::fs::read_to_string(param.host_path("sum.in").unwrap()).unwrap();
            assert_eq!(input, "1 2\n");
            write(param, "sum.out", "3\n");
            Ok(exited(0))
        }))
        .await;
        let task = RunTask {
            file_io: Some(FileIo {
                input: "sum.in".into(),
                output: "sum.out".into(),
            }),
            ..task()
        };

        assert_eq!(judge(&h, &task).await.result, Verdict::Accepted);
    }

    /// The program prints "3"; the checker sees its workspace and answers
    /// with `score`.
    fn with_checker(score: &'static str, status: SandboxStatus) -> FakeSandbox {
        FakeSandbox::new(move |param| {
            if !is_spj(param) {
                write(param, param.exec.stdout.as_deref().unwrap(), "3\n");
                return Ok(exited(0));
            }
            let read = |name: &str| std::fs::read_to_string(param.host_path(name).unwrap()).unwrap();
            assert_eq!(read("input"), "1 2\n");
            assert_eq!(read("user_out"), "3\n");
            assert_eq!(read("answer"), "3\n");
            assert_eq!(read("code"), "int main() {}");
            assert_eq!(param.exec.time, 1500);
            assert_eq!(param.exec.memory, 256 << 20);

            write(param, "score.txt", score);
            write(param, "message.txt", "checked");
            Ok(finished(status, 0))
        })
    }

    #[tokio::test]
    async fn test_special_judge_scores() {
        for (score, verdict) in [
            ("100", Verdict::Accepted),
            ("0\n", Verdict::WrongAnswer),
            ("40", Verdict::PartiallyCorrect),
        ] {
            let h = harness(with_checker(score, SandboxStatus::Ok)).await;

            let result = judge(&h, &spj_task()).await;

            assert_eq!(result.result, verdict, "score {:?}", score);
            assert_eq!(result.spj_message.as_deref(), Some("checked"));
            assert_eq!(h.sandbox.call_count(), 2);
        }
    }

    #[tokio::test]
    async fn test_memory_limit_out_of_range() {
        let h = harness(prints("3\n")).await;
        let slot = h.pool.acquire().await.unwrap();
        let task = RunTask {
            memory_limit: u64::MAX,
            ..task()
        };

        let err = h.runner.judge_standard(&task, &slot).await.unwrap_err();

        assert!(err.to_string().contains("out of range"));
        assert_eq!(h.sandbox.call_count(), 0);
    }

    #[test]
    fn test_megabytes() {
        assert_eq!(megabytes(256).unwrap(), 256 << 20);
        assert!(megabytes(u64::MAX / 1024).is_err());
    }

    #[tokio::test]
    async fn test_special_judge_unrecognized_score() {
        for score in ["much", "101", "-1"] {
            let h = harness(with_checker(score, SandboxStatus::Ok)).await;

            let result = judge(&h, &spj_task()).await;

            assert_eq!(result.result, Verdict::JudgementFailed);
            assert_eq!(
                result.spj_message.unwrap(),
                format!("Special Judge returned an unrecognized score: {}.", score)
            );
        }
    }

    #[tokio::test]
    async fn test_special_judge_crash() {
        let h = harness(with_checker("100", SandboxStatus::RuntimeError)).await;

        let result = judge(&h, &spj_task()).await;

        assert_eq!(result.result, Verdict::JudgementFailed);
        assert_eq!(
            result.spj_message.as_deref(),
            Some("Special Judge RuntimeError encountered.")
        );
    }

    #[tokio::test]
    async fn test_special_judge_skipped_for_failed_run() {
        let h = harness(FakeSandbox::new(|_| {
            Ok(finished(SandboxStatus::TimeLimitExceeded, 0))
        }))
        .await;

        let result = judge(&h, &spj_task()).await;

        assert_eq!(result.result, Verdict::TimeLimitExceeded);
        assert_eq!(h.sandbox.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unpublished_binary_fails_the_task() {
        let h = harness(prints("3\n")).await;
        let slot = h.pool.acquire().await.unwrap();
        let task = RunTask {
            binary_name: "missing".into(),
            ..task()
        };

        assert!(h.runner.judge_standard(&task, &slot).await.is_err());
        assert_eq!(h.sandbox.call_count(), 0);
        assert!(h.scratch.path().join("work").exists());
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score(" 55.5\n"), Some(55.5));
        assert_eq!(parse_score("100"), Some(100.0));
        assert_eq!(parse_score("NaN"), None);
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("100.01"), None);
    }

    #[test]
    fn test_signal_name() {
        assert_eq!(signal_name(9), "SIGKILL");
        assert_eq!(signal_name(1000), "signal 1000");
    }
}
