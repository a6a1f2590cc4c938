//! Judger state machine.
//!
//! Drives one judge task from `Waiting` to a terminal status:
//! fetch test data, preprocess, compile, judge every subtask concurrently,
//! clean up. Problem kinds plug in through the [`Judger`] trait.

mod standard;
mod subtask;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Mutex;

use olympus_common::rpc::CompilationResult;
use olympus_common::{
    CaseState, CaseStatus, JudgeState, JudgeStatus, JudgeTask, ProblemKind, Test, TestCase,
};

use crate::context::Context;
use crate::reporter::Reporter;

/// Judge task shared between the concurrently judged subtasks
pub type SharedTask = Arc<Mutex<JudgeTask>>;

/// Capabilities of a problem kind
#[async_trait]
pub trait Judger: Send + Sync {
    /// Prepare problem-supplied programs. A failure means the test data is
    /// unusable.
    async fn preprocess(&mut self) -> Result<()> {
        Ok(())
    }

    /// Compile the submission
    async fn compile(&mut self) -> Result<CompilationResult>;

    /// Judge one case. `progress` is fired once the case starts executing.
    async fn judge_one_case(&self, case: &TestCase, progress: CaseProgress) -> Result<CaseState>;

    /// Release anything held by the judger
    async fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Marks a case as running and reports it
pub struct CaseProgress {
    task: SharedTask,
    reporter: Arc<dyn Reporter>,
    subtask: usize,
    case: usize,
}

impl CaseProgress {
    pub fn new(task: SharedTask, reporter: Arc<dyn Reporter>, subtask: usize, case: usize) -> Self {
        Self {
            task,
            reporter,
            subtask,
            case,
        }
    }

    pub async fn started(self) {
        let snapshot = {
            let mut task = self.task.lock().await;
            let Some(case) = task
                .judge_state
                .subtasks
                .get_mut(self.subtask)
                .and_then(|s| s.cases.get_mut(self.case))
            else {
                return;
            };
            case.status = CaseStatus::Judging;
            task.clone()
        };
        self.reporter.report_progress(&snapshot).await;
    }
}

/// Select the judger for a task's problem kind
pub fn judger_for(ctx: &Context, test: Arc<Test>, task: &JudgeTask) -> Box<dyn Judger> {
    match task.kind {
        ProblemKind::Standard => Box::new(standard::StandardJudger::new(
            ctx.clone(),
            test,
            task.priority,
            &task.language,
            &task.code,
        )),
    }
}

/// Judge a task, leaving the outcome in its state.
///
/// Expected failures (missing test data, compile errors) are recorded on the
/// state; an `Err` means judging broke down.
pub async fn judge(ctx: &Context, task: &SharedTask) -> Result<()> {
    let (task_id, problem_id) = {
        let task = task.lock().await;
        (task.task_id.clone(), task.problem_id.clone())
    };

    tracing::debug!(task_id = %task_id, problem_id = %problem_id, "Fetching test data");
    let test = match ctx.store.get_test(&problem_id).await {
        Ok(test) => Arc::new(test),
        Err(e) => {
            tracing::info!(task_id = %task_id, "Fetching test data failed: {}", e);
            task.lock()
                .await
                .judge_state
                .fail(JudgeStatus::NoTestdata, e.to_string());
            return Ok(());
        }
    };

    let judger = {
        let task = task.lock().await;
        judger_for(ctx, test.clone(), &task)
    };
    drive(judger, &test, task, ctx.reporter.clone()).await
}

async fn drive(
    mut judger: Box<dyn Judger>,
    test: &Test,
    task: &SharedTask,
    reporter: Arc<dyn Reporter>,
) -> Result<()> {
    let task_id = {
        let mut task = task.lock().await;
        task.judge_state = JudgeState::from_test(test);
        task.score = 0;
        task.task_id.clone()
    };

    tracing::debug!(task_id = %task_id, "Preprocessing test data");
    if let Err(e) = judger.preprocess().await {
        tracing::info!(task_id = %task_id, "Preprocessing test data failed: {:#}", e);
        task.lock()
            .await
            .judge_state
            .fail(JudgeStatus::NoTestdata, format!("{:#}", e));
        return Ok(());
    }

    tracing::debug!(task_id = %task_id, "Compiling");
    let snapshot = set_status(task, JudgeStatus::Compiling).await;
    reporter.report_progress(&snapshot).await;

    let compiled = judger.compile().await?;
    if !compiled.is_done() {
        tracing::info!(task_id = %task_id, "Compilation failed");
        task.lock()
            .await
            .judge_state
            .fail(JudgeStatus::CompileError, compiled.message);
        return Ok(());
    }

    tracing::debug!(task_id = %task_id, "Judging");
    let snapshot = set_status(task, JudgeStatus::Judging).await;
    reporter.report_progress(&snapshot).await;

    let outcomes = {
        let judger = judger.as_ref();
        join_all(test.subtasks.iter().enumerate().map(|(index, sub)| {
            subtask::judge_subtask(judger, sub, index, task, &reporter)
        }))
        .await
    };

    judger.cleanup().await?;
    outcomes.into_iter().collect::<Result<Vec<_>>>()?;
    Ok(())
}

async fn set_status(task: &SharedTask, status: JudgeStatus) -> JudgeTask {
    let mut task = task.lock().await;
    task.judge_state.set_status(status);
    task.clone()
}

/// Judge a dequeued task end to end and report the final state.
///
/// Never fails: a broken judging becomes `SystemError` with the error kept
/// in the message.
pub async fn process(ctx: &Context, task: JudgeTask) -> JudgeTask {
    let task_id = task.task_id.clone();
    tracing::info!(task_id = %task_id, "Begin to process judge task");

    let shared = Arc::new(Mutex::new(task));
    if let Err(e) = judge(ctx, &shared).await {
        tracing::warn!(task_id = %task_id, "Judge error: {:#}", e);
        shared
            .lock()
            .await
            .judge_state
            .fail(JudgeStatus::SystemError, format!("An error occurred.\n{:#}", e));
    }

    let finished = {
        let mut task = shared.lock().await;
        task.judge_state.refresh_status();
        task.clone()
    };
    tracing::info!(
        task_id = %task_id,
        status = %finished.judge_state.status,
        score = finished.score,
        "Done judging"
    );

    ctx.reporter.report_progress(&finished).await;
    ctx.reporter.report_result(&finished).await;
    finished
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use olympus_common::store::MockProblemStore;
    use olympus_common::{AppError, Limit, ScoringKind, Subtask};

    use crate::testing::{RecordingReporter, ScriptedWorker, context};

    /// Judger answering from a script: status and delay per case prefix
    struct ScriptedJudger {
        script: HashMap<String, (CaseStatus, u64)>,
        calls: Arc<StdMutex<Vec<String>>>,
        compile: CompilationResult,
        preprocess_error: Option<String>,
        panic_on: Option<String>,
    }

    impl ScriptedJudger {
        fn new(script: &[(&str, CaseStatus, u64)]) -> Self {
            Self {
                script: script
                    .iter()
                    .map(|(p, s, d)| (p.to_string(), (*s, *d)))
                    .collect(),
                calls: Arc::default(),
                compile: CompilationResult::done(""),
                preprocess_error: None,
                panic_on: None,
            }
        }
    }

    #[async_trait]
    impl Judger for ScriptedJudger {
        async fn preprocess(&mut self) -> Result<()> {
            match &self.preprocess_error {
                Some(message) => anyhow::bail!("{}", message),
                None => Ok(()),
            }
        }

        async fn compile(&mut self) -> Result<CompilationResult> {
            Ok(self.compile.clone())
        }

        async fn judge_one_case(&self, case: &TestCase, progress: CaseProgress) -> Result<CaseState> {
            self.calls.lock().unwrap().push(case.prefix.clone());
            progress.started().await;

            let (status, delay) = self.script[&case.prefix];
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if status == CaseStatus::SystemError {
                anyhow::bail!("runner crashed on {}", case.prefix);
            }
            if self.panic_on.as_deref() == Some(case.prefix.as_str()) {
                panic!("index out of bounds on {}", case.prefix);
            }
            Ok(CaseState {
                status,
                ..CaseState::waiting(&case.prefix)
            })
        }
    }

    fn subtask(score: u32, kind: ScoringKind, prefixes: &[&str]) -> Subtask {
        Subtask {
            score,
            kind,
            cases: prefixes
                .iter()
                .map(|p| TestCase {
                    prefix: p.to_string(),
                    input: format!("p1/{}.in", p),
                    output: format!("p1/{}.ans", p),
                })
                .collect(),
        }
    }

    fn test_with(subtasks: Vec<Subtask>) -> Test {
        Test {
            limit: Limit {
                time_limit: 1000,
                memory_limit: 256,
            },
            subtasks,
            spj: None,
            interactor: None,
            file_io: None,
        }
    }

    fn new_task() -> SharedTask {
        Arc::new(Mutex::new(JudgeTask {
            priority: 0,
            task_id: "t1".into(),
            problem_id: "p1".into(),
            kind: ProblemKind::Standard,
            code: "int main() {}".into(),
            language: "cpp".into(),
            score: 0,
            judge_state: JudgeState::default(),
        }))
    }

    async fn run(judger: ScriptedJudger, test: &Test) -> (JudgeTask, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::default());
        let task = new_task();
        drive(Box::new(judger), test, &task, reporter.clone())
            .await
            .unwrap();
        let mut finished = task.lock().await.clone();
        finished.judge_state.refresh_status();
        (finished, reporter)
    }

    fn statuses(task: &JudgeTask, subtask: usize) -> Vec<CaseStatus> {
        task.judge_state.subtasks[subtask]
            .cases
            .iter()
            .map(|c| c.status)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_subtask_skips_after_first_failure() {
        for kind in [ScoringKind::Min, ScoringKind::Mul] {
            let judger = ScriptedJudger::new(&[
                ("a", CaseStatus::WrongAnswer, 0),
                ("b", CaseStatus::Accepted, 0),
                ("c", CaseStatus::Accepted, 0),
            ]);
            let calls = judger.calls.clone();
            let test = test_with(vec![subtask(50, kind, &["a", "b", "c"])]);

            let (task, _) = run(judger, &test).await;

            assert_eq!(*calls.lock().unwrap(), vec!["a".to_string()]);
            assert_eq!(
                statuses(&task, 0),
                vec![CaseStatus::WrongAnswer, CaseStatus::Skipped, CaseStatus::Skipped]
            );
            assert_eq!(task.judge_state.subtasks[0].score, 0);
            assert_eq!(task.score, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_subtask_keeps_full_score() {
        let judger = ScriptedJudger::new(&[
            ("a", CaseStatus::Accepted, 30),
            ("b", CaseStatus::Accepted, 10),
        ]);
        let calls = judger.calls.clone();
        let test = test_with(vec![subtask(40, ScoringKind::Min, &["a", "b"])]);

        let (task, _) = run(judger, &test).await;

        assert_eq!(*calls.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(task.score, 40);
        assert_eq!(task.judge_state.status, JudgeStatus::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_score_independent_of_completion_order() {
        let orderings: [[u64; 3]; 3] = [[10, 20, 30], [30, 20, 10], [20, 30, 10]];

        for delays in orderings {
            let judger = ScriptedJudger::new(&[
                ("a", CaseStatus::Accepted, delays[0]),
                ("b", CaseStatus::WrongAnswer, delays[1]),
                ("c", CaseStatus::Accepted, delays[2]),
            ]);
            let test = test_with(vec![subtask(100, ScoringKind::Sum, &["a", "b", "c"])]);

            let (task, reporter) = run(judger, &test).await;

            assert_eq!(task.judge_state.subtasks[0].score, 66, "delays {:?}", delays);
            assert_eq!(task.score, 66);
            assert_eq!(task.judge_state.status, JudgeStatus::WrongAnswer);

            // Every intermediate score is the proportional score of the
            // cases completed at that point.
            for snapshot in reporter.progress.lock().unwrap().iter() {
                let sub = &snapshot.judge_state.subtasks[0];
                assert_eq!(sub.score, sub.proportional_score(100));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_cases_run_concurrently() {
        let judger = ScriptedJudger::new(&[
            ("a", CaseStatus::Accepted, 100),
            ("b", CaseStatus::Accepted, 100),
        ]);
        let test = test_with(vec![subtask(100, ScoringKind::Sum, &["a", "b"])]);

        let started = tokio::time::Instant::now();
        let (task, _) = run(judger, &test).await;

        assert_eq!(task.score, 100);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_case_error_does_not_abort_siblings() {
        let judger = ScriptedJudger::new(&[
            ("a", CaseStatus::SystemError, 0),
            ("b", CaseStatus::Accepted, 10),
        ]);
        let test = test_with(vec![subtask(100, ScoringKind::Sum, &["a", "b"])]);

        let (task, _) = run(judger, &test).await;

        let case = &task.judge_state.subtasks[0].cases[0];
        assert_eq!(case.status, CaseStatus::SystemError);
        assert_eq!(case.error_message.as_deref(), Some("runner crashed on a"));
        assert_eq!(task.judge_state.subtasks[0].cases[1].status, CaseStatus::Accepted);
        assert_eq!(task.score, 50);
        assert_eq!(task.judge_state.status, JudgeStatus::SystemError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_case_panic_does_not_abort_siblings() {
        for kind in [ScoringKind::Sum, ScoringKind::Min] {
            let mut judger = ScriptedJudger::new(&[
                ("a", CaseStatus::Accepted, 0),
                ("b", CaseStatus::Accepted, 10),
                ("c", CaseStatus::Accepted, 0),
            ]);
            judger.panic_on = Some("a".into());
            let test = test_with(vec![
                subtask(100, kind, &["a", "b"]),
                subtask(20, ScoringKind::Sum, &["c"]),
            ]);

            let (task, _) = run(judger, &test).await;

            let case = &task.judge_state.subtasks[0].cases[0];
            assert_eq!(case.status, CaseStatus::SystemError);
            assert_eq!(
                case.error_message.as_deref(),
                Some("Task runner panicked: index out of bounds on a")
            );
            // the other subtask still ran
            assert_eq!(task.judge_state.subtasks[1].cases[0].status, CaseStatus::Accepted);
            assert_eq!(task.judge_state.status, JudgeStatus::SystemError);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_subtasks() {
        let judger = ScriptedJudger::new(&[
            ("s1", CaseStatus::Accepted, 20),
            ("s2", CaseStatus::Accepted, 5),
            ("m1", CaseStatus::WrongAnswer, 10),
            ("m2", CaseStatus::Accepted, 0),
        ]);
        let calls = judger.calls.clone();
        let test = test_with(vec![
            subtask(100, ScoringKind::Sum, &["s1", "s2"]),
            subtask(50, ScoringKind::Min, &["m1", "m2"]),
        ]);

        let (task, _) = run(judger, &test).await;

        assert!(!calls.lock().unwrap().contains(&"m2".to_string()));
        assert_eq!(task.judge_state.subtasks[0].score, 100);
        assert_eq!(task.judge_state.subtasks[1].score, 0);
        assert_eq!(statuses(&task, 1), vec![CaseStatus::WrongAnswer, CaseStatus::Skipped]);
        assert_eq!(task.score, 100);
        assert_eq!(task.judge_state.status, JudgeStatus::WrongAnswer);
    }

    #[tokio::test]
    async fn test_compile_error_skips_all_cases() {
        let mut judger = ScriptedJudger::new(&[("a", CaseStatus::Accepted, 0)]);
        judger.compile = CompilationResult::failed("a.cpp:3:1: error: expected ';'");
        let calls = judger.calls.clone();
        let test = test_with(vec![subtask(100, ScoringKind::Sum, &["a"])]);

        let (task, reporter) = run(judger, &test).await;

        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(task.judge_state.status, JudgeStatus::CompileError);
        assert_eq!(
            task.judge_state.error_message.as_deref(),
            Some("a.cpp:3:1: error: expected ';'")
        );
        assert_eq!(statuses(&task, 0), vec![CaseStatus::Skipped]);

        // only the Compiling transition was reported
        let progress = reporter.progress.lock().unwrap();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].judge_state.status, JudgeStatus::Compiling);
    }

    #[tokio::test]
    async fn test_preprocess_failure_is_no_testdata() {
        let mut judger = ScriptedJudger::new(&[("a", CaseStatus::Accepted, 0)]);
        judger.preprocess_error = Some("Unknown SPJ Language".into());
        let test = test_with(vec![subtask(100, ScoringKind::Sum, &["a"])]);

        let (task, reporter) = run(judger, &test).await;

        assert_eq!(task.judge_state.status, JudgeStatus::NoTestdata);
        assert_eq!(task.judge_state.error_message.as_deref(), Some("Unknown SPJ Language"));
        assert_eq!(reporter.progress_count(), 0);
    }

    #[tokio::test]
    async fn test_process_reports_missing_test_data() {
        let mut store = MockProblemStore::new();
        store
            .expect_get_test()
            .returning(|_| Err(AppError::NotFound("Can not find Problem TestData".into())));
        let worker = Arc::new(ScriptedWorker::default());
        let reporter = Arc::new(RecordingReporter::default());
        let ctx = context(store, worker.clone(), reporter.clone());

        let task = new_task().lock().await.clone();
        let finished = process(&ctx, task).await;

        assert_eq!(finished.judge_state.status, JudgeStatus::NoTestdata);
        assert_eq!(
            finished.judge_state.error_message.as_deref(),
            Some("Not found: Can not find Problem TestData")
        );
        assert_eq!(worker.compile_count(), 0);
        assert_eq!(reporter.last_result(), Some(finished));
    }
}
