//! Case scheduling and scoring for one subtask.
//!
//! `sum` subtasks run every case at once and score proportionally.
//! `min` and `mul` subtasks run in source order and stop at the first
//! case that is not accepted.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use futures::FutureExt;
use futures::future::join_all;

use olympus_common::{CaseState, CaseStatus, JudgeTask, Subtask, SubtaskState, TestCase};

use super::{CaseProgress, Judger, SharedTask};
use crate::reporter::Reporter;

pub(super) async fn judge_subtask(
    judger: &dyn Judger,
    subtask: &Subtask,
    index: usize,
    task: &SharedTask,
    reporter: &Arc<dyn Reporter>,
) -> Result<()> {
    if subtask.kind.is_sequential() {
        skip_judge(judger, subtask, index, task, reporter).await?;
    } else {
        parallel_judge(judger, subtask, index, task, reporter).await?;
    }

    let snapshot = {
        let mut task = task.lock().await;
        let score = subtask_state(&mut task, index)?.score;
        task.score += score;
        task.clone()
    };
    tracing::debug!(
        task_id = %snapshot.task_id,
        subtask = index,
        "Subtask finished"
    );
    reporter.report_progress(&snapshot).await;
    Ok(())
}

/// Run cases one by one; the first non-accepted case zeroes the score and
/// skips the rest without running them.
async fn skip_judge(
    judger: &dyn Judger,
    subtask: &Subtask,
    index: usize,
    task: &SharedTask,
    reporter: &Arc<dyn Reporter>,
) -> Result<()> {
    update(task, index, |sub| {
        sub.score = subtask.score;
        Ok(())
    })
    .await?;

    for (case_index, case) in subtask.cases.iter().enumerate() {
        tracing::trace!(subtask = index, case = case_index, "Judging case");
        let progress = CaseProgress::new(task.clone(), reporter.clone(), index, case_index);
        let state = judge_case(judger, case, progress).await;
        let accepted = state.status == CaseStatus::Accepted;

        let snapshot = update(task, index, |sub| {
            set_case(sub, case_index, state)?;
            if !accepted {
                sub.score = 0;
                for rest in sub.cases.iter_mut().skip(case_index + 1) {
                    rest.status = CaseStatus::Skipped;
                }
            }
            Ok(())
        })
        .await?;
        reporter.report_progress(&snapshot).await;

        if !accepted {
            tracing::debug!(subtask = index, case = case_index, "Skipping the rest of subtask");
            break;
        }
    }
    Ok(())
}

/// Run every case concurrently. The score is recomputed from the recorded
/// statuses after each completion.
async fn parallel_judge(
    judger: &dyn Judger,
    subtask: &Subtask,
    index: usize,
    task: &SharedTask,
    reporter: &Arc<dyn Reporter>,
) -> Result<()> {
    update(task, index, |sub| {
        sub.score = 0;
        Ok(())
    })
    .await?;

    let outcomes = join_all(subtask.cases.iter().enumerate().map(|(case_index, case)| async move {
        tracing::trace!(subtask = index, case = case_index, "Judging case");
        let progress = CaseProgress::new(task.clone(), reporter.clone(), index, case_index);
        let state = judge_case(judger, case, progress).await;

        let snapshot = update(task, index, |sub| {
            set_case(sub, case_index, state)?;
            sub.score = sub.proportional_score(subtask.score);
            Ok(())
        })
        .await?;
        reporter.report_progress(&snapshot).await;
        Ok::<_, anyhow::Error>(())
    }))
    .await;

    outcomes.into_iter().collect::<Result<Vec<_>>>()?;
    Ok(())
}

/// Judge a case; a failure or a panic becomes a system-error case, never an
/// error of the subtask
async fn judge_case(judger: &dyn Judger, case: &TestCase, progress: CaseProgress) -> CaseState {
    match AssertUnwindSafe(judger.judge_one_case(case, progress))
        .catch_unwind()
        .await
    {
        Ok(Ok(state)) => state,
        Ok(Err(e)) => {
            tracing::warn!(case = %case.prefix, "Task runner error: {:#}", e);
            CaseState::system_error(&case.prefix, format!("{:#}", e))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(case = %case.prefix, "Task runner panicked: {}", message);
            CaseState::system_error(&case.prefix, format!("Task runner panicked: {}", message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

fn subtask_state(task: &mut JudgeTask, index: usize) -> Result<&mut SubtaskState> {
    task.judge_state
        .subtasks
        .get_mut(index)
        .ok_or_else(|| anyhow!("Judging subtask {}: state not exist", index))
}

fn set_case(sub: &mut SubtaskState, index: usize, state: CaseState) -> Result<()> {
    let slot = sub
        .cases
        .get_mut(index)
        .ok_or_else(|| anyhow!("Judging case {}: state not exist", index))?;
    *slot = state;
    Ok(())
}

/// Apply `f` to one subtask's state and return a snapshot of the task
async fn update<F>(task: &SharedTask, index: usize, f: F) -> Result<JudgeTask>
where
    F: FnOnce(&mut SubtaskState) -> Result<()>,
{
    let mut task = task.lock().await;
    f(subtask_state(&mut task, index)?)?;
    Ok(task.clone())
}
