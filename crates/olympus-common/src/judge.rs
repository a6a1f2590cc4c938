//! Judge task state and the rules that fold case outcomes into it.

use serde::{Deserialize, Serialize};

use crate::test_data::Test;
use crate::types::{CaseStatus, JudgeStatus, ProblemKind};

/// Execution details of one case, shown to the submitter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseDetail {
    /// Time in milliseconds
    pub time: u64,
    /// Memory in kibibytes
    pub memory: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spj_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseState {
    pub prefix: String,
    pub status: CaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<CaseDetail>,
}

impl CaseState {
    /// A fresh case that has not been scheduled yet
    pub fn waiting(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            status: CaseStatus::Waiting,
            error_message: None,
            detail: None,
        }
    }

    /// A case whose judging failed for reasons unrelated to the submission
    pub fn system_error(prefix: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            status: CaseStatus::SystemError,
            error_message: Some(message.into()),
            detail: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskState {
    pub score: u32,
    pub cases: Vec<CaseState>,
}

impl SubtaskState {
    /// Number of accepted cases so far
    pub fn accepted(&self) -> usize {
        self.cases
            .iter()
            .filter(|c| c.status == CaseStatus::Accepted)
            .count()
    }

    /// Proportional score for `sum` subtasks, a pure function of the
    /// statuses currently recorded.
    pub fn proportional_score(&self, max_score: u32) -> u32 {
        if self.cases.is_empty() {
            return 0;
        }
        let accepted = self.accepted() as u64;
        (u64::from(max_score) * accepted / self.cases.len() as u64) as u32
    }
}

/// Aggregate judging progress of a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeState {
    pub status: JudgeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<SubtaskState>,
}

impl Default for JudgeState {
    fn default() -> Self {
        Self {
            status: JudgeStatus::Waiting,
            error_message: None,
            subtasks: Vec::new(),
        }
    }
}

impl JudgeState {
    /// Build the initial state for `test`: every case waiting.
    pub fn from_test(test: &Test) -> Self {
        let subtasks = test
            .subtasks
            .iter()
            .map(|sub| SubtaskState {
                score: 0,
                cases: sub.cases.iter().map(|c| CaseState::waiting(&c.prefix)).collect(),
            })
            .collect();

        Self {
            status: JudgeStatus::Waiting,
            error_message: None,
            subtasks,
        }
    }

    /// Iterate over every case in source order
    pub fn cases(&self) -> impl Iterator<Item = &CaseState> {
        self.subtasks.iter().flat_map(|s| s.cases.iter())
    }

    /// Set the status. Terminal failure statuses also mark every case skipped.
    pub fn set_status(&mut self, status: JudgeStatus) {
        if status.skips_cases() {
            for case in self.subtasks.iter_mut().flat_map(|s| s.cases.iter_mut()) {
                case.status = CaseStatus::Skipped;
            }
        }
        self.status = status;
    }

    /// Fail the whole task with a message
    pub fn fail(&mut self, status: JudgeStatus, message: impl Into<String>) {
        self.set_status(status);
        self.error_message = Some(message.into());
    }

    /// Recompute the status from the cases. Only a `Judging` state is refreshed.
    pub fn refresh_status(&mut self) {
        if self.status != JudgeStatus::Judging {
            return;
        }
        self.status = fold_case_statuses(self.cases().map(|c| c.status));
    }
}

/// Fold case statuses (in source order) into a submission status.
pub fn fold_case_statuses<I>(statuses: I) -> JudgeStatus
where
    I: IntoIterator<Item = CaseStatus>,
{
    let statuses: Vec<CaseStatus> = statuses.into_iter().collect();

    if statuses.iter().all(|s| *s == CaseStatus::Waiting) {
        return JudgeStatus::Waiting;
    }
    if statuses.iter().any(|s| s.is_pending()) {
        return JudgeStatus::Judging;
    }
    if statuses.iter().all(|s| *s == CaseStatus::Accepted) {
        return JudgeStatus::Accepted;
    }
    if statuses.iter().all(|s| *s == CaseStatus::Skipped) {
        return JudgeStatus::SystemError;
    }

    statuses
        .into_iter()
        .find(|s| !matches!(s, CaseStatus::Accepted | CaseStatus::Skipped) && !s.is_pending())
        .map(JudgeStatus::from)
        .unwrap_or(JudgeStatus::SystemError)
}

/// One submission being judged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeTask {
    #[serde(default)]
    pub priority: u8,
    pub task_id: String,
    pub problem_id: String,
    #[serde(default)]
    pub kind: ProblemKind,
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub judge_state: JudgeState,
}
