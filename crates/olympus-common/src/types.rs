//! Status enums and small shared types used across Olympus services.

use serde::{Deserialize, Serialize};

/// Language names understood by the workers.
pub mod languages {
    pub const CPP: &str = "cpp";
    pub const CPP11_NOILINUX: &str = "cpp11-noilinux";
    pub const NODEJS: &str = "nodejs";

    /// Every language a worker has a profile for
    pub const SUPPORTED: &[&str] = &[CPP, CPP11_NOILINUX, NODEJS];

    /// Check whether `name` is a known language
    pub fn is_supported(name: &str) -> bool {
        SUPPORTED.contains(&name)
    }
}

/// Status of a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Waiting,
    Judging,
    Accepted,
    WrongAnswer,
    PartiallyCorrect,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    RuntimeError,
    JudgementFailed,
    InvalidInteraction,
    FileError,
    /// The case could not be judged because of an infrastructure fault
    SystemError,
    Skipped,
}

impl CaseStatus {
    /// Whether the case has not produced a verdict yet
    pub fn is_pending(&self) -> bool {
        matches!(self, CaseStatus::Waiting | CaseStatus::Judging)
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CaseStatus::Waiting => "Waiting",
            CaseStatus::Judging => "Judging",
            CaseStatus::Accepted => "Accepted",
            CaseStatus::WrongAnswer => "Wrong Answer",
            CaseStatus::PartiallyCorrect => "Partially Correct",
            CaseStatus::TimeLimitExceeded => "Time Limit Exceeded",
            CaseStatus::MemoryLimitExceeded => "Memory Limit Exceeded",
            CaseStatus::OutputLimitExceeded => "Output Limit Exceeded",
            CaseStatus::RuntimeError => "Runtime Error",
            CaseStatus::JudgementFailed => "Judgement Failed",
            CaseStatus::InvalidInteraction => "Invalid Interaction",
            CaseStatus::FileError => "File Error",
            CaseStatus::SystemError => "System Error",
            CaseStatus::Skipped => "Skipped",
        };
        write!(f, "{}", s)
    }
}

/// Submission-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JudgeStatus {
    Waiting,
    Compiling,
    Judging,
    Accepted,
    WrongAnswer,
    PartiallyCorrect,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    RuntimeError,
    JudgementFailed,
    InvalidInteraction,
    FileError,
    SystemError,
    CompileError,
    NoTestdata,
    Unknown,
}

impl JudgeStatus {
    /// Statuses that end judging and force every case to `Skipped` when set.
    pub fn skips_cases(&self) -> bool {
        matches!(
            self,
            JudgeStatus::CompileError
                | JudgeStatus::NoTestdata
                | JudgeStatus::SystemError
                | JudgeStatus::Unknown
        )
    }
}

impl From<CaseStatus> for JudgeStatus {
    fn from(status: CaseStatus) -> Self {
        match status {
            CaseStatus::Waiting => JudgeStatus::Waiting,
            CaseStatus::Judging => JudgeStatus::Judging,
            CaseStatus::Accepted => JudgeStatus::Accepted,
            CaseStatus::WrongAnswer => JudgeStatus::WrongAnswer,
            CaseStatus::PartiallyCorrect => JudgeStatus::PartiallyCorrect,
            CaseStatus::TimeLimitExceeded => JudgeStatus::TimeLimitExceeded,
            CaseStatus::MemoryLimitExceeded => JudgeStatus::MemoryLimitExceeded,
            CaseStatus::OutputLimitExceeded => JudgeStatus::OutputLimitExceeded,
            CaseStatus::RuntimeError => JudgeStatus::RuntimeError,
            CaseStatus::JudgementFailed => JudgeStatus::JudgementFailed,
            CaseStatus::InvalidInteraction => JudgeStatus::InvalidInteraction,
            CaseStatus::FileError => JudgeStatus::FileError,
            // A skipped case carries no verdict of its own
            CaseStatus::SystemError | CaseStatus::Skipped => JudgeStatus::SystemError,
        }
    }
}

impl std::fmt::Display for JudgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JudgeStatus::Waiting => "Waiting",
            JudgeStatus::Compiling => "Compiling",
            JudgeStatus::Judging => "Judging",
            JudgeStatus::Accepted => "Accepted",
            JudgeStatus::WrongAnswer => "Wrong Answer",
            JudgeStatus::PartiallyCorrect => "Partially Correct",
            JudgeStatus::TimeLimitExceeded => "Time Limit Exceeded",
            JudgeStatus::MemoryLimitExceeded => "Memory Limit Exceeded",
            JudgeStatus::OutputLimitExceeded => "Output Limit Exceeded",
            JudgeStatus::RuntimeError => "Runtime Error",
            JudgeStatus::JudgementFailed => "Judgement Failed",
            JudgeStatus::InvalidInteraction => "Invalid Interaction",
            JudgeStatus::FileError => "File Error",
            JudgeStatus::SystemError => "System Error",
            JudgeStatus::CompileError => "Compile Error",
            JudgeStatus::NoTestdata => "No Testdata",
            JudgeStatus::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Verdict produced by a worker for one executed test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    PartiallyCorrect,
    MemoryLimitExceeded,
    TimeLimitExceeded,
    OutputLimitExceeded,
    /// The expected output file does not exist
    FileError,
    RuntimeError,
    /// Special judge or interactor failed
    JudgementFailed,
    InvalidInteraction,
}

impl Verdict {
    /// Verdicts whose test data is not worth showing next to the result
    pub fn hides_test_data(&self) -> bool {
        matches!(
            self,
            Verdict::FileError | Verdict::JudgementFailed | Verdict::InvalidInteraction
        )
    }
}

impl From<Verdict> for CaseStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Accepted => CaseStatus::Accepted,
            Verdict::WrongAnswer => CaseStatus::WrongAnswer,
            Verdict::PartiallyCorrect => CaseStatus::PartiallyCorrect,
            Verdict::MemoryLimitExceeded => CaseStatus::MemoryLimitExceeded,
            Verdict::TimeLimitExceeded => CaseStatus::TimeLimitExceeded,
            Verdict::OutputLimitExceeded => CaseStatus::OutputLimitExceeded,
            Verdict::FileError => CaseStatus::FileError,
            Verdict::RuntimeError => CaseStatus::RuntimeError,
            Verdict::JudgementFailed => CaseStatus::JudgementFailed,
            Verdict::InvalidInteraction => CaseStatus::InvalidInteraction,
        }
    }
}

/// Outcome of a remote compile task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Done,
    Failed,
}

/// Kind of problem being judged; selects the judger implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    #[default]
    Standard,
}
