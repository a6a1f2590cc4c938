//! Shared model, collaborator traits and Redis plumbing for the judge
//! daemon (minos) and the sandbox workers (sisyphus).

pub mod cache;
pub mod error;
pub mod judge;
pub mod lock;
pub mod rpc;
pub mod store;
pub mod stream;
pub mod test_data;
pub mod types;
pub mod utils;

pub use error::{AppError, AppResult};
pub use judge::{CaseDetail, CaseState, JudgeState, JudgeTask, SubtaskState};
pub use test_data::{Executable, FileIo, Limit, ScoringKind, Subtask, Test, TestCase};
pub use types::*;
