//! Problem test data description, as loaded from the problem store.

use serde::{Deserialize, Serialize};

/// Resource limits applied to every case of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    /// Time limit in milliseconds
    pub time_limit: u64,
    /// Memory limit in megabytes
    pub memory_limit: u64,
}

/// How the cases of a subtask are scheduled and scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringKind {
    /// Run everything in parallel, proportional credit
    Sum,
    /// Run in order, zero on the first failure
    Min,
    /// Same schedule and scoring as `Min`
    Mul,
}

impl ScoringKind {
    /// Whether cases are run one at a time and skipped after a failure
    pub fn is_sequential(&self) -> bool {
        matches!(self, ScoringKind::Min | ScoringKind::Mul)
    }
}

/// One input/answer pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub prefix: String,
    /// Reference to the input file in the problem store
    pub input: String,
    /// Reference to the answer file in the problem store
    pub output: String,
}

/// A scored group of test cases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub score: u32,
    #[serde(rename = "type")]
    pub kind: ScoringKind,
    pub cases: Vec<TestCase>,
}

/// Source of a problem-supplied program (special judge, interactor)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executable {
    #[serde(alias = "lang")]
    pub language: String,
    pub code: String,
}

/// File names used instead of stdin/stdout by file-I/O problems
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIo {
    pub input: String,
    pub output: String,
}

/// Complete test specification of a problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub limit: Limit,
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub spj: Option<Executable>,
    #[serde(default)]
    pub interactor: Option<Executable>,
    #[serde(default)]
    pub file_io: Option<FileIo>,
}

impl Test {
    /// Total number of cases over all subtasks
    pub fn case_count(&self) -> usize {
        self.subtasks.iter().map(|s| s.cases.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_test_json() {
        let json = r#"{
            "limit": { "time_limit": 1000, "memory_limit": 256 },
            "subtasks": [
                { "score": 40, "type": "sum", "cases": [
                    { "prefix": "1", "input": "1.in", "output": "1.ans" }
                ]},
                { "score": 60, "type": "mul", "cases": [] }
            ],
            "spj": { "lang": "cpp", "code": "int main() {}" }
        }"#;

        let test: Test = serde_json::from_str(json).unwrap();
        assert_eq!(test.subtasks.len(), 2);
        assert_eq!(test.subtasks[0].kind, ScoringKind::Sum);
        assert!(test.subtasks[1].kind.is_sequential());
        assert_eq!(test.spj.as_ref().unwrap().language, "cpp");
        assert!(test.file_io.is_none());
        assert_eq!(test.case_count(), 1);
    }
}
