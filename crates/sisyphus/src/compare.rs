//! Output comparison for problems without a special judge.
//!
//! Two outputs match when they agree line by line after blank lines are
//! dropped, trailing whitespace is ignored and other runs of whitespace are
//! treated as one separator, the way `diff -Bb` compares.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// How much of a differing line is quoted back
const QUOTE_LIMIT: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub pass: bool,
    pub message: String,
}

/// Compare the user's output with the reference answer
pub async fn compare_files(user_output: &Path, answer: &Path) -> Result<DiffResult> {
    let user_output: PathBuf = user_output.to_path_buf();
    let answer: PathBuf = answer.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let user = File::open(&user_output)
            .with_context(|| format!("Failed to open {}", user_output.display()))?;
        let expected =
            File::open(&answer).with_context(|| format!("Failed to open {}", answer.display()))?;
        compare(BufReader::new(user), BufReader::new(expected))
    })
    .await?
}

/// Drop trailing whitespace and collapse every other whitespace run into one
/// space. Leading whitespace still counts, as it does for `diff -b`.
fn normalize(line: &str) -> String {
    let mut normalized = String::with_capacity(line.len());
    let mut in_space = false;
    for c in line.trim_end().chars() {
        if c.is_whitespace() {
            in_space = true;
            continue;
        }
        if in_space {
            normalized.push(' ');
            in_space = false;
        }
        normalized.push(c);
    }
    normalized
}

/// Non-blank lines, normalized, with their 1-based line numbers
fn significant_lines<R: BufRead>(
    reader: R,
) -> impl Iterator<Item = std::io::Result<(usize, String)>> {
    reader
        .split(b'\n')
        .enumerate()
        .filter_map(|(index, line)| match line {
            Ok(bytes) => {
                let line = normalize(&String::from_utf8_lossy(&bytes));
                (!line.is_empty()).then_some(Ok((index + 1, line)))
            }
            Err(e) => Some(Err(e)),
        })
}

fn quote(line: Option<&str>) -> String {
    match line {
        None => "end of file".to_string(),
        Some(line) if line.len() > QUOTE_LIMIT => {
            let mut end = QUOTE_LIMIT;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            format!("\"{}...\"", &line[..end])
        }
        Some(line) => format!("\"{}\"", line),
    }
}

pub fn compare<A: BufRead, B: BufRead>(user: A, answer: B) -> Result<DiffResult> {
    let mut user = significant_lines(user);
    let mut answer = significant_lines(answer);

    loop {
        let got = user.next().transpose().context("Failed to read user output")?;
        let expected = answer.next().transpose().context("Failed to read answer")?;

        match (got, expected) {
            (None, None) => {
                return Ok(DiffResult {
                    pass: true,
                    message: String::new(),
                });
            }
            (Some((_, a)), Some((_, b))) if a == b => continue,
            (got, expected) => {
                let line = got
                    .as_ref()
                    .or(expected.as_ref())
                    .map(|(n, _)| *n)
                    .unwrap_or_default();
                return Ok(DiffResult {
                    pass: false,
                    message: format!(
                        "Output differs at line {}: expected {}, found {}",
                        line,
                        quote(expected.as_ref().map(|(_, l)| l.as_str())),
                        quote(got.as_ref().map(|(_, l)| l.as_str())),
                    ),
                });
            }
        }
    }
}
