use olympus_common::types::languages;

use super::{COMPILE_PROCESSES, COMPILE_TIME_LIMIT, ExecParam, Language, MESSAGE_FILE, Redirects};

/// JavaScript on Node. "Compiling" copies the script after a syntax check.
pub struct NodeJs;

impl Language for NodeJs {
    fn name(&self) -> &'static str {
        languages::NODEJS
    }

    fn source_file_name(&self) -> &'static str {
        "a.js"
    }

    fn binary_size_limit(&self) -> u64 {
        5000 * 1024
    }

    fn compile(&self, source_path: &str, output_directory: &str, _: bool) -> ExecParam {
        ExecParam {
            executable: "/usr/bin/compile-script".to_string(),
            parameters: super::args(&[
                "compile-script",
                source_path,
                output_directory,
                "node -c a.js",
            ]),
            time: COMPILE_TIME_LIMIT,
            memory: 1 << 30,
            stack_size: None,
            process: COMPILE_PROCESSES,
            stdin: None,
            stdout: None,
            stderr: Some(format!("{}/{}", output_directory, MESSAGE_FILE)),
            message_file: Some(MESSAGE_FILE.to_string()),
            working_directory: output_directory.to_string(),
        }
    }

    fn run(
        &self,
        binary_directory: &str,
        working_directory: &str,
        time: u64,
        memory: u64,
        redirects: Redirects,
    ) -> ExecParam {
        ExecParam {
            executable: "/usr/bin/node".to_string(),
            parameters: vec!["node".to_string(), format!("{}/a.js", binary_directory)],
            time,
            memory,
            stack_size: None,
            // node keeps worker threads around
            process: 10,
            stdin: redirects.stdin,
            stdout: redirects.stdout,
            stderr: redirects.stderr,
            message_file: None,
            working_directory: working_directory.to_string(),
        }
    }
}
