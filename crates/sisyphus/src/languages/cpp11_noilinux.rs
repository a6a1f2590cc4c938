use olympus_common::types::languages;

use super::{COMPILE_PROCESSES, COMPILE_TIME_LIMIT, ExecParam, Language, MESSAGE_FILE, Redirects};

/// C++11 built by the NOI Linux compiler wrapper installed in the sandbox
pub struct Cpp11NoiLinux;

impl Language for Cpp11NoiLinux {
    fn name(&self) -> &'static str {
        languages::CPP11_NOILINUX
    }

    fn source_file_name(&self) -> &'static str {
        "a.cpp"
    }

    fn binary_size_limit(&self) -> u64 {
        5000 * 1024
    }

    fn compile(&self, source_path: &str, output_directory: &str, _: bool) -> ExecParam {
        let output = format!("{}/a.out", output_directory);
        let message = format!("{}/{}", output_directory, MESSAGE_FILE);
        ExecParam {
            executable: "/usr/bin/compile-cpp-noilinux".to_string(),
            parameters: super::args(&[
                "compile-cpp-noilinux",
                "-std=c++11",
                source_path,
                "-o",
                &output,
                "-O2",
                "-DONLINE_JUDGE",
            ]),
            time: COMPILE_TIME_LIMIT,
            memory: 2 << 30,
            stack_size: None,
            process: COMPILE_PROCESSES,
            stdin: None,
            stdout: Some(message.clone()),
            stderr: Some(message),
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
            executable: format!("{}/a.out", binary_directory),
            parameters: Vec::new(),
            time,
            memory,
            stack_size: Some(memory),
            process: 1,
            stdin: redirects.stdin,
            stdout: redirects.stdout,
            stderr: redirects.stderr,
            message_file: None,
            working_directory: working_directory.to_string(),
        }
    }
}
