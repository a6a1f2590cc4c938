use olympus_common::types::languages;

use super::{COMPILE_PROCESSES, COMPILE_TIME_LIMIT, ExecParam, Language, MESSAGE_FILE, Redirects};

/// Static C++14 with g++
pub struct Cpp;

impl Language for Cpp {
    fn name(&self) -> &'static str {
        languages::CPP
    }

    fn source_file_name(&self) -> &'static str {
        "a.cpp"
    }

    fn binary_size_limit(&self) -> u64 {
        50 * 1024 * 1024
    }

    fn compile(
        &self,
        source_path: &str,
        output_directory: &str,
        do_not_use_x32_abi: bool,
    ) -> ExecParam {
        let output = format!("{}/a.out", output_directory);
        let mut parameters = super::args(&[
            "g++",
            source_path,
            "-o",
            &output,
            "-std=c++14",
            "-static",
            "-O2",
            "-DONLINE_JUDGE",
            "-Wall",
            "-Wextra",
        ]);
        if !do_not_use_x32_abi {
            parameters.push("-mx32".to_string());
        }

        let message = format!("{}/{}", output_directory, MESSAGE_FILE);
        ExecParam {
            executable: "/usr/bin/g++".to_string(),
            parameters,
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
