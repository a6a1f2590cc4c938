//! Language profiles: how to build a source file and how to run the result.
//!
//! Paths handed to a profile are paths inside the sandbox; the caller
//! mounts the real directories there.

mod cpp;
mod cpp11_noilinux;
mod nodejs;

pub use cpp::Cpp;
pub use cpp11_noilinux::Cpp11NoiLinux;
pub use nodejs::NodeJs;

/// One sandboxed process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecParam {
    pub executable: String,
    /// Full argv, including argv[0]
    pub parameters: Vec<String>,
    /// CPU time limit in milliseconds
    pub time: u64,
    /// Memory limit in bytes
    pub memory: u64,
    /// Stack limit in bytes, unlimited when unset
    pub stack_size: Option<u64>,
    /// Maximum number of processes
    pub process: u32,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Compiler output file, relative to the output directory
    pub message_file: Option<String>,
    pub working_directory: String,
}

/// Redirections of a program run, relative to its working directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirects {
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

pub trait Language: Send + Sync {
    fn name(&self) -> &'static str;

    fn source_file_name(&self) -> &'static str;

    /// Largest output directory a compile may leave behind, in bytes
    fn binary_size_limit(&self) -> u64;

    fn compile(
        &self,
        source_path: &str,
        output_directory: &str,
        do_not_use_x32_abi: bool,
    ) -> ExecParam;

    fn run(
        &self,
        binary_directory: &str,
        working_directory: &str,
        time: u64,
        memory: u64,
        redirects: Redirects,
    ) -> ExecParam;
}

static CPP: Cpp = Cpp;
static CPP11_NOILINUX: Cpp11NoiLinux = Cpp11NoiLinux;
static NODEJS: NodeJs = NodeJs;

static LANGUAGES: [&dyn Language; 3] = [&CPP, &CPP11_NOILINUX, &NODEJS];

/// Look up a profile by name
pub fn get_language(name: &str) -> Option<&'static dyn Language> {
    LANGUAGES.iter().copied().find(|l| l.name() == name)
}

/// Compile budget shared by every profile
const COMPILE_TIME_LIMIT: u64 = 5000;
const COMPILE_PROCESSES: u32 = 10;
const MESSAGE_FILE: &str = "message.txt";

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use olympus_common::types::languages;

    #[test]
    fn test_every_supported_language_has_a_profile() {
        for name in languages::SUPPORTED {
            let profile = get_language(name).unwrap();
            assert_eq!(profile.name(), *name);
        }
        assert!(get_language("cobol").is_none());
    }

    #[test]
    fn test_x32_abi_flag() {
        let cpp = get_language("cpp").unwrap();
        let with = cpp.compile("/sandbox/1/a.cpp", "/sandbox/2", false);
        let without = cpp.compile("/sandbox/1/a.cpp", "/sandbox/2", true);
        assert!(with.parameters.iter().any(|p| p == "-mx32"));
        assert!(!without.parameters.iter().any(|p| p == "-mx32"));
        assert_eq!(with.message_file.as_deref(), Some("message.txt"));
    }

    #[test]
    fn test_run_redirections() {
        let node = get_language("nodejs").unwrap();
        let param = node.run(
            "/sandbox/2",
            "/sandbox/1",
            1000,
            256 << 20,
            Redirects {
                stdin: Some("x.in".into()),
                stdout: Some("x.out".into()),
                stderr: None,
            },
        );
        assert_eq!(param.executable, "/usr/bin/node");
        assert_eq!(param.parameters, vec!["node", "/sandbox/2/a.js"]);
        assert_eq!(param.stdin.as_deref(), Some("x.in"));
        assert_eq!(param.process, 10);

        let cpp = get_language("cpp").unwrap();
        let param = cpp.run("/sandbox/2", "/sandbox/1", 1000, 256 << 20, Redirects::default());
        assert_eq!(param.executable, "/sandbox/2/a.out");
        assert_eq!(param.stack_size, Some(256 << 20));
        assert_eq!(param.process, 1);
    }
}
