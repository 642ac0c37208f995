//! External Tool Resolution and Invocation
//!
//! Every external program the pipeline calls (simulator, estimators,
//! downloaders) is reached through the [`CommandRunner`] trait, so the
//! engine can be exercised without the scientific stack installed.
//!
//! # Program Resolution Priority
//!
//! 1. Path override from the run configuration (`tools` map)
//! 2. Production path: `runtime/<program>` next to the nerunner executable
//! 3. Development path: `{project_root}/runtime/<program>`
//! 4. System PATH (`which`)
//! 5. The bare program name, left for the OS to resolve
//!
//! MSMC is the exception: unless overridden it runs from the download cache.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use log::{debug, info, warn};
use once_cell::sync::Lazy;

use crate::config::RunConfig;
use crate::environment::cache::DownloadCache;
use crate::error::{NeError, Result};

/// Directories searched for bundled programs before PATH.
pub static RUNTIME_DIRS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    let mut dirs = Vec::new();

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.join("runtime"));
        }
    }

    dirs.push(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("runtime"));
    dirs
});

/// External programs the pipeline shells out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExternalTool {
    Stdpopsim,
    Tskit,
    Smcpp,
    Java,
    Bash,
    Msmc,
    Curl,
    Unzip,
    Tar,
}

impl ExternalTool {
    pub const ALL: [ExternalTool; 9] = [
        Self::Stdpopsim,
        Self::Tskit,
        Self::Smcpp,
        Self::Java,
        Self::Bash,
        Self::Msmc,
        Self::Curl,
        Self::Unzip,
        Self::Tar,
    ];

    /// Program name as found on PATH.
    pub fn program_name(&self) -> &'static str {
        match self {
            Self::Stdpopsim => "stdpopsim",
            Self::Tskit => "tskit",
            Self::Smcpp => "smc++",
            Self::Java => "java",
            Self::Bash => "bash",
            Self::Msmc => "msmc",
            Self::Curl => "curl",
            Self::Unzip => "unzip",
            Self::Tar => "tar",
        }
    }
}

impl fmt::Display for ExternalTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program_name())
    }
}

/// One external process call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub tool: ExternalTool,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,

    /// Capture standard output into this file instead of memory
    pub stdout_to: Option<PathBuf>,
}

impl Invocation {
    pub fn new(tool: ExternalTool, program: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            stdout_to: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_to = Some(path.into());
        self
    }

    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit status and captured streams of a finished process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    /// Last `lines` lines of standard error.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }

    /// Describes a failed exit for error messages.
    pub fn failure_message(&self) -> String {
        let status = match self.status_code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };

        let tail = self.stderr_tail(10);
        if tail.is_empty() {
            status
        } else {
            format!("{}\n{}", status, tail)
        }
    }
}

/// Runs external processes. Implementations block until the process exits.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput>;
}

/// Runs programs with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        debug!("$ {}", invocation.command_line());

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);

        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }

        match &invocation.stdout_to {
            Some(path) => {
                cmd.stdout(Stdio::from(File::create(path)?));
            }
            None => {
                cmd.stdout(Stdio::piped());
            }
        }
        cmd.stderr(Stdio::piped());

        let output = cmd.output().map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("Failed to start {}: {}", invocation.program.display(), e),
            )
        })?;

        Ok(ProcessOutput {
            status_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Resolves a program path following the priority order in the module docs.
pub fn resolve_program(name: &str, overrides: &BTreeMap<String, PathBuf>) -> PathBuf {
    if let Some(path) = overrides.get(name) {
        debug!("Using configured {}: {}", name, path.display());
        return path.clone();
    }

    for dir in RUNTIME_DIRS.iter() {
        let candidate = dir.join(name);
        if candidate.exists() {
            info!("Using bundled {}: {}", name, candidate.display());
            return candidate;
        }
    }

    if let Ok(output) = Command::new("which").arg(name).output() {
        if output.status.success() {
            let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path_str.is_empty() {
                debug!("Using system {}: {}", name, path_str);
                return PathBuf::from(path_str);
            }
        }
    }

    warn!("{} not found in runtime/ or on PATH", name);
    PathBuf::from(name)
}

/// Resolved programs, the command runner, and the download cache.
///
/// Cheap to clone; worker threads each receive a clone.
#[derive(Clone)]
pub struct Toolchain {
    runner: Arc<dyn CommandRunner>,
    programs: BTreeMap<ExternalTool, PathBuf>,
    cache: DownloadCache,
}

impl Toolchain {
    /// Builds a toolchain from the run configuration using real processes.
    pub fn from_config(config: &RunConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    /// Builds a toolchain with a custom runner.
    pub fn with_runner(config: &RunConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let cache = DownloadCache::new(&config.cache_dir);
        let programs = ExternalTool::ALL
            .iter()
            .map(|tool| {
                let name = tool.program_name();
                let path = match tool {
                    ExternalTool::Msmc if !config.tool_paths.contains_key(name) => {
                        cache.msmc_binary()
                    }
                    _ => resolve_program(name, &config.tool_paths),
                };
                (*tool, path)
            })
            .collect();

        Self {
            runner,
            programs,
            cache,
        }
    }

    pub fn cache(&self) -> &DownloadCache {
        &self.cache
    }

    /// Starts an invocation of the resolved program for `tool`.
    pub fn command(&self, tool: ExternalTool) -> Invocation {
        let program = self
            .programs
            .get(&tool)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(tool.program_name()));
        Invocation::new(tool, program)
    }

    /// Runs an invocation, mapping a failure to start or a non-zero exit
    /// through `on_failure`.
    pub fn run_checked<F>(&self, invocation: &Invocation, on_failure: F) -> Result<ProcessOutput>
    where
        F: FnOnce(String) -> NeError,
    {
        let message = match self.runner.run(invocation) {
            Ok(output) if output.success() => return Ok(output),
            Ok(output) => output.failure_message(),
            Err(e) => e.to_string(),
        };
        Err(on_failure(format!("`{}` failed: {}", invocation.command_line(), message)))
    }
}

impl fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolchain")
            .field("programs", &self.programs)
            .field("cache", &self.cache)
            .finish()
    }
}
