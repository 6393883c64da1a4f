//! External command execution.
//!
//! Every tool snaprot drives (mount, rsync) goes through a [`CommandRunner`]. Runners
//! never return an error: a tool that is missing, crashed, or complained on stderr is
//! reported through the same [`CommandResult`] and the caller decides what it means.

#[cfg(test)]
pub(crate) mod testing;

use std::ffi::OsString;
use std::process::{Command, Stdio};
use tracing::debug;

/// Captured outcome of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// The process could not be spawned or waited on
    pub execution_failed: bool,
    /// Exit code, `None` when killed by a signal or never started
    pub exit_code: Option<i32>,
}

impl CommandResult {
    /// A result for a command that never ran to completion.
    pub fn execution_failure(detail: impl Into<String>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: detail.into().into_bytes(),
            execution_failed: true,
            exit_code: None,
        }
    }

    /// A command that exited 0 with the given stdout.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            execution_failed: false,
            exit_code: Some(0),
        }
    }

    /// Ran, exited zero, and wrote nothing to stderr.
    pub fn succeeded(&self) -> bool {
        !self.execution_failed && self.exit_code == Some(0) && self.stderr.is_empty()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim_end().to_string()
    }

    /// One-line explanation of why [`succeeded`](Self::succeeded) is false.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr_text();
        match (self.execution_failed, self.exit_code) {
            (true, _) => stderr,
            (false, Some(0)) => stderr,
            (false, Some(code)) if stderr.is_empty() => format!("exited with status {}", code),
            (false, Some(code)) => format!("exited with status {}: {}", code, stderr),
            (false, None) if stderr.is_empty() => "terminated by signal".to_string(),
            (false, None) => format!("terminated by signal: {}", stderr),
        }
    }
}

/// Runs an argument vector (`argv[0]` is the program) to completion.
pub trait CommandRunner {
    fn run(&self, argv: &[OsString]) -> CommandResult;
}

/// Runs commands as real child processes, blocking until they exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[OsString]) -> CommandResult {
        let Some((program, args)) = argv.split_first() else {
            return CommandResult::execution_failure("empty command line");
        };

        debug!(command = %display_argv(argv), "Executing command");

        match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
        {
            Ok(output) => CommandResult {
                stdout: output.stdout,
                stderr: output.stderr,
                execution_failed: false,
                exit_code: output.status.code(),
            },
            Err(e) => CommandResult::execution_failure(format!(
                "failed to execute {}: {}",
                program.to_string_lossy(),
                e
            )),
        }
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, argv: &[OsString]) -> CommandResult {
        (**self).run(argv)
    }
}

/// Render an argument vector for logs.
pub fn display_argv(argv: &[OsString]) -> String {
    argv.iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
