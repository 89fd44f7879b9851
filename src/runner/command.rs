//! Command execution
//!
//! Shell and remote shell tasks hand their final command line to a
//! [`ProcessRunner`]. The default runner spawns the configured interpreter;
//! [`RecordingRunner`] records requests instead, for tests and previews.

use crate::error::{ExecutionError, ExecutionResult, Result};
use crate::runner::output::Verbosity;
use crate::runner::Context;
use crate::scope::Value;
use std::cell::RefCell;
use std::path::PathBuf;
use std::process::{Command as StdCommand, Stdio};
use std::rc::Rc;

/// A command line ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub cwd: PathBuf,
    pub interpreter: Vec<String>,
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: &str) -> Self {
        ProcessOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Something able to run shell commands
pub trait ProcessRunner {
    fn run(&self, request: &CommandRequest) -> ExecutionResult<ProcessOutput>;
}

/// Runs commands through the interpreter with `std::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ProcessRunner for ShellRunner {
    fn run(&self, request: &CommandRequest) -> ExecutionResult<ProcessOutput> {
        let fallback = ["sh".to_string(), "-c".to_string()];
        let interpreter = if request.interpreter.is_empty() {
            &fallback[..]
        } else {
            &request.interpreter[..]
        };

        let mut command = StdCommand::new(&interpreter[0]);
        command.args(&interpreter[1..]);
        command.arg(&request.command);
        command.current_dir(&request.cwd);

        command.stdin(Stdio::inherit());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let output = command
            .output()
            .map_err(|e| ExecutionError::CommandNotStarted {
                command: request.command.clone(),
                error: e.to_string(),
            })?;

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Records every request and answers with canned output
///
/// Responses are matched by substring, first match wins. Unmatched commands
/// succeed with empty output.
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    log: Rc<RefCell<Vec<CommandRequest>>>,
    responses: Vec<(String, ProcessOutput)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle on the recorded requests
    pub fn log(&self) -> Rc<RefCell<Vec<CommandRequest>>> {
        Rc::clone(&self.log)
    }

    /// Answer commands containing `needle` with `stdout`
    pub fn respond(mut self, needle: &str, stdout: &str) -> Self {
        self.responses
            .push((needle.to_string(), ProcessOutput::ok(stdout)));
        self
    }

    /// Let commands containing `needle` exit with `code`
    pub fn fail(mut self, needle: &str, code: i32) -> Self {
        self.responses.push((
            needle.to_string(),
            ProcessOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: format!("{} failed", needle),
            },
        ));
        self
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, request: &CommandRequest) -> ExecutionResult<ProcessOutput> {
        self.log.borrow_mut().push(request.clone());
        Ok(self
            .responses
            .iter()
            .find(|(needle, _)| request.command.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| ProcessOutput::ok("")))
    }
}

impl Context {
    /// Run `command`, returning its trimmed stdout
    ///
    /// With `dry_run` the command is only logged and null is returned.
    pub fn run_process(&mut self, command: &str, cwd: Option<&str>, dry_run: bool) -> Result<Value> {
        let working_dir = match cwd {
            Some(dir) if !dir.is_empty() => self.working_dir.join(dir),
            _ => self.working_dir.clone(),
        };

        self.output.write(
            &format!("{} > {}", working_dir.display(), command),
            Verbosity::Verbose,
            true,
        );
        tracing::debug!(command, cwd = %working_dir.display(), dry_run, "running process");

        if dry_run {
            return Ok(Value::Null);
        }

        let request = CommandRequest {
            command: command.to_string(),
            cwd: working_dir,
            interpreter: self.interpreter.clone(),
        };
        let output = self.processes.run(&request)?;

        if !output.success() {
            return Err(ExecutionError::ProcessFailed {
                command: request.command,
                code: output.code,
                cwd: cwd.map(str::to_string),
                stdout: output.stdout,
                stderr: output.stderr,
            }
            .into());
        }

        let stdout = output.stdout.trim().to_string();
        if !stdout.is_empty() {
            self.output.write(&stdout, Verbosity::Verbose, true);
        }
        Ok(Value::String(stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KiteError;
    use std::path::Path;

    fn request(command: &str) -> CommandRequest {
        CommandRequest {
            command: command.to_string(),
            cwd: PathBuf::from("."),
            interpreter: vec!["sh".to_string(), "-c".to_string()],
        }
    }

    #[test]
    fn test_shell_runner_captures_output() {
        let output = ShellRunner.run(&request("echo test")).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "test");
    }

    #[test]
    fn test_shell_runner_failing_command() {
        let output = ShellRunner.run(&request("exit 3")).unwrap();
        assert!(!output.success());
        assert_eq!(output.code, Some(3));
    }

    #[test]
    fn test_shell_runner_missing_interpreter() {
        let mut req = request("true");
        req.interpreter = vec!["/definitely/not/a/shell".to_string()];
        assert!(matches!(
            ShellRunner.run(&req),
            Err(ExecutionError::CommandNotStarted { .. })
        ));
    }

    #[test]
    fn test_recording_runner() {
        let runner = RecordingRunner::new().respond("whoami", "deploy").fail("false", 1);
        let log = runner.log();

        assert_eq!(runner.run(&request("whoami")).unwrap().stdout, "deploy");
        assert_eq!(runner.run(&request("false")).unwrap().code, Some(1));
        assert!(runner.run(&request("ls")).unwrap().success());
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(log.borrow()[2].command, "ls");
    }

    #[test]
    fn test_run_process_trims_and_fails() {
        let runner = RecordingRunner::new().respond("echo", "  hi\n").fail("broken", 4);
        let log = runner.log();
        let mut ctx = Context::new()
            .with_working_dir(PathBuf::from("/srv"))
            .with_process_runner(runner);

        assert_eq!(
            ctx.run_process("echo hi", Some("app"), false).unwrap(),
            Value::from("hi")
        );
        assert_eq!(log.borrow()[0].cwd, Path::new("/srv/app"));

        let err = ctx.run_process("broken", None, false).unwrap_err();
        assert!(matches!(
            err,
            KiteError::Execution(ExecutionError::ProcessFailed { code: Some(4), .. })
        ));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_run_process_dry_run() {
        let runner = RecordingRunner::new();
        let log = runner.log();
        let mut ctx = Context::new().with_process_runner(runner);

        assert_eq!(ctx.run_process("rm -rf /", None, true).unwrap(), Value::Null);
        assert!(log.borrow().is_empty());
    }
}
