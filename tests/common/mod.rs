//! Common test utilities

#![allow(dead_code)]

use rkite::config::parse_config;
use rkite::runner::{CommandRequest, Context, Job, Output, RecordingRunner, ScriptedPrompt, Verbosity};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tempfile::TempDir;

/// Create a temporary directory with a kite.yml file
pub fn create_test_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("kite.yml");
    fs::write(&config_path, content).unwrap();
    (temp_dir, config_path)
}

/// Create a test config in a subdirectory
pub fn create_test_config_in_subdir(content: &str) -> (TempDir, PathBuf, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("kite.yml");
    let sub_dir = temp_dir.path().join("subdir");

    fs::write(&config_path, content).unwrap();
    fs::create_dir(&sub_dir).unwrap();

    (temp_dir, config_path, sub_dir)
}

/// A job wired to buffered output, recorded commands and scripted answers
pub struct TestJob {
    pub job: Job,
    pub output: Rc<RefCell<String>>,
    pub commands: Rc<RefCell<Vec<CommandRequest>>>,
}

impl TestJob {
    /// Everything the job printed so far
    pub fn printed(&self) -> String {
        self.output.borrow().clone()
    }

    /// Command lines handed to the process runner
    pub fn command_lines(&self) -> Vec<String> {
        self.commands.borrow().iter().map(|c| c.command.clone()).collect()
    }
}

/// Build job `name` from `yaml` with no prompt answers
pub fn test_job(yaml: &str, name: &str) -> TestJob {
    test_job_with(yaml, name, RecordingRunner::new(), &[])
}

/// Build job `name` from `yaml` with a prepared runner and prompt answers
pub fn test_job_with(yaml: &str, name: &str, runner: RecordingRunner, answers: &[&str]) -> TestJob {
    let config = parse_config(yaml, None).unwrap();
    let (output, buffer) = Output::buffered(Verbosity::Normal);
    let commands = runner.log();
    let ctx = Context::new()
        .with_output(output)
        .with_process_runner(runner)
        .with_prompt(ScriptedPrompt::new(answers.iter().copied()));

    TestJob {
        job: Job::new(ctx, &config, name).unwrap(),
        output: buffer,
        commands,
    }
}
