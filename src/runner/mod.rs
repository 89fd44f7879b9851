//! Task execution engine
//!
//! This module handles the task lifecycle, the composite scheduler, the
//! factory and the collaborators tasks use while running (process runner,
//! prompts and output).

pub mod command;
pub mod context;
pub mod factory;
pub mod job;
pub mod output;
pub mod prompt;
pub mod shell;
pub mod task;
pub mod tasks;
pub mod when;
pub mod workflow;

// Re-export main types
pub use command::{CommandRequest, ProcessOutput, ProcessRunner, RecordingRunner, ShellRunner};
pub use context::Context;
pub use job::{CliDefinition, Job};
pub use output::{Output, Verbosity};
pub use prompt::{Prompt, Question, QuestionKind, ScriptedPrompt, StdinPrompt};
pub use task::{TaskEntry, TaskKind, TaskState};
pub use tasks::BODY_KEYS;
pub use workflow::{StageSelect, Workflow, WorkflowRegistry};
